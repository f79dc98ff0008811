use thiserror::Error;

use svid::SvidError;

#[derive(Error, Debug)]
pub enum MlyError {
    #[error("invalid Mapillary download configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Pipeline(#[from] SvidError),
}

use thiserror::Error;

use svid::SvidError;

#[derive(Error, Debug)]
pub enum GsvError {
    #[error("invalid Street View download configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Pipeline(#[from] SvidError),
}

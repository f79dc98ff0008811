use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SvidError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("missing credential: {0}")]
    MissingCredential(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote rejected request with status {status}: {message}")]
    RemoteRejection { status: u16, message: String },
    #[error("unexpected response payload: {0}")]
    Protocol(String),
    #[error("corrupt checkpoint shard {path}: {message}")]
    Corruption { path: PathBuf, message: String },
    #[error("filesystem failure at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failure reading tabular file {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{0}")]
    InternalError(String),
}

impl SvidError {
    /// transport errors are the only class worth retrying with a
    /// different proxy; everything else is either fatal or a remote
    /// decision that a retry will not change.
    pub fn is_transport(&self) -> bool {
        matches!(self, SvidError::Transport(_))
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SvidError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        SvidError::Csv {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for SvidError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => SvidError::RemoteRejection {
                status: status.as_u16(),
                message: value.to_string(),
            },
            None => SvidError::Transport(value.to_string()),
        }
    }
}

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrazaError>;

#[derive(Debug, Error)]
pub enum TrazaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid state: {0}")]
    State(String),
}

impl TrazaError {
    /// Classifies an I/O failure, promoting permission problems to
    /// [`TrazaError::Unauthorized`] so callers can distinguish a read-only
    /// destination from a transient disk error.
    pub fn from_io(err: io::Error, target: &str) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            TrazaError::Unauthorized(format!("{target}: {err}"))
        } else {
            TrazaError::Io(err)
        }
    }
}

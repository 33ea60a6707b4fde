use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`version` must be one of \"major\", \"minor\", \"patch\", or match \"X.Y.Z\" (got `{0}`)")]
    InvalidVersion(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("object `{0}` not found in store")]
    ObjectNotFound(String),

    #[error("manifest `{key}` is not valid JSON: {source}")]
    Manifest {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("staging failed: {0}")]
    Staging(String),
}

impl ReleaseError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReleaseError>;

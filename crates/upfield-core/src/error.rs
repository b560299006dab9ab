//! Error types module
//!
//! All upload failures are unified under the `UploadError` enum. Every
//! variant renders as a single human-readable string suitable for showing
//! to the end user; internal identifiers and stack traces never leak
//! through `Display`.

use std::io;
use std::path::PathBuf;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The upload never arrived intact (size limit, generic transport fault).
    /// Detected before any side effect.
    #[error("{0}")]
    Transfer(String),

    /// Extension mismatch or a registered validator's rejection.
    /// Detected before any side effect.
    #[error("{0}")]
    Validation(String),

    /// The spec combines settings that cannot work together, such as a
    /// custom store action with a path-column mapping.
    #[error("invalid upload configuration: {0}")]
    Configuration(String),

    /// A store failure during insert/update/select/delete, propagated
    /// verbatim. May occur after a placeholder row has been committed.
    #[error("database error: {0}")]
    Store(#[source] anyhow::Error),

    /// A move or permission failure after the database row already exists.
    /// The row is left in place for the orphan sweeper to reclaim.
    #[error("failed to store file at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        UploadError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        UploadError::Store(anyhow::Error::new(err))
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

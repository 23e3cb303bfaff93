//! Collaborator that knows when a resource last changed.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid resource path `{0}`")]
    InvalidPath(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

/// Modification time lookup used for `Last-Modified` and conditional GETs.
///
/// `Ok(None)` means the resource has no timestamp. Errors are treated the same
/// way by the filter.
#[async_trait]
pub trait LastModifiedSource: Send + Sync {
    async fn last_modified(&self, resource: &str) -> Result<Option<OffsetDateTime>, ContentError>;
}


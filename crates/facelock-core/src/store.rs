//! Persistence seams: identity records and named image blobs.

use crate::types::Identity;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend: {0}")]
    Backend(String),
    #[error("blob not found: {0}")]
    BlobNotFound(String),
    #[error("invalid blob name: {0}")]
    InvalidName(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Enrolled-identity records. Name uniqueness is enforced by the caller.
pub trait GalleryStore: Send + Sync {
    fn insert(&self, identity: &Identity) -> Result<String, StoreError>;
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
    /// All identities in insertion order.
    fn list(&self) -> Result<Vec<Identity>, StoreError>;
    fn get(&self, id: &str) -> Result<Option<Identity>, StoreError>;
    /// Remove every record, returning how many were removed.
    fn clear(&self) -> Result<usize, StoreError>;
}

/// Named byte blobs (encoded images).
pub trait BlobStore: Send + Sync {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError>;
    /// Returns false when the blob did not exist.
    fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

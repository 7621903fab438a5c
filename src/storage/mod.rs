mod drive;
mod in_memory;
mod local_fs;

pub use drive::DriveStorage;
pub use in_memory::InMemoryStorage;
pub use local_fs::LocalFileStorage;

use crate::errors::ApiError;
use async_trait::async_trait;
use bytes::Bytes;
use mime::Mime;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub name: String,
    pub content: Bytes,
    pub content_type: Mime,
}

/// Name-keyed blob store. `put` overwrites; `get` and `delete` report
/// [`ApiError::NotFound`] for unknown names.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn put(&self, file: StoredFile) -> Result<(), ApiError>;
    async fn get(&self, name: &str) -> Result<StoredFile, ApiError>;
    async fn list(&self) -> Result<Vec<String>, ApiError>;
    async fn delete(&self, name: &str) -> Result<(), ApiError>;
}

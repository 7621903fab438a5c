use super::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    files: Arc<RwLock<HashMap<String, StoredFile>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put(&self, file: StoredFile) -> Result<(), ApiError> {
        self.files.write().await.insert(file.name.clone(), file);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<StoredFile, ApiError> {
        self.files
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.files.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        self.files
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content: &'static [u8]) -> StoredFile {
        StoredFile {
            name: name.to_string(),
            content: Bytes::from_static(content),
            content_type: mime::TEXT_PLAIN,
        }
    }

    #[tokio::test]
    async fn put_overwrites_existing_name() {
        let storage = InMemoryStorage::new();
        storage.put(file("a.txt", b"old")).await.unwrap();
        storage.put(file("a.txt", b"new")).await.unwrap();

        assert_eq!(storage.get("a.txt").await.unwrap().content, "new");
        assert_eq!(storage.list().await.unwrap(), vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn missing_names_are_not_found() {
        let storage = InMemoryStorage::new();
        assert!(matches!(storage.get("nope.txt").await, Err(ApiError::NotFound(_))));
        assert!(matches!(storage.delete("nope.txt").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let storage = InMemoryStorage::new();
        storage.put(file("a.txt", b"x")).await.unwrap();
        storage.delete("a.txt").await.unwrap();

        assert!(storage.list().await.unwrap().is_empty());
        assert!(matches!(storage.get("a.txt").await, Err(ApiError::NotFound(_))));
    }
}

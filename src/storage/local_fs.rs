use super::*;
use crate::validation::check_segment;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Keeps content under `files/<name>` and the content type under
/// `meta/<name>.json`.
pub struct LocalFileStorage {
    files_dir: PathBuf,
    meta_dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct FileMeta {
    content_type: String,
}

impl LocalFileStorage {
    pub fn new(storage_path: &Path) -> Result<Self, ApiError> {
        let files_dir = storage_path.join("files");
        let meta_dir = storage_path.join("meta");
        for dir in [&files_dir, &meta_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                tracing::error!("failed to create {}: {e}", dir.display());
                ApiError::Internal
            })?;
        }
        Ok(Self {
            files_dir,
            meta_dir,
        })
    }

    /// Content and metadata paths for `name`. Names that could escape the
    /// storage root are rejected before touching the filesystem.
    fn paths(&self, name: &str) -> Result<(PathBuf, PathBuf), ApiError> {
        check_segment(name)?;
        Ok((
            self.files_dir.join(name),
            self.meta_dir.join(format!("{name}.json")),
        ))
    }
}

fn io_error(name: &str, err: std::io::Error) -> ApiError {
    if err.kind() == ErrorKind::NotFound {
        ApiError::NotFound(name.to_string())
    } else {
        tracing::error!("local storage I/O failure for {name}: {err}");
        ApiError::Internal
    }
}

#[async_trait]
impl Storage for LocalFileStorage {
    async fn put(&self, file: StoredFile) -> Result<(), ApiError> {
        let meta = FileMeta {
            content_type: file.content_type.to_string(),
        };
        let meta = serde_json::to_vec(&meta).map_err(|_| ApiError::Internal)?;
        let (file_path, meta_path) = self.paths(&file.name)?;

        fs::write(&meta_path, meta)
            .await
            .map_err(|e| io_error(&file.name, e))?;
        if let Err(e) = fs::write(&file_path, &file.content).await {
            let _ = fs::remove_file(&meta_path).await;
            return Err(io_error(&file.name, e));
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<StoredFile, ApiError> {
        let (file_path, meta_path) = self.paths(name)?;
        let content = fs::read(&file_path)
            .await
            .map_err(|e| io_error(name, e))?;

        let content_type = match fs::read(&meta_path).await {
            Ok(raw) => serde_json::from_slice::<FileMeta>(&raw)
                .ok()
                .and_then(|meta| meta.content_type.parse().ok())
                .unwrap_or(mime::APPLICATION_OCTET_STREAM),
            Err(_) => mime::APPLICATION_OCTET_STREAM,
        };

        Ok(StoredFile {
            name: name.to_string(),
            content: Bytes::from(content),
            content_type,
        })
    }

    async fn list(&self) -> Result<Vec<String>, ApiError> {
        let mut entries = fs::read_dir(&self.files_dir)
            .await
            .map_err(|_| ApiError::Internal)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|_| ApiError::Internal)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        let (file_path, meta_path) = self.paths(name)?;
        fs::remove_file(&file_path)
            .await
            .map_err(|e| io_error(name, e))?;

        let _ = fs::remove_file(&meta_path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_keeps_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).unwrap();

        storage
            .put(StoredFile {
                name: "scan.pdf".into(),
                content: Bytes::from_static(b"%PDF-1.7"),
                content_type: mime::APPLICATION_PDF,
            })
            .await
            .unwrap();

        let file = storage.get("scan.pdf").await.unwrap();
        assert_eq!(file.content, "%PDF-1.7");
        assert_eq!(file.content_type, mime::APPLICATION_PDF);
        assert_eq!(storage.list().await.unwrap(), vec!["scan.pdf".to_string()]);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).unwrap();

        storage
            .put(StoredFile {
                name: "a.txt".into(),
                content: Bytes::from_static(b"hi"),
                content_type: mime::TEXT_PLAIN,
            })
            .await
            .unwrap();
        storage.delete("a.txt").await.unwrap();

        assert!(matches!(storage.get("a.txt").await, Err(ApiError::NotFound(_))));
        assert!(matches!(storage.delete("a.txt").await, Err(ApiError::NotFound(_))));
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn names_outside_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "TOP SECRET").unwrap();
        let storage = LocalFileStorage::new(&dir.path().join("store")).unwrap();

        for name in ["../../secret.txt", "..", "nested/a.txt", "..\\secret.txt"] {
            assert!(
                matches!(storage.get(name).await, Err(ApiError::BadRequest(_))),
                "get {name:?} should be rejected"
            );
            assert!(
                matches!(storage.delete(name).await, Err(ApiError::BadRequest(_))),
                "delete {name:?} should be rejected"
            );
        }
        assert_eq!(std::fs::read_to_string(&secret).unwrap(), "TOP SECRET");
    }

    #[tokio::test]
    async fn failed_content_write_leaves_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).unwrap();
        // A directory in the way makes the content write fail.
        std::fs::create_dir(dir.path().join("files").join("a.txt")).unwrap();

        let result = storage
            .put(StoredFile {
                name: "a.txt".into(),
                content: Bytes::from_static(b"hi"),
                content_type: mime::TEXT_PLAIN,
            })
            .await;

        assert!(matches!(result, Err(ApiError::Internal)));
        assert!(!dir.path().join("meta").join("a.txt.json").exists());
    }
}

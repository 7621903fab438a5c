use std::{net::SocketAddr, process, sync::Arc};

use config::{AppConfig, ConfigError, StorageBackend};
use handlers::AppState;
use storage::{DriveStorage, InMemoryStorage, LocalFileStorage, Storage};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use validation::UploadPolicy;

mod config;
mod errors;
mod handlers;
mod storage;
mod validation;

use errors::ApiError;

/// Failures that stop the process before or while serving.
#[derive(Error, Debug)]
enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to initialize {backend} storage: {source}")]
    Storage {
        backend: &'static str,
        source: ApiError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

fn build_storage(config: &AppConfig) -> Result<Arc<dyn Storage>, StartupError> {
    let storage: Arc<dyn Storage> = match config.backend {
        StorageBackend::Drive => {
            let drive = config
                .drive
                .as_ref()
                .ok_or(ConfigError::Missing("DRIVE_PROJECT_KEY"))?;
            tracing::info!(drive = %drive.project_name, "using hosted drive storage");
            Arc::new(DriveStorage::new(drive).map_err(|source| StartupError::Storage {
                backend: "drive",
                source,
            })?)
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, files are lost on restart");
            Arc::new(InMemoryStorage::new())
        }
        StorageBackend::Local => {
            tracing::info!(path = %config.storage_path.display(), "using local storage");
            Arc::new(
                LocalFileStorage::new(&config.storage_path).map_err(|source| {
                    StartupError::Storage {
                        backend: "local",
                        source,
                    }
                })?,
            )
        }
    };
    Ok(storage)
}

async fn run() -> Result<(), StartupError> {
    let config = AppConfig::from_env()?;
    let storage = build_storage(&config)?;

    let state = AppState {
        storage,
        policy: Arc::new(UploadPolicy::new(
            config.allowed_extensions.iter().cloned(),
            config.max_upload_bytes,
        )),
    };

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!("Server running on {}", addr);

    axum::serve(listener, app).await.map_err(StartupError::Serve)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drive_gateway=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn memory_config() -> AppConfig {
        AppConfig::from_lookup(|key| (key == "STORAGE_BACKEND").then(|| "memory".to_string()))
            .unwrap()
    }

    #[test]
    fn drive_backend_without_drive_config_is_config_error() {
        let config = AppConfig {
            backend: StorageBackend::Drive,
            ..memory_config()
        };

        let err = build_storage(&config).err().unwrap();
        assert!(matches!(
            err,
            StartupError::Config(ConfigError::Missing("DRIVE_PROJECT_KEY"))
        ));
        assert_eq!(
            err.to_string(),
            "invalid configuration: DRIVE_PROJECT_KEY must be set"
        );
    }

    #[test]
    fn unusable_local_root_names_backend() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let config = AppConfig {
            backend: StorageBackend::Local,
            storage_path: PathBuf::from(&blocker),
            ..memory_config()
        };

        let err = build_storage(&config).err().unwrap();
        assert!(err.to_string().starts_with("failed to initialize local storage"));
    }

    #[test]
    fn memory_backend_builds() {
        assert!(build_storage(&memory_config()).is_ok());
    }
}

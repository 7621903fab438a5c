use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;

pub const DEFAULT_DRIVE_API_URL: &str = "https://drive.deta.sh/v1";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] =
    &["txt", "pdf", "png", "jpg", "jpeg", "gif", "doc", "docx"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Drive,
    Memory,
    Local,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drive" => Ok(StorageBackend::Drive),
            "memory" => Ok(StorageBackend::Memory),
            "local" => Ok(StorageBackend::Local),
            _ => Err(()),
        }
    }
}

/// Credentials and location of the hosted Drive.
#[derive(Clone)]
pub struct DriveConfig {
    pub project_key: String,
    pub project_name: String,
    pub api_url: String,
}

impl DriveConfig {
    /// The key's prefix up to the first `_`.
    pub fn project_id(&self) -> Option<&str> {
        self.project_key
            .split_once('_')
            .map(|(id, _)| id)
            .filter(|id| !id.is_empty())
    }
}

impl std::fmt::Debug for DriveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveConfig")
            .field("project_key", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: StorageBackend,
    /// Present whenever `backend` is [`StorageBackend::Drive`].
    pub drive: Option<DriveConfig>,
    pub storage_path: PathBuf,
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("STORAGE_BACKEND") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "STORAGE_BACKEND",
                value,
            })?,
            None => StorageBackend::Drive,
        };

        let drive = if backend == StorageBackend::Drive {
            let project_key = lookup("DRIVE_PROJECT_KEY")
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing("DRIVE_PROJECT_KEY"))?;
            let project_name = lookup("DRIVE_PROJECT_NAME")
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing("DRIVE_PROJECT_NAME"))?;
            let drive = DriveConfig {
                project_key,
                project_name,
                api_url: lookup("DRIVE_API_URL")
                    .unwrap_or_else(|| DEFAULT_DRIVE_API_URL.to_string()),
            };
            if drive.project_id().is_none() {
                return Err(ConfigError::Invalid {
                    var: "DRIVE_PROJECT_KEY",
                    value: "<redacted>".to_string(),
                });
            }
            Some(drive)
        } else {
            None
        };

        let port = parse_or("PORT", lookup("PORT"), 8080)?;
        let max_upload_bytes =
            parse_or("MAX_UPLOAD_BYTES", lookup("MAX_UPLOAD_BYTES"), DEFAULT_MAX_UPLOAD_BYTES)?;

        let allowed_extensions = match lookup("ALLOWED_EXTENSIONS") {
            Some(raw) => {
                let list: Vec<String> = raw
                    .split(',')
                    .map(|ext| ext.trim().trim_start_matches('.').to_string())
                    .filter(|ext| !ext.is_empty())
                    .collect();
                if list.is_empty() {
                    return Err(ConfigError::Invalid {
                        var: "ALLOWED_EXTENSIONS",
                        value: raw,
                    });
                }
                list
            }
            None => DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            backend,
            drive,
            storage_path: PathBuf::from(
                lookup("STORAGE_PATH").unwrap_or_else(|| "./uploads".to_string()),
            ),
            max_upload_bytes,
            allowed_extensions,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::Invalid {
            var: "HOST",
            value: addr,
        })
    }
}

fn parse_or<T: FromStr>(
    var: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

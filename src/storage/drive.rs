//! Client for the hosted Drive blob API.
//!
//! Every request is authenticated with the project key in `X-API-Key` and
//! addressed to `{api_url}/{project_id}/{drive_name}`, where the project id is
//! the key's prefix up to the first `_`.

use super::*;
use crate::config::DriveConfig;
use reqwest::{Client, Response, StatusCode, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Payloads above this size go through the multipart-upload endpoints.
const UPLOAD_CHUNK_SIZE: usize = 10 * 1024 * 1024;
const LIST_PAGE_LIMIT: u32 = 1000;

pub struct DriveStorage {
    client: Client,
    base_url: String,
    project_key: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    last: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartUploadResponse {
    upload_id: String,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    names: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    failed: HashMap<String, String>,
}

impl DriveStorage {
    pub fn new(config: &DriveConfig) -> Result<Self, ApiError> {
        let project_id = config.project_id().ok_or_else(|| {
            tracing::error!("drive project key is malformed");
            ApiError::Internal
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Upstream(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/{}/{}",
                config.api_url.trim_end_matches('/'),
                project_id,
                config.project_name
            ),
            project_key: config.project_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        request
            .header("X-API-Key", &self.project_key)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("drive request failed: {e}")))
    }

    /// Turns any non-2xx response into [`ApiError::Upstream`].
    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Upstream(format!("drive returned {status}: {body}")))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("failed to parse drive response: {e}")))
    }

    /// Collects every name matching `prefix`, following the paging cursor.
    async fn list_names(&self, prefix: Option<&str>) -> Result<Vec<String>, ApiError> {
        let mut names = Vec::new();
        let mut last: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![("limit", LIST_PAGE_LIMIT.to_string())];
            if let Some(prefix) = prefix {
                query.push(("prefix", prefix.to_string()));
            }
            if let Some(cursor) = &last {
                query.push(("last", cursor.clone()));
            }

            let response = self
                .send(self.client.get(self.url("/files")).query(&query))
                .await?;
            let page: ListResponse = Self::json(Self::ensure_success(response).await?).await?;
            debug!(count = page.names.len(), "fetched drive listing page");
            names.extend(page.names);

            match page.paging.and_then(|p| p.last) {
                Some(cursor) if !cursor.is_empty() => last = Some(cursor),
                _ => break,
            }
        }

        Ok(names)
    }

    async fn put_chunked(&self, file: &StoredFile) -> Result<(), ApiError> {
        let response = self
            .send(
                self.client
                    .post(self.url("/uploads"))
                    .query(&[("name", file.name.as_str())]),
            )
            .await?;
        let upload: StartUploadResponse =
            Self::json(Self::ensure_success(response).await?).await?;
        let upload_path = format!("/uploads/{}", upload.upload_id);

        // Once opened, the upload is either finished or aborted.
        if let Err(err) = self.send_parts_and_finish(file, &upload_path).await {
            warn!(name = %file.name, "aborting drive upload: {err}");
            self.abort_upload(file, &upload_path).await;
            return Err(err);
        }
        Ok(())
    }

    async fn send_parts_and_finish(
        &self,
        file: &StoredFile,
        upload_path: &str,
    ) -> Result<(), ApiError> {
        for (index, chunk) in file.content.chunks(UPLOAD_CHUNK_SIZE).enumerate() {
            let part = (index + 1).to_string();
            let response = self
                .send(
                    self.client
                        .post(self.url(&format!("{upload_path}/parts")))
                        .query(&[("name", file.name.as_str()), ("part", part.as_str())])
                        .header(CONTENT_TYPE, file.content_type.as_ref())
                        .body(file.content.slice_ref(chunk)),
                )
                .await?;
            Self::ensure_success(response).await?;
        }

        let response = self
            .send(
                self.client
                    .patch(self.url(upload_path))
                    .query(&[("name", file.name.as_str())]),
            )
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn abort_upload(&self, file: &StoredFile, upload_path: &str) {
        let abort = self
            .send(
                self.client
                    .delete(self.url(upload_path))
                    .query(&[("name", file.name.as_str())]),
            )
            .await;
        let abort = match abort {
            Ok(response) => Self::ensure_success(response).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(abort_err) = abort {
            warn!("failed to abort drive upload: {abort_err}");
        }
    }
}

#[async_trait]
impl Storage for DriveStorage {
    async fn put(&self, file: StoredFile) -> Result<(), ApiError> {
        if file.content.len() > UPLOAD_CHUNK_SIZE {
            return self.put_chunked(&file).await;
        }

        let response = self
            .send(
                self.client
                    .post(self.url("/files"))
                    .query(&[("name", file.name.as_str())])
                    .header(CONTENT_TYPE, file.content_type.as_ref())
                    .body(file.content.clone()),
            )
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<StoredFile, ApiError> {
        let response = self
            .send(
                self.client
                    .get(self.url("/files/download"))
                    .query(&[("name", name)]),
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(name.to_string()));
        }
        let response = Self::ensure_success(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        let content = response
            .bytes()
            .await
            .map_err(|e| ApiError::Upstream(format!("failed to read drive content: {e}")))?;

        Ok(StoredFile {
            name: name.to_string(),
            content,
            content_type,
        })
    }

    async fn list(&self) -> Result<Vec<String>, ApiError> {
        self.list_names(None).await
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        // The Drive reports unknown names as deleted, so check first.
        let existing = self.list_names(Some(name)).await?;
        if !existing.iter().any(|n| n == name) {
            return Err(ApiError::NotFound(name.to_string()));
        }

        let response = self
            .send(
                self.client
                    .delete(self.url("/files"))
                    .json(&DeleteRequest { names: [name] }),
            )
            .await?;
        let result: DeleteResponse = Self::json(Self::ensure_success(response).await?).await?;

        if let Some(reason) = result.failed.get(name) {
            return Err(ApiError::Upstream(format!("drive failed to delete {name}: {reason}")));
        }
        Ok(())
    }
}

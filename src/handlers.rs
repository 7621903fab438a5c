use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, multipart::MultipartError},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use headers::{ContentType, HeaderMapExt};
use http::{HeaderValue, StatusCode, header};
use mime::Mime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ApiError;
use crate::storage::{Storage, StoredFile};
use crate::validation::UploadPolicy;

/// Room for multipart boundaries and part headers on top of the file limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub policy: Arc<UploadPolicy>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    pub filename: String,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.policy.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/uploadfile/", post(upload))
        .route("/uploadfile", post(upload))
        .route("/files/", get(list_files))
        .route("/files", get(list_files))
        .route("/files/{filename}", get(download).delete(delete_file));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(api.clone())
        .nest("/cdn/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(state))
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<html>
  <head><title>Drive Gateway</title></head>
  <body style="font-family: sans-serif; text-align: center">
    <h1>Welcome!</h1>
    <p>Upload with <code>POST /uploadfile/</code>, browse with <code>GET /files/</code>.</p>
  </body>
</html>"#,
    )
}

async fn health() -> String {
    format!("OK\nAPI Version: {}", env!("CARGO_PKG_VERSION"))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

async fn upload(
    Extension(state): Extension<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("file part has no filename".to_string()))?;
        state.policy.check_name(&filename)?;

        let content_type: Mime = match field.content_type() {
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid content type: {raw}")))?,
            None => mime::APPLICATION_OCTET_STREAM,
        };

        let content = field.bytes().await.map_err(multipart_error)?;
        state.policy.check_size(content.len())?;
        let size = content.len();

        state
            .storage
            .put(StoredFile {
                name: filename.clone(),
                content,
                content_type: content_type.clone(),
            })
            .await?;

        info!(filename = %filename, size, "file uploaded");

        return Ok(Json(UploadResponse {
            filename,
            content_type: content_type.to_string(),
        }));
    }

    Err(ApiError::BadRequest("missing `file` field".to_string()))
}

async fn download(
    Path(filename): Path<String>,
    Extension(state): Extension<AppState>,
) -> Result<Response, ApiError> {
    let file = state.storage.get(&filename).await?;

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename.replace('"', "\\\"")))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let mut response = file.content.into_response();
    response
        .headers_mut()
        .typed_insert(ContentType::from(file.content_type));
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);

    Ok(response)
}

async fn list_files(Extension(state): Extension<AppState>) -> Result<Json<ListResponse>, ApiError> {
    let names = state.storage.list().await?;
    info!(count = names.len(), "file list retrieved");
    Ok(Json(ListResponse { names }))
}

async fn delete_file(
    Path(filename): Path<String>,
    Extension(state): Extension<AppState>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.storage.delete(&filename).await?;
    info!(filename = %filename, "file deleted");
    Ok(Json(DeleteResponse {
        message: "File deleted successfully".to_string(),
        filename,
    }))
}

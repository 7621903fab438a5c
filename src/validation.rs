use std::collections::HashSet;

use crate::errors::ApiError;

/// Write-path rules applied to every upload. Reads, listing and deletes are
/// never checked against it.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_extensions: HashSet<String>,
    max_upload_bytes: usize,
}

impl UploadPolicy {
    pub fn new<I, S>(allowed_extensions: I, max_upload_bytes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_extensions: allowed_extensions.into_iter().map(Into::into).collect(),
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Checks a client-supplied filename. Extension matching is case-sensitive.
    pub fn check_name(&self, name: &str) -> Result<(), ApiError> {
        check_segment(name)?;

        let ext = extension(name);
        if !self.allowed_extensions.contains(ext) {
            return Err(ApiError::UnsupportedMediaType(ext.to_string()));
        }
        Ok(())
    }

    pub fn check_size(&self, len: usize) -> Result<(), ApiError> {
        if len > self.max_upload_bytes {
            return Err(ApiError::PayloadTooLarge);
        }
        Ok(())
    }
}

/// Rejects names that are not usable as a single path segment.
pub fn check_segment(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ApiError::BadRequest(format!("invalid filename: {name:?}")));
    }
    Ok(())
}

/// Text after the last `.`, or `""` when there is none.
pub fn extension(name: &str) -> &str {
    name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

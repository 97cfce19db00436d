// File storage service for media uploads

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Upload types accepted by the media endpoint, as (mime, extension) pairs.
const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("application/pdf", "pdf"),
];

/// Handle returned for a stored upload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub stored_name: String,
    pub file_path: String,
    pub file_url: String,
    pub file_size: i64,
    pub mime_type: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

pub struct StorageService {
    base_path: PathBuf,
    public_base_url: String,
    max_file_size: usize,
}

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: impl Into<String>, max_file_size: usize) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
            max_file_size,
        }
    }

    pub fn from_config() -> Self {
        let cfg = crate::config::config();
        Self::new(
            &cfg.upload.dir,
            &cfg.server.public_base_url,
            cfg.upload.max_file_size_bytes,
        )
    }

    pub async fn init(&self) -> ApiResult<()> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            ApiError::internal_server_error(format!("Failed to create upload directory: {}", e))
        })?;
        Ok(())
    }

    /// Validate content type and size against the allowlist and ceiling.
    pub fn validate(&self, mime_type: &str, size: usize) -> ApiResult<&'static str> {
        if size == 0 {
            return Err(ApiError::bad_request("Empty file"));
        }
        if size > self.max_file_size {
            return Err(ApiError::bad_request(format!(
                "File exceeds the {} byte limit",
                self.max_file_size
            )));
        }
        ALLOWED_TYPES
            .iter()
            .find(|(mime, _)| *mime == mime_type)
            .map(|(_, ext)| *ext)
            .ok_or_else(|| ApiError::bad_request(format!("Unsupported file type: {}", mime_type)))
    }

    /// Store validated bytes under a collision-free generated name.
    pub async fn store(&self, mime_type: &str, data: &[u8]) -> ApiResult<StoredFile> {
        let ext = self.validate(mime_type, data.len())?;
        let stored_name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.base_path.join(&stored_name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ApiError::internal_server_error(format!("Failed to create directories: {}", e))
            })?;
        }

        fs::write(&path, data).await.map_err(|e| {
            ApiError::internal_server_error(format!("Failed to write file: {}", e))
        })?;

        let (width, height) = probe_dimensions(mime_type, data);
        let file_path = path.to_string_lossy().to_string();
        let file_url = format!(
            "{}/uploads/{}",
            self.public_base_url.trim_end_matches('/'),
            stored_name
        );

        tracing::info!("stored upload {} ({} bytes)", stored_name, data.len());
        Ok(StoredFile {
            stored_name,
            file_path,
            file_url,
            file_size: data.len() as i64,
            mime_type: mime_type.to_string(),
            width,
            height,
        })
    }

    /// Remove a stored file; missing files are ignored.
    pub async fn remove(&self, stored_name: &str) -> ApiResult<()> {
        // Stored names are generated server-side, but never follow a path
        let name = Path::new(stored_name)
            .file_name()
            .ok_or_else(|| ApiError::bad_request("Invalid stored name"))?;
        let path = self.base_path.join(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::internal_server_error(format!(
                "Failed to delete file: {}",
                e
            ))),
        }
    }
}

/// Best-effort dimension probe from file headers. PNG and GIF carry their
/// dimensions at fixed offsets; other formats report None.
fn probe_dimensions(mime_type: &str, data: &[u8]) -> (Option<i32>, Option<i32>) {
    match mime_type {
        "image/png" if data.len() >= 24 && data.starts_with(b"\x89PNG\r\n\x1a\n") => {
            let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
            let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            (Some(width as i32), Some(height as i32))
        }
        "image/gif" if data.len() >= 10 && (data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) => {
            let width = u16::from_le_bytes([data[6], data[7]]);
            let height = u16::from_le_bytes([data[8], data[9]]);
            (Some(width as i32), Some(height as i32))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> StorageService {
        StorageService::new("/tmp/blog-api-test-uploads", "http://localhost:3000", 1024)
    }

    #[test]
    fn test_validate_rejects_oversized_and_empty() {
        let svc = service();
        assert!(svc.validate("image/png", 0).is_err());
        assert!(svc.validate("image/png", 2048).is_err());
        assert_eq!(svc.validate("image/png", 512).unwrap(), "png");
    }

    #[test]
    fn test_validate_rejects_unknown_mime() {
        let svc = service();
        assert!(svc.validate("application/x-msdownload", 10).is_err());
        assert!(svc.validate("image/jpeg", 10).is_ok());
    }

    #[test]
    fn test_probe_png_dimensions() {
        // Minimal PNG header: signature + IHDR length/type + 2x3 dimensions
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(&[0, 0, 0, 13]);
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&3u32.to_be_bytes());
        assert_eq!(probe_dimensions("image/png", &data), (Some(2), Some(3)));
    }

    #[test]
    fn test_probe_gif_dimensions() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&640u16.to_le_bytes());
        data.extend_from_slice(&480u16.to_le_bytes());
        assert_eq!(probe_dimensions("image/gif", &data), (Some(640), Some(480)));
    }

    #[test]
    fn test_probe_unknown_format_is_none() {
        assert_eq!(probe_dimensions("application/pdf", b"%PDF-1.7"), (None, None));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'media' table. usage_count is a reference counter;
/// a row is only deletable while it is zero.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Media {
    pub id: i64,
    pub filename: String,
    pub stored_name: String,
    pub file_path: String,
    pub file_url: String,
    pub file_size: i64,
    pub mime_type: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub uploader_id: i64,
    pub usage_count: i32,
    pub storage_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MediaListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Substring match over the original filename.
    pub keyword: Option<String>,
    pub mime_type: Option<String>,
}

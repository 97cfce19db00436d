use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'comments' table. parent_id must reference a top-level
/// comment; reply depth is capped at one level in the handlers.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Comment {
    pub id: i64,
    pub article_id: i64,
    pub user_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub nickname: String,
    pub email: Option<String>,
    pub content: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommentRequest {
    /// Required for anonymous callers; authenticated callers fall back to
    /// their username when omitted.
    #[validate(length(min = 1, max = 50, message = "Nickname must be 1-50 characters"))]
    pub nickname: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 1000, message = "Content must be 1-1000 characters"))]
    pub content: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CommentListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

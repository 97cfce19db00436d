use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "moment_visibility", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Friends,
}

/// Represents the 'moments' table (microblog posts).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Moment {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    /// Ordered image URLs, at most nine.
    pub images: Json<Vec<String>>,
    pub location: Option<String>,
    pub visibility: Visibility,
    pub is_pinned: bool,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMomentRequest {
    #[validate(length(min = 1, max = 2000, message = "Content must be 1-2000 characters"))]
    pub content: String,
    #[validate(length(max = 9, message = "At most 9 images are allowed"))]
    #[serde(default)]
    pub images: Vec<String>,
    pub location: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMomentRequest {
    #[validate(length(min = 1, max = 2000, message = "Content must be 1-2000 characters"))]
    pub content: Option<String>,
    #[validate(length(max = 9, message = "At most 9 images are allowed"))]
    pub images: Option<Vec<String>>,
    pub location: Option<String>,
    pub visibility: Option<Visibility>,
    pub is_pinned: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MomentListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub visibility: Option<Visibility>,
    pub keyword: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(images: Vec<String>) -> CreateMomentRequest {
        CreateMomentRequest {
            content: "hello".to_string(),
            images,
            location: None,
            visibility: None,
        }
    }

    #[test]
    fn test_at_most_nine_images() {
        assert!(request(vec![]).validate().is_ok());
        assert!(request(vec!["u".to_string(); 9]).validate().is_ok());
        assert!(request(vec!["u".to_string(); 10]).validate().is_err());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::tag::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "article_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Draft,
    Published,
}

/// Represents the 'articles' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub summary: Option<String>,
    pub content: String,
    pub cover_image: Option<String>,
    pub author_id: i64,
    pub category_id: Option<i64>,
    pub status: ArticleStatus,
    pub views: i64,
    pub is_top: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Article plus its tag associations, returned by get-by-id.
#[derive(Debug, Serialize)]
pub struct ArticleDetail {
    #[serde(flatten)]
    pub article: Article,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateArticleRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[validate(length(max = 500, message = "Summary must be at most 500 characters"))]
    pub summary: Option<String>,
    #[validate(length(min = 1, message = "Content is required"))]
    pub content: String,
    pub cover_image: Option<String>,
    pub category_id: Option<i64>,
    pub status: Option<ArticleStatus>,
    #[serde(default)]
    pub tag_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateArticleRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 500, message = "Summary must be at most 500 characters"))]
    pub summary: Option<String>,
    pub content: Option<String>,
    pub cover_image: Option<String>,
    pub category_id: Option<i64>,
    pub status: Option<ArticleStatus>,
    pub is_top: Option<bool>,
    pub tag_ids: Option<Vec<i64>>,
}

/// Typed list-filter criteria, translated to SQL at the query boundary.
#[derive(Debug, Deserialize, Default)]
pub struct ArticleListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<ArticleStatus>,
    pub category_id: Option<i64>,
    pub tag_id: Option<i64>,
    /// Substring match over title and summary.
    pub keyword: Option<String>,
}

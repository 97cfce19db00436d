use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Web,
    Mobile,
    Desktop,
    Backend,
    Fullstack,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Completed,
    InProgress,
    Archived,
    Draft,
}

/// Represents the 'projects' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: String,
    pub content: Option<String>,
    pub cover_image: Option<String>,
    pub images: Json<Vec<String>>,
    pub demo_video: Option<String>,
    pub tech_stack: Json<Vec<String>>,
    pub project_type: ProjectType,
    pub status: ProjectStatus,
    pub github_url: Option<String>,
    pub demo_url: Option<String>,
    pub documentation_url: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration: Option<String>,
    pub team_size: Option<i32>,
    pub is_featured: bool,
    pub is_open_source: bool,
    pub display_order: i32,
    pub view_count: i64,
    pub author_id: i64,
    pub category: Option<String>,
    pub tags: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[validate(length(max = 200, message = "Subtitle must be at most 200 characters"))]
    pub subtitle: Option<String>,
    #[validate(length(min = 1, max = 2000, message = "Description must be 1-2000 characters"))]
    pub description: String,
    pub content: Option<String>,
    pub cover_image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub demo_video: Option<String>,
    #[validate(length(min = 1, message = "Tech stack must not be empty"))]
    pub tech_stack: Vec<String>,
    pub project_type: ProjectType,
    pub status: Option<ProjectStatus>,
    #[validate(url(message = "Invalid GitHub URL"))]
    pub github_url: Option<String>,
    #[validate(url(message = "Invalid demo URL"))]
    pub demo_url: Option<String>,
    #[validate(url(message = "Invalid documentation URL"))]
    pub documentation_url: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration: Option<String>,
    pub team_size: Option<i32>,
    pub is_open_source: Option<bool>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProjectRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 200, message = "Subtitle must be at most 200 characters"))]
    pub subtitle: Option<String>,
    #[validate(length(min = 1, max = 2000, message = "Description must be 1-2000 characters"))]
    pub description: Option<String>,
    pub content: Option<String>,
    pub cover_image: Option<String>,
    pub images: Option<Vec<String>>,
    pub demo_video: Option<String>,
    #[validate(length(min = 1, message = "Tech stack must not be empty"))]
    pub tech_stack: Option<Vec<String>>,
    pub project_type: Option<ProjectType>,
    pub status: Option<ProjectStatus>,
    #[validate(url(message = "Invalid GitHub URL"))]
    pub github_url: Option<String>,
    #[validate(url(message = "Invalid demo URL"))]
    pub demo_url: Option<String>,
    #[validate(url(message = "Invalid documentation URL"))]
    pub documentation_url: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration: Option<String>,
    pub team_size: Option<i32>,
    pub is_open_source: Option<bool>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<ProjectStatus>,
    pub project_type: Option<ProjectType>,
    pub is_featured: Option<bool>,
    /// Substring match over title, subtitle and description.
    pub keyword: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tech_stack: Vec<String>) -> CreateProjectRequest {
        CreateProjectRequest {
            title: "Static site generator".to_string(),
            subtitle: None,
            description: "A small static site generator".to_string(),
            content: None,
            cover_image: None,
            images: vec![],
            demo_video: None,
            tech_stack,
            project_type: ProjectType::Web,
            status: None,
            github_url: None,
            demo_url: None,
            documentation_url: None,
            start_date: None,
            end_date: None,
            duration: None,
            team_size: None,
            is_open_source: None,
            category: None,
            tags: vec![],
        }
    }

    #[test]
    fn test_tech_stack_must_not_be_empty() {
        assert!(request(vec!["rust".to_string()]).validate().is_ok());
        assert!(request(vec![]).validate().is_err());
    }

    #[test]
    fn test_github_url_must_parse_as_url() {
        let mut req = request(vec!["rust".to_string()]);
        req.github_url = Some("https://github.com/someone/site".to_string());
        assert!(req.validate().is_ok());
        req.github_url = Some("not a url".to_string());
        assert!(req.validate().is_err());
    }
}

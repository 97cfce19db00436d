use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::json;

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Wrapper that renders the uniform envelope { code, message, data }.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub message: String,
    pub status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 OK with the default message
    pub fn ok(data: T) -> Self {
        Self {
            data,
            message: "success".to_string(),
            status: StatusCode::OK,
        }
    }

    /// 201 Created
    pub fn created(data: T) -> Self {
        Self {
            data,
            message: "created".to_string(),
            status: StatusCode::CREATED,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let data_value = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "code": 500,
                        "message": "Failed to serialize response data",
                        "data": null,
                    })),
                )
                    .into_response();
            }
        };

        let envelope = json!({
            "code": self.status.as_u16(),
            "message": self.message,
            "data": data_value,
        });

        (self.status, Json(envelope)).into_response()
    }
}

/// Normalize caller-supplied pagination: page defaults to 1 and is floored
/// at 1, limit defaults to 10 and is clamped to 1..=100.
pub fn page_params(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    (page, limit)
}

/// Paginated list payload. Serializes the item array under both "items"
/// and the resource name, plus page/limit/total/totalPages.
#[derive(Debug)]
pub struct Page<T: Serialize> {
    pub resource: &'static str,
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

impl<T: Serialize> Page<T> {
    pub fn new(resource: &'static str, items: Vec<T>, page: i64, limit: i64, total: i64) -> Self {
        Self {
            resource,
            items,
            page,
            limit,
            total,
        }
    }

    pub fn total_pages(&self) -> i64 {
        if self.limit <= 0 {
            return 0;
        }
        (self.total + self.limit - 1) / self.limit
    }
}

impl<T: Serialize> Serialize for Page<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry(self.resource, &self.items)?;
        map.serialize_entry("items", &self.items)?;
        map.serialize_entry("page", &self.page)?;
        map.serialize_entry("limit", &self.limit)?;
        map.serialize_entry("total", &self.total)?;
        map.serialize_entry("totalPages", &self.total_pages())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_params_defaults_and_bounds() {
        assert_eq!(page_params(None, None), (1, 10));
        assert_eq!(page_params(Some(0), Some(0)), (1, 1));
        assert_eq!(page_params(Some(-3), Some(500)), (1, 100));
        assert_eq!(page_params(Some(7), Some(25)), (7, 25));
    }

    #[test]
    fn test_total_pages_is_ceiling_division() {
        let page = Page::new("articles", Vec::<i32>::new(), 1, 10, 0);
        assert_eq!(page.total_pages(), 0);
        let page = Page::new("articles", Vec::<i32>::new(), 1, 10, 10);
        assert_eq!(page.total_pages(), 1);
        let page = Page::new("articles", Vec::<i32>::new(), 1, 10, 11);
        assert_eq!(page.total_pages(), 2);
        let page = Page::new("articles", Vec::<i32>::new(), 1, 3, 7);
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn test_page_serializes_resource_alias() {
        let page = Page::new("tags", vec![1, 2, 3], 2, 3, 7);
        let v = serde_json::to_value(&page).expect("json");
        assert_eq!(v["tags"], v["items"]);
        assert_eq!(v["page"], 2);
        assert_eq!(v["limit"], 3);
        assert_eq!(v["total"], 7);
        assert_eq!(v["totalPages"], 3);
    }
}

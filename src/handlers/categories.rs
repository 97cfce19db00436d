use axum::{
    extract::{Path, State},
    Extension,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome, MergeRequest, UpdateOrdersRequest};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_admin, AuthUser};
use crate::models::category::{
    Category, CategoryWithCount, CreateCategoryRequest, UpdateCategoryRequest,
};

const WITH_COUNT: &str = "SELECT c.*, \
     (SELECT COUNT(*) FROM articles a WHERE a.category_id = c.id) AS article_count \
     FROM categories c";

#[derive(Debug, Deserialize, Default)]
pub struct CategoryListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /api/v1/categories
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<CategoryListQuery>,
) -> ApiResult<ApiResponse<Page<CategoryWithCount>>> {
    let (page, limit) = page_params(query.page, query.limit);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        "{} ORDER BY c.sort_order ASC, c.name ASC LIMIT $1 OFFSET $2",
        WITH_COUNT
    );
    let items = sqlx::query_as::<_, CategoryWithCount>(&sql)
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(Page::new(
        "categories",
        items,
        page,
        limit,
        total,
    )))
}

/// GET /api/v1/categories/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<CategoryWithCount>> {
    let sql = format!("{} WHERE c.id = $1", WITH_COUNT);
    let category = sqlx::query_as::<_, CategoryWithCount>(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;

    Ok(ApiResponse::ok(category))
}

/// POST /api/v1/categories (admin)
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateCategoryRequest>,
) -> ApiResult<ApiResponse<Category>> {
    require_admin(&auth)?;
    payload.validate()?;

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE name = $1")
        .bind(&payload.name)
        .fetch_one(&state.pool)
        .await?;
    if exists > 0 {
        return Err(ApiError::bad_request("Category name already exists"));
    }

    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (name, description, sort_order)
         VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.sort_order.unwrap_or(0))
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::created(category))
}

/// PUT /api/v1/categories/:id (admin)
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> ApiResult<ApiResponse<Category>> {
    require_admin(&auth)?;
    payload.validate()?;

    let category = sqlx::query_as::<_, Category>(
        "UPDATE categories
         SET name = COALESCE($1, name),
             description = COALESCE($2, description),
             sort_order = COALESCE($3, sort_order),
             updated_at = NOW()
         WHERE id = $4 RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.sort_order)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Category not found"))?;

    Ok(ApiResponse::ok(category))
}

async fn article_count(state: &AppState, id: i64) -> ApiResult<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE category_id = $1")
            .bind(id)
            .fetch_one(&state.pool)
            .await?,
    )
}

/// DELETE /api/v1/categories/:id (admin)
///
/// Blocked while any article still references the category; callers must
/// reassign or merge first.
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    require_admin(&auth)?;

    let existing = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;

    let dependents = article_count(&state, existing.id).await?;
    if dependents > 0 {
        return Err(ApiError::domain_error(format!(
            "Category still has {} article(s); reassign or merge first",
            dependents
        )));
    }

    sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

/// POST /api/v1/categories/batch-delete (admin)
///
/// A category that still has articles is reported as a per-item rejection,
/// not a failure of the whole batch.
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    require_admin(&auth)?;
    batch::validate_ids(&payload.ids)?;

    let sql = format!("{} WHERE c.id = ANY($1)", WITH_COUNT);
    let loaded = sqlx::query_as::<_, CategoryWithCount>(&sql)
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |c| c.id, |c| {
        if c.article_count > 0 {
            Err(format!("Category still has {} article(s)", c.article_count))
        } else {
            Ok(())
        }
    });

    let authorized_ids = part.authorized_ids(|c| c.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM categories WHERE id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

/// POST /api/v1/categories/merge (admin)
///
/// Re-points articles from the source categories to the target, then
/// deletes the sources. A second identical call finds no sources and
/// reports zero moved.
pub async fn merge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<MergeRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    require_admin(&auth)?;
    batch::validate_merge(&payload)?;

    let target = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1")
        .bind(payload.target_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Target category not found"))?;

    let mut tx = state.pool.begin().await?;

    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE category_id = $1")
        .bind(target.id)
        .fetch_one(&mut *tx)
        .await?;

    let moved = sqlx::query("UPDATE articles SET category_id = $1 WHERE category_id = ANY($2)")
        .bind(target.id)
        .bind(&payload.source_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let deleted = sqlx::query("DELETE FROM categories WHERE id = ANY($1)")
        .bind(&payload.source_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE category_id = $1")
        .bind(target.id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        "merged {} categories into {} ({} articles moved)",
        deleted,
        target.name,
        moved
    );
    Ok(ApiResponse::ok(serde_json::json!({
        "merged_categories": deleted,
        "articles_moved": moved,
        "target_article_count_before": before,
        "target_article_count_after": after,
    })))
}

/// POST /api/v1/categories/update-orders (admin)
pub async fn update_orders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<UpdateOrdersRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    require_admin(&auth)?;
    if payload.orders.is_empty() {
        return Err(ApiError::bad_request("orders must not be empty"));
    }

    let mut tx = state.pool.begin().await?;
    let mut updated = 0u64;
    for entry in &payload.orders {
        updated += sqlx::query(
            "UPDATE categories SET sort_order = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(entry.sort_order)
        .bind(entry.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;

    Ok(ApiResponse::ok(serde_json::json!({ "updated": updated })))
}

use axum::{
    extract::{Path, State},
    Extension,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome, MergeRequest};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_admin, AuthUser};
use crate::models::tag::{CreateTagRequest, Tag, TagWithCount, UpdateTagRequest};

const WITH_COUNT: &str = "SELECT t.*, \
     (SELECT COUNT(*) FROM article_tags j WHERE j.tag_id = t.id) AS article_count \
     FROM tags t";

#[derive(Debug, Deserialize, Default)]
pub struct TagListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub keyword: Option<String>,
}

/// GET /api/v1/tags
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<TagListQuery>,
) -> ApiResult<ApiResponse<Page<TagWithCount>>> {
    let (page, limit) = page_params(query.page, query.limit);
    let pattern = query.keyword.as_ref().map(|k| format!("%{}%", k));

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tags WHERE ($1::text IS NULL OR name ILIKE $1)",
    )
    .bind(&pattern)
    .fetch_one(&state.pool)
    .await?;

    let sql = format!(
        "{} WHERE ($1::text IS NULL OR t.name ILIKE $1)
         ORDER BY t.name ASC LIMIT $2 OFFSET $3",
        WITH_COUNT
    );
    let items = sqlx::query_as::<_, TagWithCount>(&sql)
        .bind(&pattern)
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(Page::new("tags", items, page, limit, total)))
}

/// GET /api/v1/tags/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<TagWithCount>> {
    let sql = format!("{} WHERE t.id = $1", WITH_COUNT);
    let tag = sqlx::query_as::<_, TagWithCount>(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Tag not found"))?;

    Ok(ApiResponse::ok(tag))
}

/// POST /api/v1/tags (admin)
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateTagRequest>,
) -> ApiResult<ApiResponse<Tag>> {
    require_admin(&auth)?;
    payload.validate()?;

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE name = $1")
        .bind(&payload.name)
        .fetch_one(&state.pool)
        .await?;
    if exists > 0 {
        return Err(ApiError::bad_request("Tag name already exists"));
    }

    let tag = sqlx::query_as::<_, Tag>(
        "INSERT INTO tags (name, color) VALUES ($1, $2) RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.color)
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::created(tag))
}

/// PUT /api/v1/tags/:id (admin)
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateTagRequest>,
) -> ApiResult<ApiResponse<Tag>> {
    require_admin(&auth)?;
    payload.validate()?;

    let tag = sqlx::query_as::<_, Tag>(
        "UPDATE tags
         SET name = COALESCE($1, name),
             color = COALESCE($2, color),
             updated_at = NOW()
         WHERE id = $3 RETURNING *",
    )
    .bind(&payload.name)
    .bind(&payload.color)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Tag not found"))?;

    Ok(ApiResponse::ok(tag))
}

/// DELETE /api/v1/tags/:id (admin)
///
/// Join rows cascade at the schema level.
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    require_admin(&auth)?;

    let deleted = sqlx::query("DELETE FROM tags WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::not_found("Tag not found"));
    }

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

/// POST /api/v1/tags/batch-delete (admin)
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    require_admin(&auth)?;
    batch::validate_ids(&payload.ids)?;

    let loaded = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = ANY($1)")
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |t| t.id, |_| Ok(()));

    let authorized_ids = part.authorized_ids(|t| t.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM tags WHERE id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

/// POST /api/v1/tags/merge (admin)
///
/// Re-points article_tags rows from each source tag to the target,
/// deduplicating where an article already carries the target, then deletes
/// the sources. Merging twice is a no-op the second time.
pub async fn merge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<MergeRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    require_admin(&auth)?;
    batch::validate_merge(&payload)?;

    let target = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = $1")
        .bind(payload.target_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Target tag not found"))?;

    let mut tx = state.pool.begin().await?;

    let before: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM article_tags WHERE tag_id = $1")
            .bind(target.id)
            .fetch_one(&mut *tx)
            .await?;

    // Dedup: an article already tagged with the target keeps a single row
    sqlx::query(
        "INSERT INTO article_tags (article_id, tag_id)
         SELECT DISTINCT article_id, $1 FROM article_tags WHERE tag_id = ANY($2)
         ON CONFLICT DO NOTHING",
    )
    .bind(target.id)
    .bind(&payload.source_ids)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM article_tags WHERE tag_id = ANY($1)")
        .bind(&payload.source_ids)
        .execute(&mut *tx)
        .await?;

    let deleted = sqlx::query("DELETE FROM tags WHERE id = ANY($1)")
        .bind(&payload.source_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let after: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM article_tags WHERE tag_id = $1")
            .bind(target.id)
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;

    tracing::info!(
        "merged {} tags into {} ({} -> {} dependents)",
        deleted,
        target.name,
        before,
        after
    );
    Ok(ApiResponse::ok(serde_json::json!({
        "merged_tags": deleted,
        "target_article_count_before": before,
        "target_article_count_after": after,
    })))
}

use axum::{
    extract::{Multipart, Path, State},
    Extension,
};
use sqlx::{Postgres, QueryBuilder};

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::media::{Media, MediaListQuery};
use crate::services::storage::StorageService;

fn push_filters(qb: &mut QueryBuilder<Postgres>, q: &MediaListQuery, viewer: &AuthUser) {
    qb.push(" WHERE 1=1");
    // Non-admin uploaders only see their own files
    if !viewer.is_admin() {
        qb.push(" AND uploader_id = ").push_bind(viewer.id);
    }
    if let Some(keyword) = &q.keyword {
        qb.push(" AND filename ILIKE ")
            .push_bind(format!("%{}%", keyword));
    }
    if let Some(mime_type) = &q.mime_type {
        qb.push(" AND mime_type = ").push_bind(mime_type.clone());
    }
}

/// GET /api/v1/media
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<MediaListQuery>,
) -> ApiResult<ApiResponse<Page<Media>>> {
    let (page, limit) = page_params(query.page, query.limit);

    let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM media");
    push_filters(&mut count_qb, &query, &auth);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.pool)
        .await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM media");
    push_filters(&mut qb, &query, &auth);
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind((page - 1) * limit);
    let items = qb.build_query_as::<Media>().fetch_all(&state.pool).await?;

    Ok(ApiResponse::ok(Page::new("media", items, page, limit, total)))
}

/// GET /api/v1/media/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<Media>> {
    let media = sqlx::query_as::<_, Media>("SELECT * FROM media WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Media not found"))?;

    if !auth.can_act(media.uploader_id) {
        return Err(ApiError::not_found("Media not found"));
    }

    Ok(ApiResponse::ok(media))
}

/// POST /api/v1/media/upload (multipart)
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<ApiResponse<Media>> {
    let storage = StorageService::from_config();
    storage.init().await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::bad_request("Missing filename"))?;
        let mime_type = field
            .content_type()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::bad_request("Missing content type"))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read file data: {}", e)))?;

        let stored = storage.store(&mime_type, &data).await?;

        let media = sqlx::query_as::<_, Media>(
            "INSERT INTO media (filename, stored_name, file_path, file_url, file_size,
                 mime_type, width, height, uploader_id, storage_type)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'local') RETURNING *",
        )
        .bind(&filename)
        .bind(&stored.stored_name)
        .bind(&stored.file_path)
        .bind(&stored.file_url)
        .bind(stored.file_size)
        .bind(&stored.mime_type)
        .bind(stored.width)
        .bind(stored.height)
        .bind(auth.id)
        .fetch_one(&state.pool)
        .await?;

        return Ok(ApiResponse::created(media));
    }

    Err(ApiError::bad_request("No 'file' field in upload"))
}

fn deletable(auth: &AuthUser, media: &Media) -> Result<(), String> {
    if !auth.can_act(media.uploader_id) {
        return Err("No permission".to_string());
    }
    if media.usage_count > 0 {
        return Err(format!("Media is referenced {} time(s)", media.usage_count));
    }
    Ok(())
}

/// DELETE /api/v1/media/:id
///
/// Blocked while the file is still referenced (usage_count > 0).
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let media = sqlx::query_as::<_, Media>("SELECT * FROM media WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Media not found"))?;

    if !auth.can_act(media.uploader_id) {
        return Err(ApiError::forbidden("Not the uploader of this file"));
    }
    if media.usage_count > 0 {
        return Err(ApiError::domain_error(format!(
            "Media is referenced {} time(s); remove references first",
            media.usage_count
        )));
    }

    sqlx::query("DELETE FROM media WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    let storage = StorageService::from_config();
    storage.remove(&media.stored_name).await?;

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

/// POST /api/v1/media/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = sqlx::query_as::<_, Media>("SELECT * FROM media WHERE id = ANY($1)")
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |m| m.id, |m| deletable(&auth, m));

    let authorized_ids = part.authorized_ids(|m| m.id);
    if !authorized_ids.is_empty() {
        let stored_names: Vec<String> = part
            .authorized
            .iter()
            .map(|m| m.stored_name.clone())
            .collect();

        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM media WHERE id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        // Disk cleanup happens after the rows are gone; a leftover file is
        // preferable to a dangling row
        let storage = StorageService::from_config();
        for name in stored_names {
            if let Err(e) = storage.remove(&name).await {
                tracing::warn!("failed to remove stored file {}: {}", name, e.message());
            }
        }
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

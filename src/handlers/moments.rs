use axum::{
    extract::{Path, State},
    Extension,
};
use sqlx::types::Json as SqlJson;
use sqlx::{Postgres, QueryBuilder};
use validator::Validate;

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthUser, MaybeAuthUser};
use crate::models::moment::{
    CreateMomentRequest, Moment, MomentListQuery, UpdateMomentRequest, Visibility,
};

/// Visibility window: admins see everything, owners additionally see their
/// own private and friends posts, everyone else sees public only.
fn push_filters(qb: &mut QueryBuilder<Postgres>, q: &MomentListQuery, viewer: Option<&AuthUser>) {
    qb.push(" WHERE 1=1");
    match viewer {
        Some(u) if u.is_admin() => {}
        Some(u) => {
            qb.push(" AND (visibility = 'public' OR user_id = ")
                .push_bind(u.id)
                .push(")");
        }
        None => {
            qb.push(" AND visibility = 'public'");
        }
    }
    if let Some(visibility) = q.visibility {
        qb.push(" AND visibility = ").push_bind(visibility);
    }
    if let Some(keyword) = &q.keyword {
        qb.push(" AND content ILIKE ")
            .push_bind(format!("%{}%", keyword));
    }
}

/// GET /api/v1/moments
pub async fn list(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Query(query): Query<MomentListQuery>,
) -> ApiResult<ApiResponse<Page<Moment>>> {
    let (page, limit) = page_params(query.page, query.limit);

    let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM moments");
    push_filters(&mut count_qb, &query, viewer.as_ref());
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.pool)
        .await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM moments");
    push_filters(&mut qb, &query, viewer.as_ref());
    qb.push(" ORDER BY is_pinned DESC, published_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind((page - 1) * limit);
    let items = qb
        .build_query_as::<Moment>()
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(Page::new(
        "moments", items, page, limit, total,
    )))
}

fn visible_to(moment: &Moment, viewer: Option<&AuthUser>) -> bool {
    moment.visibility == Visibility::Public
        || viewer
            .map(|u| u.can_act(moment.user_id))
            .unwrap_or(false)
}

/// GET /api/v1/moments/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<Moment>> {
    let moment = sqlx::query_as::<_, Moment>("SELECT * FROM moments WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Moment not found"))?;

    // Hidden and missing are indistinguishable to the caller
    if !visible_to(&moment, viewer.as_ref()) {
        return Err(ApiError::not_found("Moment not found"));
    }

    Ok(ApiResponse::ok(moment))
}

/// POST /api/v1/moments
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateMomentRequest>,
) -> ApiResult<ApiResponse<Moment>> {
    payload.validate()?;

    let moment = sqlx::query_as::<_, Moment>(
        "INSERT INTO moments (user_id, content, images, location, visibility, published_at)
         VALUES ($1, $2, $3, $4, $5, NOW()) RETURNING *",
    )
    .bind(auth.id)
    .bind(&payload.content)
    .bind(SqlJson(payload.images.clone()))
    .bind(&payload.location)
    .bind(payload.visibility.unwrap_or(Visibility::Public))
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::created(moment))
}

/// PUT /api/v1/moments/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateMomentRequest>,
) -> ApiResult<ApiResponse<Moment>> {
    payload.validate()?;

    let existing = sqlx::query_as::<_, Moment>("SELECT * FROM moments WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Moment not found"))?;

    if !auth.can_act(existing.user_id) {
        return Err(ApiError::forbidden("Not the owner of this moment"));
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE moments SET updated_at = NOW()");
    if let Some(content) = &payload.content {
        qb.push(", content = ").push_bind(content.clone());
    }
    if let Some(images) = &payload.images {
        qb.push(", images = ").push_bind(SqlJson(images.clone()));
    }
    if let Some(location) = &payload.location {
        qb.push(", location = ").push_bind(location.clone());
    }
    if let Some(visibility) = payload.visibility {
        qb.push(", visibility = ").push_bind(visibility);
    }
    if let Some(is_pinned) = payload.is_pinned {
        qb.push(", is_pinned = ").push_bind(is_pinned);
    }
    qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

    let moment = qb
        .build_query_as::<Moment>()
        .fetch_one(&state.pool)
        .await?;

    Ok(ApiResponse::ok(moment))
}

/// DELETE /api/v1/moments/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let existing = sqlx::query_as::<_, Moment>("SELECT * FROM moments WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Moment not found"))?;

    if !auth.can_act(existing.user_id) {
        return Err(ApiError::forbidden("Not the owner of this moment"));
    }

    sqlx::query("DELETE FROM moments WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

/// POST /api/v1/moments/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = sqlx::query_as::<_, Moment>("SELECT * FROM moments WHERE id = ANY($1)")
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |m| m.id, |m| {
        if auth.can_act(m.user_id) {
            Ok(())
        } else {
            Err("No permission".to_string())
        }
    });

    let authorized_ids = part.authorized_ids(|m| m.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM moments WHERE id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

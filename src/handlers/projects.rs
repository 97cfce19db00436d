use axum::{
    extract::{Path, State},
    Extension,
};
use serde::Deserialize;
use sqlx::types::Json as SqlJson;
use sqlx::{Postgres, QueryBuilder};
use validator::Validate;

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome, UpdateOrdersRequest};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_admin, AuthUser, MaybeAuthUser};
use crate::models::project::{
    CreateProjectRequest, Project, ProjectListQuery, ProjectStatus, UpdateProjectRequest,
};

/// Non-owners and anonymous callers only see completed projects.
fn push_filters(qb: &mut QueryBuilder<Postgres>, q: &ProjectListQuery, viewer: Option<&AuthUser>) {
    qb.push(" WHERE 1=1");
    match viewer {
        Some(u) if u.is_admin() => {}
        Some(u) => {
            qb.push(" AND (status = 'completed' OR author_id = ")
                .push_bind(u.id)
                .push(")");
        }
        None => {
            qb.push(" AND status = 'completed'");
        }
    }
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(project_type) = q.project_type {
        qb.push(" AND project_type = ").push_bind(project_type);
    }
    if let Some(is_featured) = q.is_featured {
        qb.push(" AND is_featured = ").push_bind(is_featured);
    }
    if let Some(keyword) = &q.keyword {
        let pattern = format!("%{}%", keyword);
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR subtitle ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// GET /api/v1/projects
pub async fn list(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Query(query): Query<ProjectListQuery>,
) -> ApiResult<ApiResponse<Page<Project>>> {
    let (page, limit) = page_params(query.page, query.limit);

    let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM projects");
    push_filters(&mut count_qb, &query, viewer.as_ref());
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.pool)
        .await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM projects");
    push_filters(&mut qb, &query, viewer.as_ref());
    qb.push(" ORDER BY is_featured DESC, display_order ASC, created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind((page - 1) * limit);
    let items = qb
        .build_query_as::<Project>()
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(Page::new(
        "projects", items, page, limit, total,
    )))
}

/// GET /api/v1/projects/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let visible = project.status == ProjectStatus::Completed
        || viewer
            .as_ref()
            .map(|u| u.can_act(project.author_id))
            .unwrap_or(false);
    if !visible {
        return Err(ApiError::not_found("Project not found"));
    }

    // Fire-and-forget view counter
    let pool = state.pool.clone();
    tokio::spawn(async move {
        if let Err(e) = sqlx::query("UPDATE projects SET view_count = view_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await
        {
            tracing::warn!("view increment failed for project {}: {}", id, e);
        }
    });

    Ok(ApiResponse::ok(project))
}

/// POST /api/v1/projects
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateProjectRequest>,
) -> ApiResult<ApiResponse<Project>> {
    payload.validate()?;

    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (title, subtitle, description, content, cover_image, images,
             demo_video, tech_stack, project_type, status, github_url, demo_url,
             documentation_url, start_date, end_date, duration, team_size, is_open_source,
             author_id, category, tags)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
             $18, $19, $20, $21)
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(&payload.subtitle)
    .bind(&payload.description)
    .bind(&payload.content)
    .bind(&payload.cover_image)
    .bind(SqlJson(payload.images.clone()))
    .bind(&payload.demo_video)
    .bind(SqlJson(payload.tech_stack.clone()))
    .bind(payload.project_type)
    .bind(payload.status.unwrap_or(ProjectStatus::Draft))
    .bind(&payload.github_url)
    .bind(&payload.demo_url)
    .bind(&payload.documentation_url)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(&payload.duration)
    .bind(payload.team_size)
    .bind(payload.is_open_source.unwrap_or(false))
    .bind(auth.id)
    .bind(&payload.category)
    .bind(SqlJson(payload.tags.clone()))
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::created(project))
}

/// PUT /api/v1/projects/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateProjectRequest>,
) -> ApiResult<ApiResponse<Project>> {
    payload.validate()?;

    let existing = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    if !auth.can_act(existing.author_id) {
        return Err(ApiError::forbidden("Not the author of this project"));
    }

    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE projects SET updated_at = NOW()");
    if let Some(title) = &payload.title {
        qb.push(", title = ").push_bind(title.clone());
    }
    if let Some(subtitle) = &payload.subtitle {
        qb.push(", subtitle = ").push_bind(subtitle.clone());
    }
    if let Some(description) = &payload.description {
        qb.push(", description = ").push_bind(description.clone());
    }
    if let Some(content) = &payload.content {
        qb.push(", content = ").push_bind(content.clone());
    }
    if let Some(cover_image) = &payload.cover_image {
        qb.push(", cover_image = ").push_bind(cover_image.clone());
    }
    if let Some(images) = &payload.images {
        qb.push(", images = ").push_bind(SqlJson(images.clone()));
    }
    if let Some(demo_video) = &payload.demo_video {
        qb.push(", demo_video = ").push_bind(demo_video.clone());
    }
    if let Some(tech_stack) = &payload.tech_stack {
        qb.push(", tech_stack = ").push_bind(SqlJson(tech_stack.clone()));
    }
    if let Some(project_type) = payload.project_type {
        qb.push(", project_type = ").push_bind(project_type);
    }
    if let Some(status) = payload.status {
        qb.push(", status = ").push_bind(status);
    }
    if let Some(github_url) = &payload.github_url {
        qb.push(", github_url = ").push_bind(github_url.clone());
    }
    if let Some(demo_url) = &payload.demo_url {
        qb.push(", demo_url = ").push_bind(demo_url.clone());
    }
    if let Some(documentation_url) = &payload.documentation_url {
        qb.push(", documentation_url = ").push_bind(documentation_url.clone());
    }
    if let Some(start_date) = payload.start_date {
        qb.push(", start_date = ").push_bind(start_date);
    }
    if let Some(end_date) = payload.end_date {
        qb.push(", end_date = ").push_bind(end_date);
    }
    if let Some(duration) = &payload.duration {
        qb.push(", duration = ").push_bind(duration.clone());
    }
    if let Some(team_size) = payload.team_size {
        qb.push(", team_size = ").push_bind(team_size);
    }
    if let Some(is_open_source) = payload.is_open_source {
        qb.push(", is_open_source = ").push_bind(is_open_source);
    }
    if let Some(category) = &payload.category {
        qb.push(", category = ").push_bind(category.clone());
    }
    if let Some(tags) = &payload.tags {
        qb.push(", tags = ").push_bind(SqlJson(tags.clone()));
    }
    qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

    let project = qb
        .build_query_as::<Project>()
        .fetch_one(&state.pool)
        .await?;

    Ok(ApiResponse::ok(project))
}

/// DELETE /api/v1/projects/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let existing = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    if !auth.can_act(existing.author_id) {
        return Err(ApiError::forbidden("Not the author of this project"));
    }

    sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

async fn load_by_ids(state: &AppState, ids: &[i64]) -> ApiResult<Vec<Project>> {
    Ok(
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&state.pool)
            .await?,
    )
}

/// POST /api/v1/projects/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = load_by_ids(&state, &payload.ids).await?;
    let part = batch::partition(&payload.ids, loaded, |p| p.id, |p| {
        if auth.can_act(p.author_id) {
            Ok(())
        } else {
            Err("No permission".to_string())
        }
    });

    let authorized_ids = part.authorized_ids(|p| p.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM projects WHERE id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

#[derive(Debug, Deserialize)]
pub struct BatchStatusRequest {
    pub ids: Vec<i64>,
    pub status: ProjectStatus,
}

/// POST /api/v1/projects/batch-update-status
pub async fn batch_update_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchStatusRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = load_by_ids(&state, &payload.ids).await?;
    let part = batch::partition(&payload.ids, loaded, |p| p.id, |p| {
        if auth.can_act(p.author_id) {
            Ok(())
        } else {
            Err("No permission".to_string())
        }
    });

    let authorized_ids = part.authorized_ids(|p| p.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("UPDATE projects SET status = $1, updated_at = NOW() WHERE id = ANY($2)")
            .bind(payload.status)
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

#[derive(Debug, Deserialize)]
pub struct BatchFeaturedRequest {
    pub ids: Vec<i64>,
    pub is_featured: bool,
}

/// POST /api/v1/projects/batch-update-featured (admin)
pub async fn batch_update_featured(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchFeaturedRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    require_admin(&auth)?;
    batch::validate_ids(&payload.ids)?;

    let loaded = load_by_ids(&state, &payload.ids).await?;
    let part = batch::partition(&payload.ids, loaded, |p| p.id, |_| Ok(()));

    let authorized_ids = part.authorized_ids(|p| p.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("UPDATE projects SET is_featured = $1, updated_at = NOW() WHERE id = ANY($2)")
            .bind(payload.is_featured)
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

/// POST /api/v1/projects/update-orders (admin)
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
            "UPDATE projects SET display_order = $1, updated_at = NOW() WHERE id = $2",
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

use axum::{
    extract::{Path, State},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use validator::Validate;

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_admin, AuthUser, MaybeAuthUser};
use crate::models::article::{
    Article, ArticleDetail, ArticleListQuery, ArticleStatus, CreateArticleRequest,
    UpdateArticleRequest,
};
use crate::models::tag::Tag;

/// Whether a status change should stamp published_at: only on the first
/// transition into published. Later transitions leave the original
/// timestamp untouched.
fn stamp_published_at(existing: Option<DateTime<Utc>>, new_status: ArticleStatus) -> bool {
    new_status == ArticleStatus::Published && existing.is_none()
}

/// Append the list filters plus the caller's visibility window.
/// Admins see everything, authenticated users see published plus their
/// own drafts, anonymous callers see published only.
fn push_filters(qb: &mut QueryBuilder<Postgres>, q: &ArticleListQuery, viewer: Option<&AuthUser>) {
    qb.push(" WHERE 1=1");
    match viewer {
        Some(u) if u.is_admin() => {}
        Some(u) => {
            qb.push(" AND (status = 'published' OR author_id = ")
                .push_bind(u.id)
                .push(")");
        }
        None => {
            qb.push(" AND status = 'published'");
        }
    }
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(category_id) = q.category_id {
        qb.push(" AND category_id = ").push_bind(category_id);
    }
    if let Some(tag_id) = q.tag_id {
        qb.push(" AND EXISTS (SELECT 1 FROM article_tags j WHERE j.article_id = articles.id AND j.tag_id = ")
            .push_bind(tag_id)
            .push(")");
    }
    if let Some(keyword) = &q.keyword {
        let pattern = format!("%{}%", keyword);
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR summary ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// GET /api/v1/articles
pub async fn list(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Query(query): Query<ArticleListQuery>,
) -> ApiResult<ApiResponse<Page<Article>>> {
    let (page, limit) = page_params(query.page, query.limit);

    let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM articles");
    push_filters(&mut count_qb, &query, viewer.as_ref());
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.pool)
        .await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM articles");
    push_filters(&mut qb, &query, viewer.as_ref());
    qb.push(" ORDER BY is_top DESC, created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind((page - 1) * limit);
    let items = qb
        .build_query_as::<Article>()
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::ok(Page::new(
        "articles", items, page, limit, total,
    )))
}

/// GET /api/v1/articles/:id
///
/// Drafts hidden by the visibility rule are reported as not found, same
/// as a genuinely missing id.
pub async fn get(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<ArticleDetail>> {
    let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Article not found"))?;

    let visible = article.status == ArticleStatus::Published
        || viewer
            .as_ref()
            .map(|u| u.can_act(article.author_id))
            .unwrap_or(false);
    if !visible {
        return Err(ApiError::not_found("Article not found"));
    }

    let tags = sqlx::query_as::<_, Tag>(
        "SELECT t.* FROM tags t JOIN article_tags j ON j.tag_id = t.id
         WHERE j.article_id = $1 ORDER BY t.name",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    // Fire-and-forget view counter; a lost increment under concurrent
    // reads is accepted.
    let pool = state.pool.clone();
    tokio::spawn(async move {
        if let Err(e) = sqlx::query("UPDATE articles SET views = views + 1 WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await
        {
            tracing::warn!("view increment failed for article {}: {}", id, e);
        }
    });

    Ok(ApiResponse::ok(ArticleDetail { article, tags }))
}

/// Replace the article's tag associations inside the given transaction.
async fn set_tags(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    article_id: i64,
    tag_ids: &[i64],
) -> ApiResult<()> {
    let known = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tags WHERE id = ANY($1)")
        .bind(tag_ids)
        .fetch_one(&mut **tx)
        .await?;
    let distinct: std::collections::HashSet<i64> = tag_ids.iter().copied().collect();
    if known != distinct.len() as i64 {
        return Err(ApiError::bad_request("Unknown tag id in tag_ids"));
    }

    sqlx::query("DELETE FROM article_tags WHERE article_id = $1")
        .bind(article_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO article_tags (article_id, tag_id)
         SELECT $1, t FROM unnest($2::bigint[]) AS t
         ON CONFLICT DO NOTHING",
    )
    .bind(article_id)
    .bind(tag_ids)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// POST /api/v1/articles
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateArticleRequest>,
) -> ApiResult<ApiResponse<ArticleDetail>> {
    payload.validate()?;

    let status = payload.status.unwrap_or(ArticleStatus::Draft);
    let published_at = stamp_published_at(None, status).then(Utc::now);

    let mut tx = state.pool.begin().await?;

    let article = sqlx::query_as::<_, Article>(
        "INSERT INTO articles (title, summary, content, cover_image, author_id, category_id, status, published_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(&payload.title)
    .bind(&payload.summary)
    .bind(&payload.content)
    .bind(&payload.cover_image)
    .bind(auth.id)
    .bind(payload.category_id)
    .bind(status)
    .bind(published_at)
    .fetch_one(&mut *tx)
    .await?;

    if !payload.tag_ids.is_empty() {
        set_tags(&mut tx, article.id, &payload.tag_ids).await?;
    }

    let tags = sqlx::query_as::<_, Tag>(
        "SELECT t.* FROM tags t JOIN article_tags j ON j.tag_id = t.id
         WHERE j.article_id = $1 ORDER BY t.name",
    )
    .bind(article.id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(ApiResponse::created(ArticleDetail { article, tags }))
}

/// PUT /api/v1/articles/:id
///
/// Partial update; published_at is derived on the first draft-to-published
/// transition and left untouched afterwards.
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateArticleRequest>,
) -> ApiResult<ApiResponse<ArticleDetail>> {
    payload.validate()?;

    let existing = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Article not found"))?;

    if !auth.can_act(existing.author_id) {
        return Err(ApiError::forbidden("Not the author of this article"));
    }

    let mut tx = state.pool.begin().await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE articles SET updated_at = NOW()");
    if let Some(title) = &payload.title {
        qb.push(", title = ").push_bind(title.clone());
    }
    if let Some(summary) = &payload.summary {
        qb.push(", summary = ").push_bind(summary.clone());
    }
    if let Some(content) = &payload.content {
        qb.push(", content = ").push_bind(content.clone());
    }
    if let Some(cover_image) = &payload.cover_image {
        qb.push(", cover_image = ").push_bind(cover_image.clone());
    }
    if let Some(category_id) = payload.category_id {
        qb.push(", category_id = ").push_bind(category_id);
    }
    if let Some(status) = payload.status {
        qb.push(", status = ").push_bind(status);
        if stamp_published_at(existing.published_at, status) {
            qb.push(", published_at = NOW()");
        }
    }
    if let Some(is_top) = payload.is_top {
        qb.push(", is_top = ").push_bind(is_top);
    }
    qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

    let article = qb
        .build_query_as::<Article>()
        .fetch_one(&mut *tx)
        .await?;

    if let Some(tag_ids) = &payload.tag_ids {
        set_tags(&mut tx, id, tag_ids).await?;
    }

    let tags = sqlx::query_as::<_, Tag>(
        "SELECT t.* FROM tags t JOIN article_tags j ON j.tag_id = t.id
         WHERE j.article_id = $1 ORDER BY t.name",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(ApiResponse::ok(ArticleDetail { article, tags }))
}

/// DELETE /api/v1/articles/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let existing = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Article not found"))?;

    if !auth.can_act(existing.author_id) {
        return Err(ApiError::forbidden("Not the author of this article"));
    }

    // article_tags and comments cascade at the schema level
    sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

async fn load_by_ids(state: &AppState, ids: &[i64]) -> ApiResult<Vec<Article>> {
    Ok(
        sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&state.pool)
            .await?,
    )
}

/// POST /api/v1/articles/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = load_by_ids(&state, &payload.ids).await?;
    let part = batch::partition(&payload.ids, loaded, |a| a.id, |a| {
        if auth.can_act(a.author_id) {
            Ok(())
        } else {
            Err("No permission".to_string())
        }
    });

    let authorized_ids = part.authorized_ids(|a| a.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM articles WHERE id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    let outcome = part.into_outcome(payload.ids.len());
    tracing::info!(
        "batch-delete articles: {}/{} affected",
        outcome.affected_count,
        outcome.total_count
    );
    Ok(ApiResponse::ok(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BatchStatusRequest {
    pub ids: Vec<i64>,
    pub status: ArticleStatus,
}

/// POST /api/v1/articles/batch-update-status
pub async fn batch_update_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchStatusRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = load_by_ids(&state, &payload.ids).await?;
    let part = batch::partition(&payload.ids, loaded, |a| a.id, |a| {
        if auth.can_act(a.author_id) {
            Ok(())
        } else {
            Err("No permission".to_string())
        }
    });

    let authorized_ids = part.authorized_ids(|a| a.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        match payload.status {
            // Publishing stamps published_at only where it is still unset
            ArticleStatus::Published => {
                sqlx::query(
                    "UPDATE articles
                     SET status = $1, published_at = COALESCE(published_at, NOW()), updated_at = NOW()
                     WHERE id = ANY($2)",
                )
                .bind(payload.status)
                .bind(&authorized_ids)
                .execute(&mut *tx)
                .await?;
            }
            ArticleStatus::Draft => {
                sqlx::query(
                    "UPDATE articles SET status = $1, updated_at = NOW() WHERE id = ANY($2)",
                )
                .bind(payload.status)
                .bind(&authorized_ids)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

#[derive(Debug, Deserialize)]
pub struct BatchTopRequest {
    pub ids: Vec<i64>,
    pub is_top: bool,
}

/// POST /api/v1/articles/batch-update-top (admin)
pub async fn batch_update_top(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchTopRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    require_admin(&auth)?;
    batch::validate_ids(&payload.ids)?;

    let loaded = load_by_ids(&state, &payload.ids).await?;
    let part = batch::partition(&payload.ids, loaded, |a| a.id, |_| Ok(()));

    let authorized_ids = part.authorized_ids(|a| a.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("UPDATE articles SET is_top = $1, updated_at = NOW() WHERE id = ANY($2)")
            .bind(payload.is_top)
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_at_stamped_on_first_publish_only() {
        assert!(stamp_published_at(None, ArticleStatus::Published));
        assert!(!stamp_published_at(Some(Utc::now()), ArticleStatus::Published));
    }

    #[test]
    fn test_unpublishing_never_touches_published_at() {
        assert!(!stamp_published_at(None, ArticleStatus::Draft));
        assert!(!stamp_published_at(Some(Utc::now()), ArticleStatus::Draft));
    }
}

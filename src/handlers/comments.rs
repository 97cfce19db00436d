use axum::{
    extract::{Path, State},
    Extension,
};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use validator::Validate;

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_admin, AuthUser, MaybeAuthUser};
use crate::models::comment::{Comment, CommentListQuery, CreateCommentRequest};

/// Top-level comment plus its direct replies. Nesting is one level deep.
#[derive(Debug, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

/// Whether the caller can delete a comment. Anonymous comments have no
/// owner and are admin-only.
fn can_delete(auth: &AuthUser, comment: &Comment) -> bool {
    match comment.user_id {
        Some(owner_id) => auth.can_act(owner_id),
        None => auth.is_admin(),
    }
}

/// Moderation window: admins see everything, authenticated viewers see
/// approved comments plus their own pending ones, anonymous callers see
/// approved only.
fn push_visibility(qb: &mut QueryBuilder<Postgres>, viewer: Option<&AuthUser>) {
    match viewer {
        Some(u) if u.is_admin() => {}
        Some(u) => {
            qb.push(" AND (is_approved OR user_id = ")
                .push_bind(u.id)
                .push(")");
        }
        None => {
            qb.push(" AND is_approved");
        }
    }
}

/// GET /api/v1/articles/:article_id/comments
pub async fn list(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Path(article_id): Path<i64>,
    Query(query): Query<CommentListQuery>,
) -> ApiResult<ApiResponse<Page<CommentThread>>> {
    let (page, limit) = page_params(query.page, query.limit);

    let mut count_qb: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM comments WHERE article_id = ");
    count_qb.push_bind(article_id).push(" AND parent_id IS NULL");
    push_visibility(&mut count_qb, viewer.as_ref());
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.pool)
        .await?;

    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT * FROM comments WHERE article_id = ");
    qb.push_bind(article_id).push(" AND parent_id IS NULL");
    push_visibility(&mut qb, viewer.as_ref());
    qb.push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind((page - 1) * limit);
    let top_level = qb
        .build_query_as::<Comment>()
        .fetch_all(&state.pool)
        .await?;

    let parent_ids: Vec<i64> = top_level.iter().map(|c| c.id).collect();
    let replies = if parent_ids.is_empty() {
        vec![]
    } else {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM comments WHERE parent_id = ANY(");
        qb.push_bind(parent_ids.clone()).push(")");
        push_visibility(&mut qb, viewer.as_ref());
        qb.push(" ORDER BY created_at ASC");
        qb.build_query_as::<Comment>()
            .fetch_all(&state.pool)
            .await?
    };

    let items = top_level
        .into_iter()
        .map(|comment| {
            let replies = replies
                .iter()
                .filter(|r| r.parent_id == Some(comment.id))
                .cloned()
                .collect();
            CommentThread { comment, replies }
        })
        .collect();

    Ok(ApiResponse::ok(Page::new(
        "comments", items, page, limit, total,
    )))
}

/// POST /api/v1/articles/:article_id/comments
///
/// Anonymous callers must supply a nickname; authenticated commenters are
/// auto-approved.
pub async fn create(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Path(article_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> ApiResult<ApiResponse<Comment>> {
    payload.validate()?;

    let article_exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE id = $1")
        .bind(article_id)
        .fetch_one(&state.pool)
        .await?;
    if article_exists == 0 {
        return Err(ApiError::not_found("Article not found"));
    }

    let nickname = match (&payload.nickname, &viewer) {
        (Some(n), _) => n.clone(),
        (None, Some(u)) => u.username.clone(),
        (None, None) => {
            return Err(ApiError::validation_error(
                "Nickname is required for anonymous comments",
                None,
            ))
        }
    };

    if let Some(parent_id) = payload.parent_id {
        let parent = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
            .bind(parent_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Parent comment not found"))?;
        if parent.article_id != article_id {
            return Err(ApiError::domain_error(
                "Parent comment belongs to a different article",
            ));
        }
        // One reply level only: replies cannot themselves be replied to
        if parent.parent_id.is_some() {
            return Err(ApiError::domain_error("Replies cannot be nested further"));
        }
    }

    let comment = sqlx::query_as::<_, Comment>(
        "INSERT INTO comments (article_id, user_id, parent_id, nickname, email, content, is_approved)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(article_id)
    .bind(viewer.as_ref().map(|u| u.id))
    .bind(payload.parent_id)
    .bind(&nickname)
    .bind(&payload.email)
    .bind(&payload.content)
    .bind(viewer.is_some())
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::created(comment))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub is_approved: bool,
}

/// PUT /api/v1/comments/:id/approval (admin)
pub async fn set_approval(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<ApprovalRequest>,
) -> ApiResult<ApiResponse<Comment>> {
    require_admin(&auth)?;

    let comment = sqlx::query_as::<_, Comment>(
        "UPDATE comments SET is_approved = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(payload.is_approved)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    Ok(ApiResponse::ok(comment))
}

/// DELETE /api/v1/comments/:id
///
/// Deleting a top-level comment takes its direct replies with it via an
/// explicit companion delete.
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let existing = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    if !can_delete(&auth, &existing) {
        return Err(ApiError::forbidden("Not the author of this comment"));
    }

    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM comments WHERE parent_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

/// POST /api/v1/comments/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ANY($1)")
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |c| c.id, |c| {
        if can_delete(&auth, c) {
            Ok(())
        } else {
            Err("No permission".to_string())
        }
    });

    let authorized_ids = part.authorized_ids(|c| c.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM comments WHERE parent_id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM comments WHERE id = ANY($1)")
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
    use crate::models::user::Role;

    fn viewer(id: i64, role: Role) -> AuthUser {
        AuthUser {
            id,
            username: format!("user{}", id),
            role,
        }
    }

    fn visibility_sql(v: Option<&AuthUser>) -> String {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM comments WHERE 1=1");
        push_visibility(&mut qb, v);
        qb.sql().to_string()
    }

    #[test]
    fn test_anonymous_viewers_see_approved_only() {
        assert!(visibility_sql(None).contains("AND is_approved"));
    }

    #[test]
    fn test_authenticated_viewers_also_see_their_own_pending() {
        let sql = visibility_sql(Some(&viewer(5, Role::User)));
        assert!(sql.contains("is_approved OR user_id ="));
    }

    #[test]
    fn test_admins_are_unfiltered() {
        let sql = visibility_sql(Some(&viewer(1, Role::Admin)));
        assert!(!sql.contains("is_approved"));
    }
}

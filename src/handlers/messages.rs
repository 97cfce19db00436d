use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::{page_params, ApiResponse, Json, Page, Query};
use crate::batch::{self, BatchIdsRequest, BatchOutcome};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_admin, AuthUser, MaybeAuthUser};
use crate::models::message::{
    pick_color, CreateMessageRequest, Message, MessageListQuery, MessageStatus, Mood,
};

/// Top-level guestbook message plus its direct replies.
#[derive(Debug, Serialize)]
pub struct MessageThread {
    #[serde(flatten)]
    pub message: Message,
    pub replies: Vec<Message>,
}

fn can_delete(auth: &AuthUser, message: &Message) -> bool {
    match message.user_id {
        Some(owner_id) => auth.can_act(owner_id),
        None => auth.is_admin(),
    }
}

/// Best-effort client metadata from proxy headers.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

fn client_browser(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(200).collect())
}

/// GET /api/v1/messages
///
/// The public listing shows approved top-level messages only; admins may
/// filter by moderation status instead.
pub async fn list(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    Query(query): Query<MessageListQuery>,
) -> ApiResult<ApiResponse<Page<MessageThread>>> {
    let (page, limit) = page_params(query.page, query.limit);
    let admin = viewer.as_ref().map(|u| u.is_admin()).unwrap_or(false);

    let status_filter = if admin {
        query.status
    } else {
        Some(MessageStatus::Approved)
    };

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages
         WHERE reply_to_id IS NULL
           AND ($1::message_status IS NULL OR status = $1)
           AND ($2::message_mood IS NULL OR mood = $2)",
    )
    .bind(status_filter)
    .bind(query.mood)
    .fetch_one(&state.pool)
    .await?;

    let top_level = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages
         WHERE reply_to_id IS NULL
           AND ($1::message_status IS NULL OR status = $1)
           AND ($2::message_mood IS NULL OR mood = $2)
         ORDER BY created_at DESC LIMIT $3 OFFSET $4",
    )
    .bind(status_filter)
    .bind(query.mood)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(&state.pool)
    .await?;

    let parent_ids: Vec<i64> = top_level.iter().map(|m| m.id).collect();
    let replies = if parent_ids.is_empty() {
        vec![]
    } else {
        sqlx::query_as::<_, Message>(
            "SELECT * FROM messages
             WHERE reply_to_id = ANY($1)
               AND ($2::message_status IS NULL OR status = $2)
             ORDER BY created_at ASC",
        )
        .bind(&parent_ids)
        .bind(status_filter)
        .fetch_all(&state.pool)
        .await?
    };

    let items = top_level
        .into_iter()
        .map(|message| {
            let replies = replies
                .iter()
                .filter(|r| r.reply_to_id == Some(message.id))
                .cloned()
                .collect();
            MessageThread { message, replies }
        })
        .collect();

    Ok(ApiResponse::ok(Page::new(
        "messages", items, page, limit, total,
    )))
}

/// POST /api/v1/messages
pub async fn create(
    State(state): State<AppState>,
    Extension(MaybeAuthUser(viewer)): Extension<MaybeAuthUser>,
    headers: HeaderMap,
    Json(payload): Json<CreateMessageRequest>,
) -> ApiResult<ApiResponse<Message>> {
    payload.validate()?;

    let nickname = match (&payload.nickname, &viewer) {
        (Some(n), _) => n.clone(),
        (None, Some(u)) => u.username.clone(),
        (None, None) => {
            return Err(ApiError::validation_error(
                "Nickname is required for anonymous messages",
                None,
            ))
        }
    };

    if let Some(reply_to_id) = payload.reply_to_id {
        let parent = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(reply_to_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Message not found"))?;
        // One reply level only
        if parent.reply_to_id.is_some() {
            return Err(ApiError::domain_error("Replies cannot be nested further"));
        }
    }

    let color = pick_color(&mut rand::thread_rng());

    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (user_id, nickname, email, content, mood, avatar, ip, location,
             browser, reply_to_id, color)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
    )
    .bind(viewer.as_ref().map(|u| u.id))
    .bind(&nickname)
    .bind(&payload.email)
    .bind(&payload.content)
    .bind(payload.mood.unwrap_or(Mood::Happy))
    .bind(&payload.avatar)
    .bind(client_ip(&headers))
    .bind(&payload.location)
    .bind(client_browser(&headers))
    .bind(payload.reply_to_id)
    .bind(color)
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::created(message))
}

/// POST /api/v1/messages/:id/like
pub async fn like(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "UPDATE messages SET likes = likes + 1 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Message not found"))?;

    Ok(ApiResponse::ok(message))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: MessageStatus,
}

/// PUT /api/v1/messages/:id/status (admin moderation)
pub async fn set_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<StatusRequest>,
) -> ApiResult<ApiResponse<Message>> {
    require_admin(&auth)?;

    let message = sqlx::query_as::<_, Message>(
        "UPDATE messages SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(payload.status)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Message not found"))?;

    Ok(ApiResponse::ok(message))
}

/// DELETE /api/v1/messages/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let existing = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    if !can_delete(&auth, &existing) {
        return Err(ApiError::forbidden("Not the author of this message"));
    }

    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM messages WHERE reply_to_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(ApiResponse::ok(serde_json::Value::Null).with_message("deleted"))
}

/// POST /api/v1/messages/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchIdsRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    batch::validate_ids(&payload.ids)?;

    let loaded = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ANY($1)")
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |m| m.id, |m| {
        if can_delete(&auth, m) {
            Ok(())
        } else {
            Err("No permission".to_string())
        }
    });

    let authorized_ids = part.authorized_ids(|m| m.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE reply_to_id = ANY($1)")
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE id = ANY($1)")
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
    pub status: MessageStatus,
}

/// POST /api/v1/messages/batch-update-status (admin moderation)
pub async fn batch_update_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchStatusRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    require_admin(&auth)?;
    batch::validate_ids(&payload.ids)?;

    let loaded = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ANY($1)")
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |m| m.id, |_| Ok(()));

    let authorized_ids = part.authorized_ids(|m| m.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("UPDATE messages SET status = $1, updated_at = NOW() WHERE id = ANY($2)")
            .bind(payload.status)
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

#[derive(Debug, Deserialize)]
pub struct BatchColorRequest {
    pub ids: Vec<i64>,
    pub color: String,
}

/// POST /api/v1/messages/batch-update-color (admin)
pub async fn batch_update_color(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<BatchColorRequest>,
) -> ApiResult<ApiResponse<BatchOutcome>> {
    require_admin(&auth)?;
    batch::validate_ids(&payload.ids)?;
    if payload.color.is_empty() {
        return Err(ApiError::bad_request("color must not be empty"));
    }

    let loaded = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ANY($1)")
        .bind(&payload.ids)
        .fetch_all(&state.pool)
        .await?;

    let part = batch::partition(&payload.ids, loaded, |m| m.id, |_| Ok(()));

    let authorized_ids = part.authorized_ids(|m| m.id);
    if !authorized_ids.is_empty() {
        let mut tx = state.pool.begin().await?;
        sqlx::query("UPDATE messages SET color = $1, updated_at = NOW() WHERE id = ANY($2)")
            .bind(&payload.color)
            .bind(&authorized_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(ApiResponse::ok(part.into_outcome(payload.ids.len())))
}

use axum::{extract::State, Extension};
use serde_json::json;
use validator::Validate;

use crate::api::{ApiResponse, Json};
use crate::auth::{generate_jwt, hash_password, verify_password, Claims};
use crate::database::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::user::{LoginRequest, RegisterRequest, Role, User};

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    payload.validate()?;

    let taken = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = $1 OR email = $2",
    )
    .bind(&payload.username)
    .bind(&payload.email)
    .fetch_one(&state.pool)
    .await?;

    if taken > 0 {
        return Err(ApiError::bad_request("Username or email already taken"));
    }

    let password_hash = hash_password(&payload.password)
        .map_err(|e| ApiError::internal_server_error(format!("password hashing failed: {}", e)))?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, password_hash, role)
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&password_hash)
    .bind(Role::User)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!("registered user {} (id={})", user.username, user.id);
    Ok(ApiResponse::created(json!({ "user": user.profile() })))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(&payload.username)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let token = generate_jwt(Claims::new(user.id, user.username.clone(), user.role))
        .map_err(|e| ApiError::internal_server_error(format!("token generation failed: {}", e)))?;

    Ok(ApiResponse::ok(json!({
        "token": token,
        "user": user.profile(),
    })))
}

/// POST /api/v1/auth/logout
///
/// Tokens are stateless; logout is acknowledged so clients can drop theirs.
pub async fn logout() -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(serde_json::Value::Null).with_message("logged out")
}

/// GET /api/v1/auth/profile
pub async fn profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(auth.id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(ApiResponse::ok(json!({ "user": user.profile() })))
}

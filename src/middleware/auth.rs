use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::auth::verify_jwt;
use crate::database::AppState;
use crate::error::ApiError;
use crate::models::user::{Role, User};

/// Authenticated principal extracted from a verified JWT and resolved
/// against the users table.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    /// Ownership/role predicate applied before every mutation.
    pub fn can_act(&self, resource_owner_id: i64) -> bool {
        self.role == Role::Admin || self.id == resource_owner_id
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// Principal slot populated by the optional-auth middleware. Anonymous
/// callers carry None and are not rejected.
#[derive(Clone, Debug, Default)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

/// Role-only authorization variant for admin-gated actions.
pub fn require_admin(user: &AuthUser) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin role required"))
    }
}

/// JWT authentication middleware. Rejects the request with 401 when the
/// credential is missing, invalid, expired, or references a deleted user.
pub async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = resolve_principal(&state, &headers).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Optional variant: resolves the principal when present and valid,
/// otherwise proceeds anonymously without error.
pub async fn optional_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let maybe = match resolve_principal(&state, &headers).await {
        Ok(user) => MaybeAuthUser(Some(user)),
        Err(_) => MaybeAuthUser(None),
    };
    request.extensions_mut().insert(maybe);
    next.run(request).await
}

async fn resolve_principal(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = extract_bearer_token(headers).map_err(ApiError::unauthorized)?;

    let claims = verify_jwt(&token).map_err(|e| {
        tracing::debug!("JWT rejected: {}", e);
        ApiError::unauthorized("Invalid or expired token")
    })?;

    // The token may outlive the account
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;

    Ok(AuthUser::from(&user))
}

/// Extract the token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty bearer token".to_string());
        }
        Ok(token.to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AuthUser {
        AuthUser {
            id: 1,
            username: "admin".to_string(),
            role: Role::Admin,
        }
    }

    fn regular(id: i64) -> AuthUser {
        AuthUser {
            id,
            username: format!("user{}", id),
            role: Role::User,
        }
    }

    #[test]
    fn test_can_act_owner_or_admin() {
        assert!(admin().can_act(999));
        assert!(regular(5).can_act(5));
        assert!(!regular(5).can_act(6));
    }

    #[test]
    fn test_require_admin() {
        assert!(require_admin(&admin()).is_ok());
        assert!(require_admin(&regular(2)).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", "Bearer tok123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "tok123");
    }
}

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config;
use crate::database::{self, AppState};
use crate::handlers;
use crate::middleware::{optional_auth, require_auth};

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth_routes(state.clone()))
        .merge(public_routes(state.clone()))
        .merge(protected_routes(state.clone()));

    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config::config().server.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    match database::health_check(&state.pool).await {
        Ok(()) => Json(json!({ "status": "ok" })),
        Err(e) => {
            tracing::error!("health check failed: {}", e);
            Json(json!({ "status": "degraded" }))
        }
    }
}

fn auth_routes(state: AppState) -> Router<AppState> {
    use handlers::auth;

    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route(
            "/auth/profile",
            get(auth::profile).route_layer(axum_middleware::from_fn_with_state(
                state,
                require_auth,
            )),
        )
}

/// Read endpoints plus anonymous-friendly writes. The optional-auth layer
/// resolves a principal when a valid token is present but never rejects.
fn public_routes(state: AppState) -> Router<AppState> {
    use handlers::{articles, categories, comments, messages, moments, projects, tags};

    Router::new()
        .route("/articles", get(articles::list))
        .route("/articles/:id", get(articles::get))
        .route(
            "/articles/:id/comments",
            get(comments::list).post(comments::create),
        )
        .route("/categories", get(categories::list))
        .route("/categories/:id", get(categories::get))
        .route("/tags", get(tags::list))
        .route("/tags/:id", get(tags::get))
        .route("/moments", get(moments::list))
        .route("/moments/:id", get(moments::get))
        .route("/projects", get(projects::list))
        .route("/projects/:id", get(projects::get))
        .route("/messages", get(messages::list).post(messages::create))
        .route("/messages/:id/like", post(messages::like))
        .route_layer(axum_middleware::from_fn_with_state(state, optional_auth))
}

/// Everything behind the required-auth gate; per-handler checks narrow
/// further to owner/admin where needed.
fn protected_routes(state: AppState) -> Router<AppState> {
    use handlers::{articles, categories, comments, media, messages, moments, projects, tags};

    let upload_limit = config::config().upload.max_file_size_bytes + 64 * 1024;

    Router::new()
        .route("/articles", post(articles::create))
        .route(
            "/articles/:id",
            put(articles::update).delete(articles::delete),
        )
        .route("/articles/batch-delete", post(articles::batch_delete))
        .route(
            "/articles/batch-update-status",
            post(articles::batch_update_status),
        )
        .route(
            "/articles/batch-update-top",
            post(articles::batch_update_top),
        )
        .route("/categories", post(categories::create))
        .route(
            "/categories/:id",
            put(categories::update).delete(categories::delete),
        )
        .route("/categories/batch-delete", post(categories::batch_delete))
        .route("/categories/merge", post(categories::merge))
        .route("/categories/update-orders", post(categories::update_orders))
        .route("/tags", post(tags::create))
        .route("/tags/:id", put(tags::update).delete(tags::delete))
        .route("/tags/batch-delete", post(tags::batch_delete))
        .route("/tags/merge", post(tags::merge))
        .route("/comments/:id", delete(comments::delete))
        .route("/comments/:id/approval", put(comments::set_approval))
        .route("/comments/batch-delete", post(comments::batch_delete))
        .route("/moments", post(moments::create))
        .route("/moments/:id", put(moments::update).delete(moments::delete))
        .route("/moments/batch-delete", post(moments::batch_delete))
        .route("/projects", post(projects::create))
        .route(
            "/projects/:id",
            put(projects::update).delete(projects::delete),
        )
        .route("/projects/batch-delete", post(projects::batch_delete))
        .route(
            "/projects/batch-update-status",
            post(projects::batch_update_status),
        )
        .route(
            "/projects/batch-update-featured",
            post(projects::batch_update_featured),
        )
        .route("/projects/update-orders", post(projects::update_orders))
        .route("/messages/:id", delete(messages::delete))
        .route("/messages/:id/status", put(messages::set_status))
        .route("/messages/batch-delete", post(messages::batch_delete))
        .route(
            "/messages/batch-update-status",
            post(messages::batch_update_status),
        )
        .route(
            "/messages/batch-update-color",
            post(messages::batch_update_color),
        )
        .route("/media", get(media::list))
        .route("/media/:id", get(media::get).delete(media::delete))
        .route(
            "/media/upload",
            post(media::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/media/batch-delete", post(media::batch_delete))
        .route_layer(axum_middleware::from_fn_with_state(state, require_auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    // Extractor rejections fire before any handler runs, so a lazy pool
    // that never connects is enough for these.
    fn test_app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/unused")
            .expect("lazy pool");
        app(AppState::new(pool))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_malformed_json_body_gets_the_error_envelope() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/messages")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
        assert!(body["message"].is_string());
        assert!(body.as_object().unwrap().contains_key("data"));
    }

    #[tokio::test]
    async fn test_unparseable_query_param_gets_the_error_envelope() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/articles?page=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
        assert!(body["message"].is_string());
    }
}

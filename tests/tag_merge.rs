//! Tag merge semantics against a live database.
//!
//! These need DATABASE_URL pointing at a migrated Postgres and are skipped
//! in a normal run; include them with `cargo test -- --ignored`.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::Extension;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use blog_api::api::Json;
use blog_api::batch::MergeRequest;
use blog_api::database::AppState;
use blog_api::handlers::tags;
use blog_api::middleware::AuthUser;
use blog_api::models::user::Role;

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("database connection")
}

fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}-{}", prefix, nanos)
}

async fn insert_tag(pool: &PgPool, prefix: &str) -> i64 {
    sqlx::query_scalar("INSERT INTO tags (name) VALUES ($1) RETURNING id")
        .bind(unique(prefix))
        .fetch_one(pool)
        .await
        .expect("tag insert")
}

async fn insert_article(pool: &PgPool, author_id: i64) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO articles (title, content, author_id) VALUES ($1, 'body', $2) RETURNING id",
    )
    .bind(unique("merge-article"))
    .bind(author_id)
    .fetch_one(pool)
    .await
    .expect("article insert")
}

async fn attach(pool: &PgPool, article_id: i64, tag_id: i64) {
    sqlx::query("INSERT INTO article_tags (article_id, tag_id) VALUES ($1, $2)")
        .bind(article_id)
        .bind(tag_id)
        .execute(pool)
        .await
        .expect("attach tag");
}

async fn dependent_count(pool: &PgPool, tag_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM article_tags WHERE tag_id = $1")
        .bind(tag_id)
        .fetch_one(pool)
        .await
        .expect("dependent count")
}

#[tokio::test]
#[ignore]
async fn merging_twice_yields_the_same_dependent_count() {
    let pool = pool().await;
    let state = AppState::new(pool.clone());

    let admin_name = unique("merge-admin");
    let admin_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, email, password_hash, role)
         VALUES ($1, $2, 'x', 'admin') RETURNING id",
    )
    .bind(&admin_name)
    .bind(format!("{}@example.com", admin_name))
    .fetch_one(&pool)
    .await
    .expect("admin insert");

    let admin = AuthUser {
        id: admin_id,
        username: admin_name,
        role: Role::Admin,
    };

    let source = insert_tag(&pool, "merge-source").await;
    let target = insert_tag(&pool, "merge-target").await;

    // One article per tag plus one carrying both; union size is three.
    let a = insert_article(&pool, admin_id).await;
    let b = insert_article(&pool, admin_id).await;
    let c = insert_article(&pool, admin_id).await;
    attach(&pool, a, source).await;
    attach(&pool, b, target).await;
    attach(&pool, c, source).await;
    attach(&pool, c, target).await;

    let request = MergeRequest {
        source_ids: vec![source],
        target_id: target,
    };

    let first = tags::merge(
        State(state.clone()),
        Extension(admin.clone()),
        Json(MergeRequest {
            source_ids: request.source_ids.clone(),
            target_id: request.target_id,
        }),
    )
    .await
    .expect("first merge");

    assert_eq!(first.data["merged_tags"], 1);
    assert_eq!(first.data["target_article_count_after"], 3);
    assert_eq!(dependent_count(&pool, target).await, 3);

    let source_left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE id = $1")
        .bind(source)
        .fetch_one(&pool)
        .await
        .expect("source lookup");
    assert_eq!(source_left, 0);

    // Second merge finds no sources and changes nothing.
    let second = tags::merge(State(state), Extension(admin), Json(request))
        .await
        .expect("second merge");

    assert_eq!(second.data["merged_tags"], 0);
    assert_eq!(second.data["target_article_count_after"], 3);
    assert_eq!(dependent_count(&pool, target).await, 3);

    for article in [a, b, c] {
        sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(article)
            .execute(&pool)
            .await
            .ok();
    }
    sqlx::query("DELETE FROM tags WHERE id = $1")
        .bind(target)
        .execute(&pool)
        .await
        .ok();
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(admin_id)
        .execute(&pool)
        .await
        .ok();
}

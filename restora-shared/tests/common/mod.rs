//! Shared helpers for database-backed tests
//!
//! Tests connect to `DATABASE_URL`, run migrations and create their own users
//! with unique emails, so they can share one database. Without `DATABASE_URL`
//! they return early.

#![allow(dead_code)]

use restora_shared::db::{
    migrations::{ensure_database_exists, run_migrations},
    pool::{create_pool, DatabaseConfig},
};
use restora_shared::models::user::{CreateUser, User};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    ensure_database_exists(&url).await.expect("Failed to create database");

    let pool = create_pool(DatabaseConfig {
        url,
        max_connections: 5,
        ..Default::default()
    })
    .await
    .expect("Failed to connect to test database");

    run_migrations(&pool).await.expect("Failed to run migrations");
    Some(pool)
}

/// Creates a user with a zero balance
pub async fn create_user(pool: &PgPool) -> User {
    let mut conn = pool.acquire().await.unwrap();
    let user = User::create(
        &mut conn,
        CreateUser {
            email: format!("test-{}@example.com", Uuid::new_v4()),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            name: Some("Test User".to_string()),
        },
    )
    .await
    .unwrap();

    restora_shared::models::credit::CreditBalance::ensure(&mut conn, user.id)
        .await
        .unwrap();
    user
}

//! Database helpers for worker tests
//!
//! Connects to `DATABASE_URL` and runs migrations; without it the tests
//! return early.

#![allow(dead_code)]

use restora_shared::credits;
use restora_shared::db::{
    migrations::run_migrations,
    pool::{create_pool, DatabaseConfig},
};
use restora_shared::models::generation::{CreateGeneration, GenerationRecord};
use restora_shared::models::user::{CreateUser, User};
use restora_shared::vendor::FunctionType;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

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

/// Creates a user holding `balance` credits
pub async fn create_user(pool: &PgPool, balance: i64) -> User {
    let mut tx = pool.begin().await.unwrap();
    let user = User::create(
        &mut tx,
        CreateUser {
            email: format!("worker-{}@example.com", Uuid::new_v4()),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            name: None,
        },
    )
    .await
    .unwrap();
    credits::grant_signup_bonus(&mut tx, user.id, balance).await.unwrap();
    tx.commit().await.unwrap();
    user
}

/// Charges one credit and inserts a pending job, the way the API does
pub async fn submit_job(pool: &PgPool, user: &User, vendor_task_id: &str) -> GenerationRecord {
    let id = Uuid::new_v4();

    let mut tx = pool.begin().await.unwrap();
    credits::debit_usage(&mut tx, user.id, id, 1).await.unwrap();
    tx.commit().await.unwrap();

    GenerationRecord::create(
        pool,
        CreateGeneration {
            id,
            user_id: user.id,
            function_type: FunctionType::Colorization,
            input_image_url: "https://cdn.example.com/in.jpg".to_string(),
            prompt: "colorize".to_string(),
            vendor_task_id: vendor_task_id.to_string(),
            credits_charged: 1,
        },
    )
    .await
    .unwrap()
}

/// User accounts
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(255) NOT NULL,          -- unique on LOWER(email)
///     password_hash VARCHAR(255) NOT NULL,
///     name VARCHAR(255),
///     avatar_url VARCHAR(2048),
///     stripe_customer_id VARCHAR(255) UNIQUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_login_at TIMESTAMPTZ
/// );
/// ```
///
/// Emails are normalized with [`normalize_email`] before they are written or
/// looked up, so the unique index on `LOWER(email)` and the lookups agree.
///
/// # Example
///
/// ```no_run
/// use restora_shared::models::user::{CreateUser, User};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let mut conn = pool.acquire().await?;
/// let user = User::create(
///     &mut conn,
///     CreateUser {
///         email: "Ada@Example.com".to_string(),
///         password_hash: "$argon2id$...".to_string(),
///         name: Some("Ada".to_string()),
///     },
/// )
/// .await?;
/// assert_eq!(user.email, "ada@example.com");
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, password_hash, name, avatar_url, stripe_customer_id, \
                            created_at, updated_at, last_login_at";

/// Lowercases and trims an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Normalized (lowercase) email address
    pub email: String,

    /// Argon2id hash in PHC format. Never serialized to clients.
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub name: Option<String>,

    pub avatar_url: Option<String>,

    /// Customer id at the payment provider, set on first checkout
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for creating a user
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
}

/// Profile changes. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfile {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl User {
    /// Inserts a user
    ///
    /// Takes a connection so registration can run inside a transaction with
    /// the balance row and the signup bonus.
    ///
    /// # Errors
    ///
    /// Fails with a unique violation on `users_email_unique` if the email is taken.
    pub async fn create(conn: &mut PgConnection, data: CreateUser) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (email, password_hash, name) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(normalize_email(&data.email))
            .bind(data.password_hash)
            .bind(data.name)
            .fetch_one(conn)
            .await
    }

    /// Finds a user by id
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a user by email, case-insensitively
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM users WHERE LOWER(email) = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await
    }

    /// Finds the user owning a payment provider customer id
    pub async fn find_by_stripe_customer(
        pool: &PgPool,
        customer_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM users WHERE stripe_customer_id = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(customer_id)
            .fetch_optional(pool)
            .await
    }

    /// Applies profile changes and bumps `updated_at`
    ///
    /// Returns `None` if the user does not exist.
    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        data: UpdateProfile,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                avatar_url = COALESCE($3, avatar_url),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(data.name)
            .bind(data.avatar_url)
            .fetch_optional(pool)
            .await
    }

    /// Records the payment provider customer id if none is stored yet
    ///
    /// Returns the id that ends up stored, which is the existing one when two
    /// checkouts race.
    pub async fn set_stripe_customer_id(
        pool: &PgPool,
        id: Uuid,
        customer_id: &str,
    ) -> Result<String, sqlx::Error> {
        let (stored,): (Option<String>,) = sqlx::query_as(
            r#"
            UPDATE users
            SET stripe_customer_id = COALESCE(stripe_customer_id, $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING stripe_customer_id
            "#,
        )
        .bind(id)
        .bind(customer_id)
        .fetch_one(pool)
        .await?;

        Ok(stored.unwrap_or_else(|| customer_id.to_string()))
    }

    /// Updates the last login timestamp
    pub async fn update_last_login(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

/// Credit balances and the credit ledger
///
/// Every balance change is a row in `credit_transactions` with a unique
/// `source_id`. The balance row is only ever changed together with a ledger
/// insert (see [`crate::credits`]).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE credit_balances (
///     user_id UUID PRIMARY KEY REFERENCES users(id),
///     balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE credit_transactions (
///     id UUID PRIMARY KEY,
///     user_id UUID NOT NULL REFERENCES users(id),
///     kind TEXT NOT NULL,
///     amount BIGINT NOT NULL,          -- signed
///     balance_after BIGINT NOT NULL,
///     source_id VARCHAR(255) NOT NULL UNIQUE,
///     description TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Why a ledger entry exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    SignupBonus,
    Purchase,
    Usage,
    Refund,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::SignupBonus => "signup_bonus",
            TransactionKind::Purchase => "purchase",
            TransactionKind::Usage => "usage",
            TransactionKind::Refund => "refund",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    /// Whether entries of this kind take credits away
    pub fn is_debit(&self) -> bool {
        matches!(self, TransactionKind::Usage)
    }
}

/// Current balance of one user
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditBalance {
    pub user_id: Uuid,
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

/// One ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,

    /// Signed change: negative for usage
    pub amount: i64,

    pub balance_after: i64,

    /// Idempotency key, e.g. `usage:<generation id>` or `stripe:<session id>`
    pub source_id: String,

    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Ledger row to insert
#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_after: i64,
    pub source_id: String,
    pub description: Option<String>,
}

impl CreditBalance {
    /// Creates a zero balance row; no-op if one exists
    pub async fn ensure(conn: &mut PgConnection, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO credit_balances (user_id, balance) VALUES ($1, 0) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Reads the balance, 0 if the user has no balance row
    pub async fn get(pool: &PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM credit_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;

        Ok(row.map(|(b,)| b).unwrap_or(0))
    }

    /// Locks the balance row for the rest of the transaction
    pub async fn lock(conn: &mut PgConnection, user_id: Uuid) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM credit_balances WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(conn)
                .await?;

        Ok(row.map(|(b,)| b))
    }

    /// Overwrites the balance of a locked row
    pub async fn set(conn: &mut PgConnection, user_id: Uuid, balance: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE credit_balances SET balance = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(balance)
            .execute(conn)
            .await?;

        Ok(())
    }
}

impl CreditTransaction {
    /// Inserts a ledger row
    ///
    /// Returns `None` when `source_id` was already used, which callers treat as
    /// "already applied".
    pub async fn insert(
        conn: &mut PgConnection,
        data: NewCreditTransaction,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditTransaction>(
            r#"
            INSERT INTO credit_transactions
                (user_id, kind, amount, balance_after, source_id, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_id) DO NOTHING
            RETURNING id, user_id, kind, amount, balance_after, source_id, description, created_at
            "#,
        )
        .bind(data.user_id)
        .bind(data.kind)
        .bind(data.amount)
        .bind(data.balance_after)
        .bind(data.source_id)
        .bind(data.description)
        .fetch_optional(conn)
        .await
    }

    /// Looks up an entry by its idempotency key
    pub async fn find_by_source(
        conn: &mut PgConnection,
        source_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT id, user_id, kind, amount, balance_after, source_id, description, created_at
            FROM credit_transactions
            WHERE source_id = $1
            "#,
        )
        .bind(source_id)
        .fetch_optional(conn)
        .await
    }

    /// Lists a user's ledger, newest first
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT id, user_id, kind, amount, balance_after, source_id, description, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}

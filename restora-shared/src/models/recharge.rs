/// Credit recharges: one row per checkout attempt
///
/// A recharge is created as `pending` when a checkout session is opened and
/// moves once, to `paid` or `expired`, when the provider's webhook arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Recharge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RechargeStatus {
    Pending,
    Paid,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditRecharge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub credits: i64,
    pub amount_cents: i64,
    pub currency: String,
    pub provider_session_id: String,
    pub status: RechargeStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateRecharge {
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub credits: i64,
    pub amount_cents: i64,
    pub currency: String,
    pub provider_session_id: String,
}

const RECHARGE_COLUMNS: &str = "id, user_id, package_id, credits, amount_cents, currency, \
                                provider_session_id, status, created_at, paid_at";

impl CreditRecharge {
    /// Records a new pending recharge
    pub async fn create(pool: &PgPool, data: CreateRecharge) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO credit_recharges
                (user_id, package_id, credits, amount_cents, currency, provider_session_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            RECHARGE_COLUMNS
        );

        sqlx::query_as::<_, CreditRecharge>(&query)
            .bind(data.user_id)
            .bind(data.package_id)
            .bind(data.credits)
            .bind(data.amount_cents)
            .bind(data.currency)
            .bind(data.provider_session_id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_session(
        pool: &PgPool,
        session_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM credit_recharges WHERE provider_session_id = $1",
            RECHARGE_COLUMNS
        );

        sqlx::query_as::<_, CreditRecharge>(&query)
            .bind(session_id)
            .fetch_optional(pool)
            .await
    }

    /// Moves a pending recharge to `paid`
    ///
    /// Returns `None` if the recharge is unknown or already left `pending`, so a
    /// redelivered webhook is a no-op.
    pub async fn mark_paid(
        conn: &mut PgConnection,
        session_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE credit_recharges
            SET status = 'paid', paid_at = NOW()
            WHERE provider_session_id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            RECHARGE_COLUMNS
        );

        sqlx::query_as::<_, CreditRecharge>(&query)
            .bind(session_id)
            .fetch_optional(conn)
            .await
    }

    /// Moves a pending recharge to `expired`
    pub async fn mark_expired(pool: &PgPool, session_id: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE credit_recharges
            SET status = 'expired'
            WHERE provider_session_id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            RECHARGE_COLUMNS
        );

        sqlx::query_as::<_, CreditRecharge>(&query)
            .bind(session_id)
            .fetch_optional(pool)
            .await
    }
}

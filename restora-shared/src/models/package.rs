/// Credit package catalogue
///
/// Packages are seeded by migration and offered at `GET /v1/credits/packages`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// A purchasable bundle of credits
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditPackage {
    pub id: Uuid,
    pub name: String,
    pub credits: i64,
    pub price_cents: i64,

    /// ISO 4217 code, lowercase
    pub currency: String,

    /// Price id at the payment provider. Without one, checkout sends inline price data.
    #[serde(skip_serializing)]
    pub provider_price_id: Option<String>,

    pub active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

impl CreditPackage {
    /// Lists active packages in display order
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditPackage>(
            r#"
            SELECT id, name, credits, price_cents, currency, provider_price_id,
                   active, sort_order, created_at
            FROM credit_packages
            WHERE active
            ORDER BY sort_order, price_cents
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Finds an active package by id
    pub async fn find_active(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CreditPackage>(
            r#"
            SELECT id, name, credits, price_cents, currency, provider_price_id,
                   active, sort_order, created_at
            FROM credit_packages
            WHERE id = $1 AND active
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

/// Credit ledger operations
///
/// Balance changes always go through [`apply`], which inside one database
/// transaction:
///
/// 1. locks the user's balance row,
/// 2. skips the change if its `source_id` was already recorded,
/// 3. rejects debits that would take the balance below zero,
/// 4. inserts the ledger row and writes the new balance.
///
/// Source ids make every change idempotent: a webhook delivered twice or a
/// refund retried after a crash applies once.
///
/// | Change        | source_id                  |
/// |---------------|----------------------------|
/// | signup bonus  | `signup:<user id>`         |
/// | image usage   | `usage:<generation id>`    |
/// | refund        | `refund:<generation id>`   |
/// | purchase      | `checkout:<session id>`    |
///
/// # Example
///
/// ```no_run
/// use restora_shared::credits;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), credits::CreditError> {
/// let generation_id = Uuid::new_v4();
/// let mut tx = pool.begin().await?;
/// credits::debit_usage(&mut tx, user_id, generation_id, 1).await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::credit::{CreditBalance, CreditTransaction, NewCreditTransaction, TransactionKind};

#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    #[error("Insufficient credits: balance {balance}, required {required}")]
    Insufficient { balance: i64, required: i64 },

    #[error("Credit amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A requested balance change
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: Uuid,
    pub kind: TransactionKind,

    /// Unsigned amount; [`TransactionKind::is_debit`] decides the sign
    pub amount: i64,

    pub source_id: String,
    pub description: Option<String>,
}

/// What happened to a [`LedgerEntry`]
#[derive(Debug, Clone)]
pub enum LedgerOutcome {
    Applied(CreditTransaction),

    /// The source id was recorded before; nothing changed
    AlreadyApplied,
}

impl LedgerOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(self, LedgerOutcome::Applied(_))
    }
}

pub fn signup_source(user_id: Uuid) -> String {
    format!("signup:{}", user_id)
}

pub fn usage_source(generation_id: Uuid) -> String {
    format!("usage:{}", generation_id)
}

pub fn refund_source(generation_id: Uuid) -> String {
    format!("refund:{}", generation_id)
}

pub fn checkout_source(session_id: &str) -> String {
    format!("checkout:{}", session_id)
}

/// Applies one ledger entry
///
/// Must run inside a transaction; the balance row stays locked until it ends.
pub async fn apply(conn: &mut PgConnection, entry: LedgerEntry) -> Result<LedgerOutcome, CreditError> {
    if entry.amount <= 0 {
        return Err(CreditError::InvalidAmount(entry.amount));
    }

    CreditBalance::ensure(&mut *conn, entry.user_id).await?;
    let balance = CreditBalance::lock(&mut *conn, entry.user_id)
        .await?
        .unwrap_or(0);

    if CreditTransaction::find_by_source(&mut *conn, &entry.source_id)
        .await?
        .is_some()
    {
        tracing::debug!(source_id = %entry.source_id, "Ledger entry already applied");
        return Ok(LedgerOutcome::AlreadyApplied);
    }

    let delta = if entry.kind.is_debit() {
        -entry.amount
    } else {
        entry.amount
    };
    let balance_after = balance + delta;

    if balance_after < 0 {
        return Err(CreditError::Insufficient {
            balance,
            required: entry.amount,
        });
    }

    let inserted = CreditTransaction::insert(
        &mut *conn,
        NewCreditTransaction {
            user_id: entry.user_id,
            kind: entry.kind,
            amount: delta,
            balance_after,
            source_id: entry.source_id.clone(),
            description: entry.description,
        },
    )
    .await?;

    let Some(transaction) = inserted else {
        return Ok(LedgerOutcome::AlreadyApplied);
    };

    CreditBalance::set(&mut *conn, entry.user_id, balance_after).await?;

    tracing::info!(
        user_id = %entry.user_id,
        kind = entry.kind.as_str(),
        amount = delta,
        balance_after,
        source_id = %entry.source_id,
        "Applied credit change"
    );

    Ok(LedgerOutcome::Applied(transaction))
}

/// Grants the signup bonus; a zero bonus only creates the balance row
pub async fn grant_signup_bonus(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
) -> Result<LedgerOutcome, CreditError> {
    if amount == 0 {
        CreditBalance::ensure(conn, user_id).await?;
        return Ok(LedgerOutcome::AlreadyApplied);
    }

    apply(
        conn,
        LedgerEntry {
            user_id,
            kind: TransactionKind::SignupBonus,
            amount,
            source_id: signup_source(user_id),
            description: Some("Signup bonus".to_string()),
        },
    )
    .await
}

/// Charges credits for an image job
pub async fn debit_usage(
    conn: &mut PgConnection,
    user_id: Uuid,
    generation_id: Uuid,
    amount: i64,
) -> Result<LedgerOutcome, CreditError> {
    apply(
        conn,
        LedgerEntry {
            user_id,
            kind: TransactionKind::Usage,
            amount,
            source_id: usage_source(generation_id),
            description: Some(format!("Image generation {}", generation_id)),
        },
    )
    .await
}

/// Returns the credits charged for a failed image job
pub async fn refund_usage(
    conn: &mut PgConnection,
    user_id: Uuid,
    generation_id: Uuid,
    amount: i64,
) -> Result<LedgerOutcome, CreditError> {
    apply(
        conn,
        LedgerEntry {
            user_id,
            kind: TransactionKind::Refund,
            amount,
            source_id: refund_source(generation_id),
            description: Some(format!("Refund for failed generation {}", generation_id)),
        },
    )
    .await
}

/// Credits a paid checkout session
pub async fn grant_purchase(
    conn: &mut PgConnection,
    user_id: Uuid,
    session_id: &str,
    amount: i64,
    package_name: &str,
) -> Result<LedgerOutcome, CreditError> {
    apply(
        conn,
        LedgerEntry {
            user_id,
            kind: TransactionKind::Purchase,
            amount,
            source_id: checkout_source(session_id),
            description: Some(format!("Purchased {}", package_name)),
        },
    )
    .await
}

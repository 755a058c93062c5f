/// Payment provider abstraction and checkout fulfilment
///
/// [`PaymentProvider`] covers what the processor does for us: open a hosted
/// checkout session, authenticate webhook deliveries and open a billing
/// portal session. What we do with the result lives here, independent of the
/// provider: [`process_webhook_event`] moves the matching recharge out of
/// `pending` and credits the user, once.
///
/// Providers:
///
/// - [`stripe::StripeProvider`]: Stripe REST API
/// - [`dummy::DummyProvider`]: completes every checkout immediately, for development

pub mod dummy;
pub mod signature;
pub mod stripe;

use async_trait::async_trait;
use axum::http::HeaderMap;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::credits::{self, CreditError};
use crate::models::recharge::CreditRecharge;
use crate::models::user::User;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("User does not have a payment provider customer id")]
    NoCustomerId,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Credits(#[from] CreditError),
}

/// Provider selection
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Stripe(stripe::StripeConfig),
    Dummy,
}

/// Builds the configured provider
pub fn create_provider(config: ProviderConfig) -> Result<Arc<dyn PaymentProvider>> {
    Ok(match config {
        ProviderConfig::Stripe(config) => Arc::new(stripe::StripeProvider::new(config)?),
        ProviderConfig::Dummy => Arc::new(dummy::DummyProvider),
    })
}

/// Everything a provider needs to open a checkout session
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub email: String,

    /// Existing customer at the provider, if any
    pub customer_id: Option<String>,

    pub package_id: Uuid,
    pub package_name: String,
    pub credits: i64,
    pub amount_cents: i64,
    pub currency: String,

    /// Provider price id; inline price data is sent when absent
    pub provider_price_id: Option<String>,

    /// May contain `{CHECKOUT_SESSION_ID}`, substituted by the provider
    pub success_url: String,
    pub cancel_url: String,
}

/// A hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,

    /// Where to send the browser
    pub url: String,

    /// Customer id, when the provider already knows it
    pub customer_id: Option<String>,
}

/// Webhook event kinds we act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    CheckoutCompleted,
    CheckoutExpired,
    Other(String),
}

/// An authenticated webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub session_id: Option<String>,
    pub customer_id: Option<String>,

    /// Whether the session reports the payment as collected
    pub paid: bool,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Opens a hosted checkout session
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    /// Authenticates and decodes a webhook delivery
    ///
    /// Returns `Ok(None)` if this provider has no webhooks.
    fn parse_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Option<WebhookEvent>>;

    /// Opens a billing portal session and returns its URL
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String>;

    /// Whether checkout sessions are paid the moment they are created
    fn completes_immediately(&self) -> bool {
        false
    }
}

/// What [`process_webhook_event`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited { user_id: Uuid, credits: i64 },
    AlreadyProcessed,
    Expired,
    AwaitingPayment,
    UnknownSession,
    Ignored,
}

/// Applies a webhook event to recharges and balances
///
/// Safe to call any number of times for the same event.
pub async fn process_webhook_event(pool: &PgPool, event: &WebhookEvent) -> Result<WebhookOutcome> {
    let session_id = match (&event.kind, &event.session_id) {
        (WebhookEventKind::Other(kind), _) => {
            tracing::debug!(event_type = %kind, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }
        (_, None) => {
            return Err(PaymentError::InvalidData(
                "Checkout event without a session id".to_string(),
            ))
        }
        (_, Some(id)) => id.as_str(),
    };

    match event.kind {
        WebhookEventKind::CheckoutCompleted if !event.paid => {
            tracing::info!(session_id = %session_id, "Checkout completed but not yet paid");
            Ok(WebhookOutcome::AwaitingPayment)
        }
        WebhookEventKind::CheckoutCompleted => {
            fulfill_checkout(pool, session_id, event.customer_id.as_deref()).await
        }
        WebhookEventKind::CheckoutExpired => {
            match CreditRecharge::mark_expired(pool, session_id).await? {
                Some(recharge) => {
                    tracing::info!(
                        session_id = %session_id,
                        user_id = %recharge.user_id,
                        "Checkout session expired"
                    );
                    Ok(WebhookOutcome::Expired)
                }
                None => settled_or_unknown(pool, session_id).await,
            }
        }
        WebhookEventKind::Other(_) => Ok(WebhookOutcome::Ignored),
    }
}

/// Marks a recharge paid and credits its user in one transaction
pub async fn fulfill_checkout(
    pool: &PgPool,
    session_id: &str,
    customer_id: Option<&str>,
) -> Result<WebhookOutcome> {
    let mut tx = pool.begin().await?;

    let Some(recharge) = CreditRecharge::mark_paid(&mut tx, session_id).await? else {
        tx.rollback().await?;
        return settled_or_unknown(pool, session_id).await;
    };

    let package_name = format!("{} credits", recharge.credits);
    let outcome = credits::grant_purchase(
        &mut tx,
        recharge.user_id,
        session_id,
        recharge.credits,
        &package_name,
    )
    .await?;

    tx.commit().await?;

    if let Some(customer_id) = customer_id {
        User::set_stripe_customer_id(pool, recharge.user_id, customer_id).await?;
    }

    if !outcome.was_applied() {
        return Ok(WebhookOutcome::AlreadyProcessed);
    }

    tracing::info!(
        session_id = %session_id,
        user_id = %recharge.user_id,
        credits = recharge.credits,
        "Checkout fulfilled"
    );

    Ok(WebhookOutcome::Credited {
        user_id: recharge.user_id,
        credits: recharge.credits,
    })
}

async fn settled_or_unknown(pool: &PgPool, session_id: &str) -> Result<WebhookOutcome> {
    match CreditRecharge::find_by_session(pool, session_id).await? {
        Some(recharge) => {
            tracing::debug!(
                session_id = %session_id,
                status = ?recharge.status,
                "Recharge already settled"
            );
            Ok(WebhookOutcome::AlreadyProcessed)
        }
        None => {
            tracing::warn!(session_id = %session_id, "Webhook for unknown checkout session");
            Ok(WebhookOutcome::UnknownSession)
        }
    }
}

/// Payment endpoints
///
/// - `POST /v1/payments/checkout` - Open a checkout session for a package
/// - `POST /v1/payments/portal` - Open the billing portal
/// - `POST /v1/payments/webhook` - Provider webhook (public, signature checked)

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use restora_shared::{
    auth::middleware::AuthContext,
    models::{
        package::CreditPackage,
        recharge::{CreateRecharge, CreditRecharge},
        user::User,
    },
    payments::{self, CheckoutRequest, PaymentError, WebhookOutcome},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub package_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
}

/// Open a checkout session
///
/// ```text
/// POST /v1/payments/checkout
/// { "package_id": "..." }
/// ```
///
/// Records a pending recharge under the provider's session id. Credits are
/// granted when the provider reports the session paid, or right away for a
/// provider whose sessions complete immediately.
///
/// # Errors
///
/// - `404 Not Found`: Unknown or inactive package
/// - `502 Bad Gateway`: Provider rejected the request
pub async fn create_checkout(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<Json<CheckoutResponse>> {
    let package = CreditPackage::find_active(&state.db, body.package_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Credit package not found".to_string()))?;

    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let request = CheckoutRequest {
        user_id: user.id,
        email: user.email.clone(),
        customer_id: user.stripe_customer_id.clone(),
        package_id: package.id,
        package_name: package.name.clone(),
        credits: package.credits,
        amount_cents: package.price_cents,
        currency: package.currency.clone(),
        provider_price_id: package.provider_price_id.clone(),
        success_url: state.config.payments.success_url.clone(),
        cancel_url: state.config.payments.cancel_url.clone(),
    };

    let session = state.payments.create_checkout_session(&request).await?;

    CreditRecharge::create(
        &state.db,
        CreateRecharge {
            user_id: user.id,
            package_id: package.id,
            credits: package.credits,
            amount_cents: package.price_cents,
            currency: package.currency,
            provider_session_id: session.session_id.clone(),
        },
    )
    .await?;

    if let Some(customer_id) = &session.customer_id {
        User::set_stripe_customer_id(&state.db, user.id, customer_id).await?;
    }

    tracing::info!(
        user_id = %user.id,
        package_id = %package.id,
        session_id = %session.session_id,
        provider = state.payments.name(),
        "Checkout session created"
    );

    if state.payments.completes_immediately() {
        payments::fulfill_checkout(&state.db, &session.session_id, None).await?;
    }

    Ok(Json(CheckoutResponse {
        session_id: session.session_id,
        checkout_url: session.url,
    }))
}

/// Open the billing portal
///
/// # Errors
///
/// - `404 Not Found`: The user never completed a checkout
pub async fn create_portal(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<PortalResponse>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let customer_id = user.stripe_customer_id.ok_or(PaymentError::NoCustomerId)?;

    let url = state
        .payments
        .create_portal_session(&customer_id, &state.config.payments.portal_return_url)
        .await?;

    Ok(Json(PortalResponse { url }))
}

/// Provider webhook
///
/// Takes the raw body; the signature covers the exact bytes. Deliveries for
/// sessions we never created are acknowledged so the provider stops retrying.
///
/// # Errors
///
/// - `400 Bad Request`: Missing or invalid signature, malformed payload
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let Some(event) = state.payments.parse_webhook(&headers, &body)? else {
        return Ok(Json(WebhookResponse {
            received: true,
            outcome: "ignored",
        }));
    };

    let outcome = payments::process_webhook_event(&state.db, &event).await?;

    tracing::debug!(outcome = ?outcome, "Webhook processed");

    Ok(Json(WebhookResponse {
        received: true,
        outcome: outcome_label(&outcome),
    }))
}

fn outcome_label(outcome: &WebhookOutcome) -> &'static str {
    match outcome {
        WebhookOutcome::Credited { .. } => "credited",
        WebhookOutcome::AlreadyProcessed => "already_processed",
        WebhookOutcome::Expired => "expired",
        WebhookOutcome::AwaitingPayment => "awaiting_payment",
        WebhookOutcome::UnknownSession => "unknown_session",
        WebhookOutcome::Ignored => "ignored",
    }
}

/// Stripe payment provider over the REST API
///
/// Checkout sessions are created with `POST /v1/checkout/sessions` in
/// `payment` mode, portal sessions with `POST /v1/billing_portal/sessions`.
/// Webhooks are authenticated with [`super::signature::verify`].

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{
    signature, CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider, Result,
    WebhookEvent, WebhookEventKind,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,

    /// Accepted webhook clock difference in seconds
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            webhook_tolerance_secs: signature::DEFAULT_TOLERANCE_SECS,
        }
    }
}

pub struct StripeProvider {
    http: Client,
    config: StripeConfig,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::ProviderApi(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .basic_auth(&self.config.secret_key, Option::<&str>::None)
            .form(form)
            .send()
            .await
            .map_err(|e| PaymentError::ProviderApi(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(body);
            tracing::error!(status = status.as_u16(), path, message = %message, "Stripe request failed");
            return Err(PaymentError::ProviderApi(format!("HTTP {}: {}", status.as_u16(), message)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PaymentError::ProviderApi(format!("Unexpected Stripe response: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
    customer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortalResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

/// Form fields for a checkout session
fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("client_reference_id".into(), request.user_id.to_string()),
        ("metadata[user_id]".into(), request.user_id.to_string()),
        ("metadata[package_id]".into(), request.package_id.to_string()),
        ("line_items[0][quantity]".into(), "1".into()),
    ];

    match &request.provider_price_id {
        Some(price_id) => form.push(("line_items[0][price]".into(), price_id.clone())),
        None => {
            form.push(("line_items[0][price_data][currency]".into(), request.currency.clone()));
            form.push((
                "line_items[0][price_data][unit_amount]".into(),
                request.amount_cents.to_string(),
            ));
            form.push((
                "line_items[0][price_data][product_data][name]".into(),
                format!("{} ({} credits)", request.package_name, request.credits),
            ));
        }
    }

    match &request.customer_id {
        Some(customer_id) => form.push(("customer".into(), customer_id.clone())),
        None => {
            form.push(("customer_email".into(), request.email.clone()));
            form.push(("customer_creation".into(), "always".into()));
        }
    }

    form
}

/// Decodes a verified event body
fn decode_event(body: &[u8]) -> Result<WebhookEvent> {
    let payload: EventPayload = serde_json::from_slice(body)
        .map_err(|e| PaymentError::InvalidData(format!("Malformed event: {}", e)))?;

    let object = &payload.data.object;
    let str_field = |name: &str| object.get(name).and_then(|v| v.as_str()).map(str::to_string);

    let kind = match payload.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            WebhookEventKind::CheckoutCompleted
        }
        "checkout.session.expired" => WebhookEventKind::CheckoutExpired,
        other => WebhookEventKind::Other(other.to_string()),
    };

    Ok(WebhookEvent {
        kind,
        session_id: str_field("id"),
        customer_id: str_field("customer"),
        paid: matches!(
            str_field("payment_status").as_deref(),
            Some("paid") | Some("no_payment_required")
        ),
    })
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let session: SessionResponse = self
            .post_form("/v1/checkout/sessions", &checkout_form(request))
            .await?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::ProviderApi("Checkout session missing URL".to_string()))?;

        tracing::info!(
            session_id = %session.id,
            user_id = %request.user_id,
            "Created Stripe checkout session"
        );

        Ok(CheckoutSession {
            session_id: session.id,
            url,
            customer_id: session.customer,
        })
    }

    fn parse_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Option<WebhookEvent>> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PaymentError::InvalidSignature("Missing stripe-signature header".to_string()))?;

        signature::verify(
            header,
            body,
            &self.config.webhook_secret,
            self.config.webhook_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )?;

        decode_event(body).map(Some)
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        let portal: PortalResponse = self.post_form("/v1/billing_portal/sessions", &form).await?;
        Ok(portal.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(customer_id: Option<&str>, price_id: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            user_id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            customer_id: customer_id.map(str::to_string),
            package_id: Uuid::new_v4(),
            package_name: "Starter".to_string(),
            credits: 10,
            amount_cents: 499,
            currency: "usd".to_string(),
            provider_price_id: price_id.map(str::to_string),
            success_url: "https://app.example.com/billing?session_id={CHECKOUT_SESSION_ID}".to_string(),
            cancel_url: "https://app.example.com/billing?canceled=1".to_string(),
        }
    }

    fn provider_for(server: &MockServer) -> StripeProvider {
        let mut config = StripeConfig::new("sk_test_123", "whsec_test");
        config.api_base = server.uri();
        StripeProvider::new(config).unwrap()
    }

    fn field<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_checkout_form_inline_price_for_new_customer() {
        let req = request(None, None);
        let form = checkout_form(&req);

        assert_eq!(field(&form, "mode"), Some("payment"));
        assert_eq!(field(&form, "success_url"), Some(req.success_url.as_str()));
        assert_eq!(field(&form, "cancel_url"), Some(req.cancel_url.as_str()));
        assert_eq!(field(&form, "line_items[0][price_data][unit_amount]"), Some("499"));
        assert_eq!(field(&form, "customer_email"), Some("ada@example.com"));
        assert_eq!(field(&form, "customer"), None);
        assert_eq!(field(&form, "line_items[0][price]"), None);
    }

    #[test]
    fn test_checkout_form_existing_customer_and_price() {
        let form = checkout_form(&request(Some("cus_42"), Some("price_9")));
        assert_eq!(field(&form, "customer"), Some("cus_42"));
        assert_eq!(field(&form, "line_items[0][price]"), Some("price_9"));
        assert_eq!(field(&form, "customer_email"), None);
    }

    #[tokio::test]
    async fn test_create_checkout_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Basic c2tfdGVzdF8xMjM6"))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1",
                "customer": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = provider_for(&server)
            .create_checkout_session(&request(None, None))
            .await
            .unwrap();
        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_1");
        assert_eq!(session.customer_id, None);
    }

    #[tokio::test]
    async fn test_api_error_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/billing_portal/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "No such customer: 'cus_missing'" }
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .create_portal_session("cus_missing", "https://app.example.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No such customer"));
    }

    #[tokio::test]
    async fn test_create_portal_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/billing_portal/sessions"))
            .and(body_string_contains("customer=cus_42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "bps_1",
                "url": "https://billing.stripe.com/p/session/bps_1"
            })))
            .mount(&server)
            .await;

        let url = provider_for(&server)
            .create_portal_session("cus_42", "https://app.example.com/profile")
            .await
            .unwrap();
        assert_eq!(url, "https://billing.stripe.com/p/session/bps_1");
    }

    fn signed_headers(body: &[u8], secret: &str) -> HeaderMap {
        let t = chrono::Utc::now().timestamp();
        let sig = signature::compute_signature(secret, t, body).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&format!("t={},v1={}", t, sig)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_parse_completed_webhook() {
        let provider = StripeProvider::new(StripeConfig::new("sk", "whsec_test")).unwrap();
        let body = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "customer": "cus_42",
                "payment_status": "paid"
            }}
        })
        .to_string();

        let event = provider
            .parse_webhook(&signed_headers(body.as_bytes(), "whsec_test"), body.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, WebhookEventKind::CheckoutCompleted);
        assert_eq!(event.session_id.as_deref(), Some("cs_test_1"));
        assert_eq!(event.customer_id.as_deref(), Some("cus_42"));
        assert!(event.paid);
    }

    #[test]
    fn test_parse_webhook_rejects_bad_signature() {
        let provider = StripeProvider::new(StripeConfig::new("sk", "whsec_test")).unwrap();
        let body = br#"{"type":"checkout.session.completed","data":{"object":{}}}"#;

        let err = provider
            .parse_webhook(&signed_headers(body, "whsec_wrong"), body)
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));

        let err = provider.parse_webhook(&HeaderMap::new(), body).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
    }

    #[test]
    fn test_decode_other_events() {
        let event = decode_event(
            br#"{"type":"checkout.session.expired","data":{"object":{"id":"cs_2","payment_status":"unpaid"}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, WebhookEventKind::CheckoutExpired);
        assert!(!event.paid);

        let event = decode_event(br#"{"type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Other("invoice.paid".to_string()));
    }
}

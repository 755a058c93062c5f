/// Development payment provider
///
/// Every checkout session is paid the moment it is created, so the checkout
/// handler fulfils it right away and redirects straight to the success URL.
/// There are no webhooks and no billing portal beyond a redirect back.

use async_trait::async_trait;
use axum::http::HeaderMap;

use super::{CheckoutRequest, CheckoutSession, PaymentProvider, Result, WebhookEvent};

pub struct DummyProvider;

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let session_id = format!("dummy_{}", uuid::Uuid::new_v4().simple());
        let url = request.success_url.replace("{CHECKOUT_SESSION_ID}", &session_id);

        tracing::info!(
            session_id = %session_id,
            user_id = %request.user_id,
            "Dummy provider created checkout session"
        );

        Ok(CheckoutSession {
            session_id,
            url,
            customer_id: None,
        })
    }

    fn parse_webhook(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<Option<WebhookEvent>> {
        Ok(None)
    }

    async fn create_portal_session(&self, _customer_id: &str, return_url: &str) -> Result<String> {
        Ok(return_url.to_string())
    }

    fn completes_immediately(&self) -> bool {
        true
    }
}

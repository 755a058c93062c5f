//! Integration tests for the Restora API
//!
//! Drive the full router with `oneshot` against a real database:
//! - Registration, login and the session cookie
//! - Job submission: credits, vendor failures, validation, rate limiting
//! - Generation records and their status events
//! - Uploads: type and size validation, de-duplication
//! - Checkout with the dummy provider

mod common;

use axum::http::{header, StatusCode};
use common::{
    body_json, expect_status, get_request, json_request, png_bytes, upload_request, TestContext,
};
use restora_shared::models::credit::CreditBalance;
use restora_shared::models::generation::GenerationStatus;
use restora_shared::notify::GenerationUpdate;
use restora_worker::queue::GenerationQueue;
use serde_json::json;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn colorize_body() -> serde_json::Value {
    json!({
        "functionType": "colorization",
        "imageUrl": "https://cdn.example.com/photos/grandma.jpg",
        "prompt": ""
    })
}

#[tokio::test]
async fn test_health() {
    let Some(ctx) = TestContext::new().await else { return };

    let body = expect_status(ctx.send(get_request("/health", None)).await, StatusCode::OK).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_register_login_and_profile() {
    let Some(ctx) = TestContext::new().await else { return };
    let email = format!("Ada-{}@Example.com", Uuid::new_v4());

    let response = ctx
        .send(json_request(
            "POST",
            "/v1/auth/register",
            None,
            json!({ "email": email, "password": "restore-photos-1", "name": "Ada" }),
        ))
        .await;

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("access_token="));
    assert!(cookie.contains("HttpOnly"));

    let body = expect_status(response, StatusCode::CREATED).await;
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());

    // Same address in another case
    let duplicate = ctx
        .send(json_request(
            "POST",
            "/v1/auth/register",
            None,
            json!({ "email": email.to_uppercase(), "password": "restore-photos-1" }),
        ))
        .await;
    expect_status(duplicate, StatusCode::CONFLICT).await;

    let weak = ctx
        .send(json_request(
            "POST",
            "/v1/auth/register",
            None,
            json!({ "email": format!("weak-{}@example.com", Uuid::new_v4()), "password": "onlyletters" }),
        ))
        .await;
    expect_status(weak, StatusCode::UNPROCESSABLE_ENTITY).await;

    let wrong = ctx
        .send(json_request(
            "POST",
            "/v1/auth/login",
            None,
            json!({ "email": email, "password": "restore-photos-2" }),
        ))
        .await;
    expect_status(wrong, StatusCode::UNAUTHORIZED).await;

    let login = ctx
        .send(json_request(
            "POST",
            "/v1/auth/login",
            None,
            json!({ "email": email, "password": "restore-photos-1" }),
        ))
        .await;
    let tokens = expect_status(login, StatusCode::OK).await;
    let access_token = tokens["access_token"].as_str().unwrap().to_string();

    // Cookie only, no Authorization header
    let profile_request = axum::http::Request::builder()
        .uri("/v1/profile")
        .header(header::COOKIE, format!("theme=dark; access_token={}", access_token))
        .body(axum::body::Body::empty())
        .unwrap();
    let profile = expect_status(ctx.send(profile_request).await, StatusCode::OK).await;
    assert_eq!(profile["email"], email.to_lowercase());
    assert_eq!(profile["credits"], ctx.state.config.credits.signup_bonus);
    assert!(profile.get("password_hash").is_none());

    let updated = ctx
        .send(json_request(
            "PATCH",
            "/v1/profile",
            Some(&access_token),
            json!({ "name": "Ada Lovelace" }),
        ))
        .await;
    let updated = expect_status(updated, StatusCode::OK).await;
    assert_eq!(updated["name"], "Ada Lovelace");

    let bad_avatar = ctx
        .send(json_request(
            "PATCH",
            "/v1/profile",
            Some(&access_token),
            json!({ "avatar_url": "not a url" }),
        ))
        .await;
    expect_status(bad_avatar, StatusCode::UNPROCESSABLE_ENTITY).await;

    let refreshed = ctx
        .send(json_request(
            "POST",
            "/v1/auth/refresh",
            None,
            json!({ "refresh_token": tokens["refresh_token"] }),
        ))
        .await;
    let refreshed = expect_status(refreshed, StatusCode::OK).await;
    assert!(refreshed["access_token"].is_string());

    // An access token is not a refresh token
    let misuse = ctx
        .send(json_request(
            "POST",
            "/v1/auth/refresh",
            None,
            json!({ "refresh_token": access_token }),
        ))
        .await;
    expect_status(misuse, StatusCode::UNAUTHORIZED).await;

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_authentication_required() {
    let Some(ctx) = TestContext::new().await else { return };

    let response = ctx.send(get_request("/v1/profile", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = ctx
        .send(json_request("POST", "/api/image/process", Some("garbage"), colorize_body()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ctx.vendor.submissions.load(Ordering::SeqCst), 0);

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_insufficient_credits_rejected_before_vendor_call() {
    let Some(ctx) = TestContext::new().await else { return };
    let (user, token) = ctx.create_user(0).await;

    let response = ctx
        .send(json_request("POST", "/api/image/process", Some(&token), colorize_body()))
        .await;
    let body = expect_status(response, StatusCode::PAYMENT_REQUIRED).await;
    assert_eq!(body["error"], "payment_required");

    assert_eq!(ctx.vendor.submissions.load(Ordering::SeqCst), 0);
    assert_eq!(CreditBalance::get(&ctx.db, user.id).await.unwrap(), 0);

    let list = ctx.send(get_request("/v1/generations", Some(&token))).await;
    let list = expect_status(list, StatusCode::OK).await;
    assert_eq!(list["generations"].as_array().unwrap().len(), 0);

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_process_creates_pending_record() {
    let Some(ctx) = TestContext::new().await else { return };
    let (user, token) = ctx.create_user(2).await;

    let response = ctx
        .send(json_request("POST", "/api/image/process", Some(&token), colorize_body()))
        .await;
    let body = expect_status(response, StatusCode::ACCEPTED).await;

    assert_eq!(body["status"], "pending");
    assert!(body["task_id"].as_str().unwrap().starts_with("task-"));
    let id = body["id"].as_str().unwrap().to_string();

    assert_eq!(ctx.vendor.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(CreditBalance::get(&ctx.db, user.id).await.unwrap(), 1);

    let record = ctx
        .send(get_request(&format!("/v1/generations/{}", id), Some(&token)))
        .await;
    let record = expect_status(record, StatusCode::OK).await;
    assert_eq!(record["function_type"], "colorization");
    assert_eq!(record["credits_charged"], 1);
    assert_eq!(record["vendor_task_id"], body["task_id"]);
    // Blank prompt replaced by the function's default
    assert!(!record["prompt"].as_str().unwrap().is_empty());

    let transactions = ctx
        .send(get_request("/v1/credits/transactions", Some(&token)))
        .await;
    let transactions = expect_status(transactions, StatusCode::OK).await;
    let kinds: Vec<_> = transactions["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["kind"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(kinds, vec!["usage", "signup_bonus"]);

    // Someone else's record does not exist for them
    let (_, other_token) = ctx.create_user(0).await;
    let hidden = ctx
        .send(get_request(&format!("/v1/generations/{}", id), Some(&other_token)))
        .await;
    expect_status(hidden, StatusCode::NOT_FOUND).await;

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_vendor_failure_refunds_credits() {
    let Some(ctx) = TestContext::new().await else { return };
    let (user, token) = ctx.create_user(1).await;
    ctx.vendor.fail_submissions.store(true, Ordering::SeqCst);

    let response = ctx
        .send(json_request("POST", "/api/image/process", Some(&token), colorize_body()))
        .await;
    expect_status(response, StatusCode::SERVICE_UNAVAILABLE).await;

    assert_eq!(ctx.vendor.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(CreditBalance::get(&ctx.db, user.id).await.unwrap(), 1);

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_process_validation() {
    let Some(ctx) = TestContext::new().await else { return };
    let (user, token) = ctx.create_user(5).await;

    let unknown = ctx
        .send(json_request(
            "POST",
            "/api/image/process",
            Some(&token),
            json!({ "functionType": "sharpen", "imageUrl": "https://cdn.example.com/a.jpg" }),
        ))
        .await;
    let body = expect_status(unknown, StatusCode::UNPROCESSABLE_ENTITY).await;
    assert_eq!(body["details"][0]["field"], "functionType");

    let missing_prompt = ctx
        .send(json_request(
            "POST",
            "/api/image/process",
            Some(&token),
            json!({ "functionType": "description_edit", "imageUrl": "https://cdn.example.com/a.jpg", "prompt": "  " }),
        ))
        .await;
    let body = expect_status(missing_prompt, StatusCode::UNPROCESSABLE_ENTITY).await;
    assert_eq!(body["details"][0]["field"], "prompt");

    let bad_url = ctx
        .send(json_request(
            "POST",
            "/api/image/process",
            Some(&token),
            json!({ "functionType": "colorization", "imageUrl": "grandma.jpg" }),
        ))
        .await;
    expect_status(bad_url, StatusCode::UNPROCESSABLE_ENTITY).await;

    let long_url = ctx
        .send(json_request(
            "POST",
            "/api/image/process",
            Some(&token),
            json!({
                "functionType": "colorization",
                "imageUrl": format!("https://cdn.example.com/{}.jpg", "a".repeat(3000)),
            }),
        ))
        .await;
    let body = expect_status(long_url, StatusCode::UNPROCESSABLE_ENTITY).await;
    assert_eq!(body["details"][0]["field"], "image_url");

    assert_eq!(ctx.vendor.submissions.load(Ordering::SeqCst), 0);
    assert_eq!(CreditBalance::get(&ctx.db, user.id).await.unwrap(), 5);

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_submission_rate_limit() {
    let Some(ctx) = TestContext::with_config(|config| {
        config.rate_limit.submissions = 1;
        config.rate_limit.window_secs = 60;
    })
    .await
    else {
        return;
    };
    let (_, token) = ctx.create_user(5).await;

    let first = ctx
        .send(json_request("POST", "/api/image/process", Some(&token), colorize_body()))
        .await;
    assert_eq!(first.headers()["x-ratelimit-remaining"], "0");
    expect_status(first, StatusCode::ACCEPTED).await;

    let second = ctx
        .send(json_request("POST", "/api/image/process", Some(&token), colorize_body()))
        .await;
    assert!(second.headers().contains_key(header::RETRY_AFTER));
    expect_status(second, StatusCode::TOO_MANY_REQUESTS).await;

    assert_eq!(ctx.vendor.submissions.load(Ordering::SeqCst), 1);

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_generation_events() {
    let Some(ctx) = TestContext::new().await else { return };
    let (user, token) = ctx.create_user(2).await;

    // Finished record: one event, then the stream ends
    let first = expect_status(
        ctx.send(json_request("POST", "/api/image/process", Some(&token), colorize_body()))
            .await,
        StatusCode::ACCEPTED,
    )
    .await;
    let first_id: Uuid = first["id"].as_str().unwrap().parse().unwrap();

    let queue = GenerationQueue::new(ctx.db.clone(), 600);
    let resolution = queue
        .complete(first_id, "https://cdn.example.com/out.png")
        .await
        .unwrap();
    assert!(resolution.is_resolved());

    let response = ctx
        .send(get_request(&format!("/v1/generations/{}/events", first_id), Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    assert_eq!(text.matches("event: status").count(), 1);
    assert!(text.contains("\"status\":\"completed\""));
    assert!(text.contains("out.png"));

    // Pending record: current state first, then hub updates until terminal
    let second = expect_status(
        ctx.send(json_request("POST", "/api/image/process", Some(&token), colorize_body()))
            .await,
        StatusCode::ACCEPTED,
    )
    .await;
    let second_id: Uuid = second["id"].as_str().unwrap().parse().unwrap();

    let response = ctx
        .send(get_request(&format!("/v1/generations/{}/events", second_id), Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    for status in [GenerationStatus::Processing, GenerationStatus::Failed] {
        ctx.state.hub.dispatch(GenerationUpdate {
            id: second_id,
            user_id: user.id,
            status,
            result_url: None,
            error_message: None,
        });
    }

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    let statuses: Vec<_> = ["pending", "processing", "failed"]
        .iter()
        .map(|s| text.find(&format!("\"status\":\"{}\"", s)))
        .collect();
    assert!(statuses.iter().all(Option::is_some), "events: {}", text);
    assert!(statuses.windows(2).all(|w| w[0] < w[1]));

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_upload_validation_and_deduplication() {
    let Some(ctx) = TestContext::new().await else { return };
    let (user, token) = ctx.create_user(0).await;

    let rejected = ctx.send(upload_request(&token, "notes.txt", b"plain text, not an image")).await;
    expect_status(rejected, StatusCode::UNSUPPORTED_MEDIA_TYPE).await;

    let empty = ctx.send(upload_request(&token, "empty.png", b"")).await;
    expect_status(empty, StatusCode::BAD_REQUEST).await;

    let list = expect_status(ctx.send(get_request("/v1/uploads", Some(&token))).await, StatusCode::OK).await;
    assert_eq!(list["uploads"].as_array().unwrap().len(), 0);

    let image = png_bytes(7);
    let created = ctx.send(upload_request(&token, "../Grandma Portrait.png", &image)).await;
    let created = expect_status(created, StatusCode::CREATED).await;
    assert_eq!(created["created"], true);
    assert_eq!(created["content_type"], "image/png");

    let object_key = created["object_key"].as_str().unwrap();
    assert!(object_key.starts_with(&user.id.to_string()));
    assert!(created["public_url"].as_str().unwrap().ends_with(object_key));
    assert!(!created["file_name"].as_str().unwrap().contains('/'));

    let stored = tokio::fs::read(ctx.media_root.join(object_key)).await.unwrap();
    assert_eq!(stored, image);

    let again = ctx.send(upload_request(&token, "copy.png", &image)).await;
    let again = expect_status(again, StatusCode::OK).await;
    assert_eq!(again["created"], false);
    assert_eq!(again["id"], created["id"]);
    assert_eq!(again["file_name"], created["file_name"]);

    let list = expect_status(ctx.send(get_request("/v1/uploads", Some(&token))).await, StatusCode::OK).await;
    assert_eq!(list["uploads"].as_array().unwrap().len(), 1);

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_upload_size_limit() {
    let Some(ctx) = TestContext::with_config(|config| config.uploads.max_bytes = 16).await else {
        return;
    };
    let (_, token) = ctx.create_user(0).await;

    let response = ctx.send(upload_request(&token, "big.png", &png_bytes(1))).await;
    expect_status(response, StatusCode::PAYLOAD_TOO_LARGE).await;

    let list = expect_status(ctx.send(get_request("/v1/uploads", Some(&token))).await, StatusCode::OK).await;
    assert_eq!(list["uploads"].as_array().unwrap().len(), 0);

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_checkout_with_dummy_provider() {
    let Some(ctx) = TestContext::new().await else { return };
    let (user, token) = ctx.create_user(0).await;

    let packages = expect_status(ctx.send(get_request("/v1/credits/packages", None)).await, StatusCode::OK).await;
    let package = packages["packages"][0].clone();
    assert!(package.get("provider_price_id").is_none());
    let credits = package["credits"].as_i64().unwrap();

    let unknown = ctx
        .send(json_request(
            "POST",
            "/v1/payments/checkout",
            Some(&token),
            json!({ "package_id": Uuid::new_v4() }),
        ))
        .await;
    expect_status(unknown, StatusCode::NOT_FOUND).await;

    let checkout = ctx
        .send(json_request(
            "POST",
            "/v1/payments/checkout",
            Some(&token),
            json!({ "package_id": package["id"] }),
        ))
        .await;
    let checkout = expect_status(checkout, StatusCode::OK).await;

    let session_id = checkout["session_id"].as_str().unwrap();
    assert_eq!(
        checkout["checkout_url"],
        format!("http://localhost:3000/billing/success?session_id={}", session_id)
    );

    let balance = expect_status(ctx.send(get_request("/v1/credits/balance", Some(&token))).await, StatusCode::OK).await;
    assert_eq!(balance["balance"], credits);
    assert_eq!(CreditBalance::get(&ctx.db, user.id).await.unwrap(), credits);

    // No billing account with the dummy provider
    let portal = ctx
        .send(json_request("POST", "/v1/payments/portal", Some(&token), json!({})))
        .await;
    expect_status(portal, StatusCode::NOT_FOUND).await;

    ctx.cleanup().await;
}

#[tokio::test]
async fn test_webhook_ignored_without_provider_webhooks() {
    let Some(ctx) = TestContext::new().await else { return };

    let response = ctx
        .send(json_request(
            "POST",
            "/v1/payments/webhook",
            None,
            json!({ "type": "checkout.session.completed" }),
        ))
        .await;
    let body = body_json(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"], "ignored");

    ctx.cleanup().await;
}

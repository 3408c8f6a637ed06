mod common;

use std::collections::HashMap;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use ecotrack::db::services::{group_service, notification_service, user_service::OAuthIdentity};
use ecotrack::usage::range::start_of_day;
use ecotrack::web::create_axum_router;

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

async fn get(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    send(app, request(Method::GET, uri, token, None)).await
}

async fn post(app: &Router, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    send(app, request(Method::POST, uri, token, Some(body))).await
}

async fn put(app: &Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, request(Method::PUT, uri, Some(token), Some(body))).await
}

async fn app_with(verifier: StaticVerifier) -> (Router, TestApp) {
    let db = setup_db().await;
    let test_app = test_app(db, verifier);
    (create_axum_router(test_app.state.clone()), test_app)
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app_with(StaticVerifier::default()).await;
    let (status, body) = get(&app, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn register_verify_login_refresh_logout() {
    let (app, test_app) = app_with(StaticVerifier::default()).await;

    let registration = json!({
        "email": "Ana@Example.com",
        "password": "long-enough",
        "display_name": "Ana",
    });
    let (status, body) = post(&app, "/api/auth/register", None, registration).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "ana@example.com");
    assert_eq!(body["verified"], false);

    let login = json!({ "email": "ana@example.com", "password": "long-enough" });
    let (status, _) = post(&app, "/api/auth/login", None, login.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mails = test_app.mailer.messages();
    assert_eq!(mails.len(), 1);
    let code = code_after(&mails[0].body, "verification code is ");

    let bad_code = json!({ "email": "ana@example.com", "code": "zzzzzz" });
    let (status, _) = post(&app, "/api/auth/verify", None, bad_code).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let good_code = json!({ "email": "ana@example.com", "code": code });
    let (status, body) = post(&app, "/api/auth/verify", None, good_code).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/api/auth/login", None, Some(login)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("token=")));
    assert!(cookies.iter().any(|c| c.starts_with("refresh_token=")));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let session: Value = serde_json::from_slice(&bytes).unwrap();
    let access = session["token"].as_str().unwrap().to_string();
    let refresh = session["refresh_token"].as_str().unwrap().to_string();
    assert_eq!(session["expires_in"], 900);

    let (status, body) = get(&app, "/api/auth/me", Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Ana");

    // A refresh token is not a session token.
    let (status, _) = get(&app, "/api/auth/me", Some(&refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        post(&app, "/api/auth/refresh", None, json!({ "refresh_token": refresh })).await;
    assert_eq!(status, StatusCode::OK);
    let refreshed = body["refresh_token"].as_str().unwrap().to_string();

    let logout = request(Method::POST, "/api/auth/logout", Some(&access), None);
    let (status, _) = send(&app, logout).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        post(&app, "/api/auth/refresh", None, json!({ "refresh_token": refreshed })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn change_email_and_reset_password_over_http() {
    let (app, test_app) = app_with(StaticVerifier::default()).await;
    let db = &test_app.state.db_pool;
    let ana = create_user(db, "ana@example.com", true).await;
    create_user(db, "bo@example.com", true).await;
    let token = access_token(&ana);

    let change = json!({ "new_email": "ana@example.com", "password": PASSWORD });
    let (status, _) = post(&app, "/api/auth/change-email", None, change).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let taken = json!({ "new_email": "bo@example.com", "password": PASSWORD });
    let (status, _) = post(&app, "/api/auth/change-email", Some(&token), taken).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let change = json!({ "new_email": "ana@new.org", "password": PASSWORD });
    let (status, body) = post(&app, "/api/auth/change-email", Some(&token), change).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ana@new.org");
    assert_eq!(body["verified"], false);

    let code = code_after(&test_app.mailer.messages()[0].body, "verification code is ");
    let verify = json!({ "email": "ana@new.org", "code": code });
    let (status, _) = post(&app, "/api/auth/verify", None, verify).await;
    assert_eq!(status, StatusCode::OK);

    let forgot = json!({ "email": "ana@new.org" });
    let (status, _) = post(&app, "/api/auth/forgot-password", None, forgot).await;
    assert_eq!(status, StatusCode::OK);
    let mails = test_app.mailer.messages();
    assert_eq!(mails.len(), 2);
    let code = code_after(&mails[1].body, "reset code is ");

    let reset = json!({ "email": "ana@new.org", "code": code, "new_password": "fresh-password" });
    let (status, _) = post(&app, "/api/auth/reset-password", None, reset).await;
    assert_eq!(status, StatusCode::OK);

    let login = json!({ "email": "ana@new.org", "password": "fresh-password" });
    let (status, body) = post(&app, "/api/auth/login", None, login).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ana@new.org");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let (app, _) = app_with(StaticVerifier::default()).await;
    let (status, body) = get(&app, "/api/groups", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, _) = get(&app, "/api/groups", Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn device_usage_over_http() {
    let (app, test_app) = app_with(StaticVerifier::default()).await;
    let db = &test_app.state.db_pool;
    let owner = create_user(db, "owner@example.com", true).await;
    let stranger = create_user(db, "stranger@example.com", true).await;
    let token = access_token(&owner);

    let (status, body) = post(&app, "/api/groups", Some(&token), json!({ "name": "Home" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["is_admin"], true);
    let group_id = body["id"].as_i64().unwrap();

    let device = json!({ "id": "ET-0a1b", "name": "Sink", "location": "Kitchen" });
    let devices_uri = format!("/api/groups/{group_id}/devices");
    let (status, _) = post(&app, &devices_uri, Some(&token), device).await;
    assert_eq!(status, StatusCode::CREATED);

    let today = start_of_day(Utc::now().date_naive());
    for (total, flow) in [(10.0, 2.0), (15.0, 4.0)] {
        let reading = json!({
            "device_id": "ET-0a1b",
            "total_usage": total,
            "flow_rate": flow,
            "recorded_at": today.to_rfc3339(),
        });
        let (status, _) = post(&app, "/api/usage", None, reading).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let empty = json!({ "device_id": "ET-0a1b", "total_usage": 0.0 });
    let (status, body) = post(&app, "/api/usage", None, empty).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("greater than zero"));

    let (status, body) = get(&app, "/api/devices/ET-0a1b/usage?range=1d", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granularity"], "day");
    assert_eq!(body["buckets"][0]["total_usage"], 25.0);
    assert_eq!(body["buckets"][0]["average_flow"], 3.0);

    let (status, body) = get(&app, "/api/devices/ET-0a1b/usage?range=2w", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("2w"));

    let stranger_token = access_token(&stranger);
    let (status, _) = get(&app, "/api/devices/ET-0a1b/usage", Some(&stranger_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let share_uri = format!("/api/groups/{group_id}/usage-share");
    let (status, body) = get(&app, &share_uri, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["percentage"], 100.0);

    let (status, body) = get(&app, "/api/users/me/comparison", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_month_total"], 25.0);

    let device_uri = format!("/api/groups/{group_id}/devices/ET-0a1b");
    let (status, _) = send(&app, request(Method::DELETE, &device_uri, Some(&token), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = get(&app, "/api/devices/ET-0a1b/usage", Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn membership_over_http() {
    let (app, test_app) = app_with(StaticVerifier::default()).await;
    let db = &test_app.state.db_pool;
    let owner = create_user(db, "owner@example.com", true).await;
    let group = create_group(db, &owner, "Home").await;
    let token = access_token(&owner);
    let members_uri = format!("/api/groups/{}/members", group.id);

    let mut invited = Vec::new();
    for i in 0..3 {
        let member = create_user(db, &format!("m{i}@example.com"), true).await;
        let invite = json!({ "email": member.email });
        let (status, body) = post(&app, &members_uri, Some(&token), invite).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["invitation_sent"], true);
        invited.push(member);
    }
    assert_eq!(test_app.mailer.messages().len(), 3);
    assert!(test_app.mailer.messages()[0].subject.contains("Home"));

    let late = create_user(db, "late@example.com", true).await;
    let invite = json!({ "email": late.email });
    let (status, body) = post(&app, &members_uri, Some(&token), invite).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    // Regular members cannot manage the group.
    let member_token = access_token(&invited[0]);
    let locations_uri = format!("/api/groups/{}/locations", group.id);
    let location = json!({ "location": "Garage" });
    let (status, _) = post(&app, &locations_uri, Some(&member_token), location).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let edit_uri = format!("/api/groups/{}/members/{}", group.id, invited[0].id);
    let (status, body) = put(&app, &edit_uri, &token, json!({ "action": "PROMOTE" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("PROMOTE"));

    let (status, body) = put(&app, &edit_uri, &token, json!({ "action": "ADMIN_PERMS" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["membership"]["is_admin"], true);

    let (status, body) = get(&app, &members_uri, Some(&member_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 4);

    let (status, body) = put(&app, &edit_uri, &token, json!({ "action": "REMOVE" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["membership"].is_null());
    assert!(group_service::ensure_member(db, group.id, invited[0].id).await.is_err());

    let self_uri = format!("/api/groups/{}/members/{}", group.id, owner.id);
    let (status, _) = put(&app, &self_uri, &token, json!({ "action": "MEMBER_PERMS" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn sweep_digest_and_notifications_over_http() {
    let (app, test_app) = app_with(StaticVerifier::default()).await;
    let db = &test_app.state.db_pool;
    let owner = create_user(db, "owner@example.com", true).await;
    let group = create_group(db, &owner, "Home").await;
    create_device(db, &group, "ET-01", "Shower").await;
    let token = access_token(&owner);

    let now = Utc::now();
    let today = start_of_day(now.date_naive());
    let yesterday = (today - Duration::days(1)).date_naive();
    notification_service::upsert_snapshot(db, "ET-01", yesterday, 10.0, false, now)
        .await
        .unwrap();
    insert_reading(db, "ET-01", 10.0, 1.0, today - Duration::hours(12)).await;
    insert_reading(db, "ET-01", 20.0, 1.0, today).await;

    let sweep = request(Method::POST, "/api/notifications/sweep", Some(&token), None);
    let (status, body) = send(&app, sweep).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["threshold"], 100.0);

    let sweep = request(Method::POST, "/api/notifications/sweep", Some(&token), None);
    let (status, body) = send(&app, sweep).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = get(&app, "/api/notifications?limit=5", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = get(&app, "/api/notifications/digest", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["title"], "Home | Shower | Kitchen");
    assert_eq!(body[0]["direction"], "increase");
}

#[tokio::test]
async fn analysis_over_http() {
    let (app, test_app) = app_with(StaticVerifier::default()).await;
    let db = &test_app.state.db_pool;
    let owner = create_user(db, "owner@example.com", true).await;
    let group = create_group(db, &owner, "Home").await;
    create_device(db, &group, "ET-01", "Shower").await;
    let token = access_token(&owner);
    let uri = format!("/api/groups/{}/analysis", group.id);

    let (status, _) = get(&app, &uri, Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    insert_reading(db, "ET-01", 12.0, 1.0, Utc::now() - Duration::days(1)).await;
    let (status, body) = get(&app, &uri, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"], "Usage looks steady (1 readings)");
    assert_eq!(body["readings_analyzed"], 1);

    let (status, body) = get(&app, "/api/users/me/analysis", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["readings_analyzed"], 1);
}

#[tokio::test]
async fn oauth_login_over_http() {
    let mut identities = HashMap::new();
    identities.insert(
        "good-token".to_string(),
        OAuthIdentity {
            provider: "google".to_string(),
            provider_id: "g-1".to_string(),
            email: "gigi@example.com".to_string(),
            display_name: None,
        },
    );
    let (app, _) = app_with(StaticVerifier { identities }).await;

    let good = json!({ "id_token": "good-token" });
    let (status, body) = post(&app, "/api/auth/oauth/google", None, good.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "gigi@example.com");
    assert_eq!(body["user"]["verified"], true);
    assert_eq!(body["user"]["display_name"], "gigi");

    let forged = json!({ "id_token": "forged" });
    let (status, _) = post(&app, "/api/auth/oauth/google", None, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post(&app, "/api/auth/oauth/github", None, good).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

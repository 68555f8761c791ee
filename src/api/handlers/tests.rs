#![allow(clippy::unwrap_used)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::test_support::{test_app, PASSWORD};
use crate::{
    clock::Clock,
    two_factor::{service::tests::code_for, SecretSetup},
};

const CLIENT_IP: &str = "203.0.113.10";

fn login_body(email: &str, password: &str, device_uid: Option<&str>) -> Value {
    json!({ "email": email, "password": password, "device_uid": device_uid })
}

#[tokio::test]
async fn health_reports_database_and_propagates_request_id() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-123");
    assert!(response.headers().contains_key("x-app"));

    let (status, body) = app.call(Method::GET, "/health", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn request_id_is_generated_when_missing() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(ulid::Ulid::from_string(id).is_ok());
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/openapi.json", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/auth/login"].is_object());
    assert_eq!(body["info"]["title"], "custodia");
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let app = test_app();
    for uri in [
        "/remote-auth/activities",
        "/two-factor/status",
        "/trusted-devices",
        "/trusted-devices/fingerprints",
        "/notifications",
    ] {
        let (status, body) = app.call(Method::GET, uri, None, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["error"], "unauthorized");
    }
    let (status, _) = app
        .call(Method::GET, "/remote-auth/activities", Some("not.a.jwt"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_from_new_device_raises_alert_without_trusting_it() {
    let app = test_app();
    app.store.add_user("alice@example.com", PASSWORD).unwrap();

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("alice@example.com", PASSWORD, Some("laptop-1"))),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    let token = body["access_token"].as_str().unwrap().to_string();

    let (status, activities) = app
        .call(Method::GET, "/remote-auth/activities", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activities.as_array().unwrap().len(), 1);
    assert_eq!(activities[0]["ip"], CLIENT_IP);
    assert!(activities[0]["logout_at"].is_null());

    let (_, alerts) = app
        .call(Method::GET, "/trusted-devices/alerts", Some(&token), None, None)
        .await;
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["action"], "pending");
    assert_eq!(alerts[0]["device_uid"], "laptop-1");

    let (_, trusted) = app
        .call(Method::GET, "/trusted-devices", Some(&token), None, None)
        .await;
    assert!(trusted.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn wrong_passwords_escalate_to_captcha() {
    let app = test_app();
    app.store.add_user("carol@example.com", PASSWORD).unwrap();

    for _ in 0..3 {
        let (status, body) = app
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(login_body("carol@example.com", "wrong", None)),
                Some(CLIENT_IP),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("carol@example.com", PASSWORD, None)),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "captcha_required");

    let (status, captcha) = app
        .call(Method::POST, "/captcha", None, Some(json!({ "kind": "text" })), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let mut request = login_body("carol@example.com", PASSWORD, None);
    request["captcha"] = json!({
        "challenge_id": captcha["challenge_id"],
        "answer": captcha["prompt"],
    });

    let (status, body) = app
        .call(Method::POST, "/auth/login", None, Some(request), Some(CLIENT_IP))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["refresh_token"].is_string());
}

#[tokio::test]
async fn captcha_cannot_be_solved_twice() {
    let app = test_app();
    let (_, captcha) = app
        .call(Method::POST, "/captcha", None, Some(json!({ "kind": "text" })), None)
        .await;
    let answer = json!({
        "challenge_id": captcha["challenge_id"],
        "answer": captcha["prompt"],
    });

    let (status, body) = app
        .call(Method::POST, "/captcha/verify", None, Some(answer.clone()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = app
        .call(Method::POST, "/captcha/verify", None, Some(answer), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_used");
}

#[tokio::test]
async fn honeypot_login_blocks_the_address() {
    let app = test_app();
    app.store.add_user("dave@example.com", PASSWORD).unwrap();
    app.services
        .bot
        .add_honeypot("Bait@Example.com", 5)
        .await
        .unwrap();

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("bait@example.com", "anything", None)),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("dave@example.com", PASSWORD, None)),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "blocked");

    app.clock.advance(Duration::days(3650));
    assert!(app.services.bot.is_blocked(CLIENT_IP).await);
}

#[tokio::test]
async fn forwarded_for_from_untrusted_peer_cannot_escape_a_block() {
    let app = test_app();
    app.store.add_user("erin@example.com", PASSWORD).unwrap();
    app.services
        .bot
        .block_ip("203.0.113.9", "manual", None, true)
        .await
        .unwrap();

    let (status, body) = app
        .call_from(
            "203.0.113.9:50000",
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("erin@example.com", PASSWORD, None)),
            Some("198.51.100.77"),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "blocked");

    // The same header is honoured when our load balancer sets it.
    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("erin@example.com", PASSWORD, None)),
            Some("198.51.100.77"),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_reset_failures() {
    let app = test_app();
    app.store.add_user("fay@example.com", PASSWORD).unwrap();

    for hop in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        let (status, _) = app
            .call_from(
                "203.0.113.20:41000",
                Method::POST,
                "/auth/login",
                None,
                Some(login_body("fay@example.com", "wrong", None)),
                Some(hop),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = app
        .call_from(
            "203.0.113.20:41001",
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("fay@example.com", PASSWORD, None)),
            Some("198.51.100.4"),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "captcha_required");
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let app = test_app();
    let (_, token) = app.signed_in("erin@example.com").await;
    let (status, body) = app
        .call(Method::GET, "/admin/blocked-ips", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn admin_block_then_list_shows_temporary_block() {
    let app = test_app();
    let (_, token) = app.signed_in("root@admin.custodia.test").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/admin/block-ip",
            Some(&token),
            Some(json!({ "ip": "1.2.3.4", "permanent": false, "duration": 2 })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, blocks) = app
        .call(Method::GET, "/admin/blocked-ips", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let blocks = blocks.as_array().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0]["ip"], "1.2.3.4");
    assert_eq!(blocks[0]["permanent"], false);
    let until: DateTime<Utc> =
        serde_json::from_value(blocks[0]["blocked_until"].clone()).unwrap();
    let expected = app.clock.now() + Duration::hours(2);
    assert!((until - expected).num_seconds().abs() <= 1);

    let (status, _) = app
        .call(
            Method::POST,
            "/admin/unblock-ip",
            Some(&token),
            Some(json!({ "ip": "1.2.3.4" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = app
        .call(
            Method::POST,
            "/admin/unblock-ip",
            Some(&token),
            Some(json!({ "ip": "1.2.3.4" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn admin_block_rejects_invalid_input() {
    let app = test_app();
    let (_, token) = app.signed_in("root@admin.custodia.test").await;
    for body in [
        json!({ "ip": "999.1.1.1" }),
        json!({ "ip": "1.2.3.4", "duration_hours": 0 }),
    ] {
        let (status, response) = app
            .call(Method::POST, "/admin/block-ip", Some(&token), Some(body), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "invalid_request");
    }
}

#[tokio::test]
async fn two_factor_login_from_unknown_device_then_trusted() {
    let app = test_app();
    let (_, token) = app.signed_in("frank@example.com").await;

    let (status, setup) = app
        .call(Method::POST, "/two-factor/setup", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let setup: SecretSetup = serde_json::from_value(setup).unwrap();
    let code = code_for(&setup, app.clock.as_ref());

    let (status, enabled) = app
        .call(
            Method::POST,
            "/two-factor/verify",
            Some(&token),
            Some(json!({ "code": code })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(enabled["recovery_codes"].as_array().unwrap().len(), 8);

    let (status, pending) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("frank@example.com", PASSWORD, Some("phone-1"))),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(pending["two_factor_required"], true);

    let (status, session) = app
        .call(
            Method::POST,
            "/auth/login/two-factor",
            None,
            Some(json!({
                "challenge_id": pending["challenge_id"],
                "code": code_for(&setup, app.clock.as_ref()),
                "device_uid": "phone-1",
                "trust_device": true,
            })),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{session}");
    assert!(session["access_token"].is_string());

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("frank@example.com", PASSWORD, Some("phone-1"))),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, status_body) = app
        .call(Method::GET, "/two-factor/status", Some(&token), None, None)
        .await;
    assert_eq!(status_body["state"], "enabled");
    assert_eq!(status_body["recovery_codes_remaining"], 8);
}

#[tokio::test]
async fn two_factor_login_without_device_id_requires_challenge() {
    let app = test_app();
    let (_, token) = app.signed_in("gina@example.com").await;
    let (_, setup) = app
        .call(Method::POST, "/two-factor/setup", Some(&token), None, None)
        .await;
    let setup: SecretSetup = serde_json::from_value(setup).unwrap();
    let (status, _) = app
        .call(
            Method::POST,
            "/two-factor/verify",
            Some(&token),
            Some(json!({ "code": code_for(&setup, app.clock.as_ref()) })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("gina@example.com", PASSWORD, None)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["challenge_id"].is_string());
}

#[tokio::test]
async fn wrong_second_factor_counts_as_failed_login() {
    let app = test_app();
    let (user_id, token) = app.signed_in("hank@example.com").await;
    let (_, setup) = app
        .call(Method::POST, "/two-factor/setup", Some(&token), None, None)
        .await;
    let setup: SecretSetup = serde_json::from_value(setup).unwrap();
    let (status, _) = app
        .call(
            Method::POST,
            "/two-factor/verify",
            Some(&token),
            Some(json!({ "code": code_for(&setup, app.clock.as_ref()) })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, pending) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("hank@example.com", PASSWORD, None)),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    for _ in 0..3 {
        let (status, _) = app
            .call(
                Method::POST,
                "/auth/login/two-factor",
                None,
                Some(json!({
                    "challenge_id": pending["challenge_id"],
                    "code": "not-a-recovery-code",
                })),
                Some(CLIENT_IP),
            )
            .await;
        assert!(
            status == StatusCode::UNAUTHORIZED || status == StatusCode::GONE,
            "{status}"
        );
    }

    let failures: Vec<_> = app
        .store
        .login_attempts()
        .into_iter()
        .filter(|a| !a.success && a.user_id == Some(user_id))
        .collect();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|a| a.email == "hank@example.com"));

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("hank@example.com", PASSWORD, None)),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "captcha_required");
}

#[tokio::test]
async fn unknown_challenge_is_an_invalid_code() {
    let app = test_app();
    let (status, body) = app
        .call(
            Method::POST,
            "/two-factor/complete-challenge",
            None,
            Some(json!({ "challenge_id": uuid::Uuid::new_v4(), "code": "123456" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_code");
}

#[tokio::test]
async fn refresh_tokens_rotate_and_work_once() {
    let app = test_app();
    app.store.add_user("hank@example.com", PASSWORD).unwrap();
    let (_, session) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("hank@example.com", PASSWORD, Some("tablet"))),
            None,
        )
        .await;
    let refresh = json!({ "refresh_token": session["refresh_token"] });

    let (status, rotated) = app
        .call(Method::POST, "/auth/refresh", None, Some(refresh.clone()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["refresh_token"], session["refresh_token"]);

    let (status, body) = app
        .call(Method::POST, "/auth/refresh", None, Some(refresh), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn deactivate_is_scoped_to_the_owner() {
    let app = test_app();
    app.store.add_user("ivan@example.com", PASSWORD).unwrap();
    let (_, session) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(login_body("ivan@example.com", PASSWORD, None)),
            None,
        )
        .await;
    let owner_token = session["access_token"].as_str().unwrap().to_string();
    let (_, intruder_token) = app.signed_in("judy@example.com").await;
    let request = json!({ "session_id": session["session_id"] });

    let (status, body) = app
        .call(
            Method::POST,
            "/remote-auth/deactivate",
            Some(&intruder_token),
            Some(request.clone()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = app
        .call(
            Method::POST,
            "/remote-auth/deactivate",
            Some(&owner_token),
            Some(request),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, activities) = app
        .call(Method::GET, "/remote-auth/activities", Some(&owner_token), None, None)
        .await;
    assert!(activities.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn trusted_device_crud_and_confirmation() {
    let app = test_app();
    let (_, token) = app.signed_in("kate@example.com").await;

    let (status, detection) = app
        .call(
            Method::POST,
            "/trusted-devices/detect",
            Some(&token),
            Some(json!({ "device_uid": "desk-1", "location": "Lisbon" })),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detection["unknown"], true);
    let alert_id = detection["alert"]["id"].clone();

    let confirm = json!({ "alert_id": alert_id, "is_trusted": true });
    let (status, alert) = app
        .call(
            Method::POST,
            "/trusted-devices/confirm",
            Some(&token),
            Some(confirm.clone()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alert["action"], "allowed");
    assert_eq!(alert["confirmed_by"], "user");

    let (status, again) = app
        .call(Method::POST, "/trusted-devices/confirm", Some(&token), Some(confirm), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again, alert);

    let (_, check) = app
        .call(
            Method::GET,
            "/trusted-devices/check?device_uid=desk-1",
            Some(&token),
            None,
            None,
        )
        .await;
    assert_eq!(check["trusted"], true);

    let (status, _) = app
        .call(
            Method::DELETE,
            "/trusted-devices?device_uid=desk-1",
            Some(&token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .call(
            Method::DELETE,
            "/trusted-devices?device_uid=desk-1",
            Some(&token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notification_preferences_are_scoped_to_the_owner() {
    let app = test_app();
    let (_, token) = app.signed_in("lena@example.com").await;
    let (_, other_token) = app.signed_in("mia@example.com").await;

    let (status, _) = app
        .call(Method::GET, "/notifications", None, None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let new_login = json!({ "event": "new_login", "channel": "email" });
    let (status, created) = app
        .call(
            Method::POST,
            "/notifications",
            Some(&token),
            Some(new_login.clone()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["enabled"], true);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(Method::POST, "/notifications", Some(&token), Some(new_login), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let uri = format!("/notifications/{id}");
    let off = json!({ "enabled": false });
    let (status, _) = app
        .call(Method::PUT, &uri, Some(&other_token), Some(off.clone()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, updated) = app
        .call(Method::PUT, &uri, Some(&token), Some(off.clone()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["enabled"], false);

    let (status, _) = app
        .call(Method::PUT, "/notifications/not-a-uuid", Some(&token), Some(off), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, mine) = app
        .call(Method::GET, "/notifications", Some(&token), None, None)
        .await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["enabled"], false);
    let (_, theirs) = app
        .call(Method::GET, "/notifications", Some(&other_token), None, None)
        .await;
    assert!(theirs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn fingerprint_endpoints_track_sightings() {
    let app = test_app();
    let (_, token) = app.signed_in("nora@example.com").await;

    let (status, first) = app
        .call(
            Method::POST,
            "/trusted-devices/fingerprints",
            Some(&token),
            Some(json!({ "fingerprint": "canvas:9f2e", "device_uid": "tablet-1" })),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["first_seen"], true);
    assert_eq!(first["device_changed"], false);

    let (_, moved) = app
        .call(
            Method::POST,
            "/trusted-devices/fingerprints",
            Some(&token),
            Some(json!({ "fingerprint": "canvas:9f2e", "device_uid": "tablet-2" })),
            Some(CLIENT_IP),
        )
        .await;
    assert_eq!(moved["first_seen"], false);
    assert_eq!(moved["device_changed"], true);

    let (status, _) = app
        .call(
            Method::POST,
            "/trusted-devices/fingerprints",
            Some(&token),
            Some(json!({ "fingerprint": "   " })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listed) = app
        .call(Method::GET, "/trusted-devices/fingerprints", Some(&token), None, None)
        .await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["seen_count"], 2);
    assert_eq!(listed[0]["device_uid"], "tablet-2");
}

#[tokio::test]
async fn fingerprint_under_new_device_id_requires_second_factor() {
    let app = test_app();
    let (_, token) = app.signed_in("olga@example.com").await;
    for uid in ["phone-1", "phone-2"] {
        let (status, _) = app
            .call(
                Method::POST,
                "/trusted-devices",
                Some(&token),
                Some(json!({ "device_uid": uid })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (_, setup) = app
        .call(Method::POST, "/two-factor/setup", Some(&token), None, None)
        .await;
    let setup: SecretSetup = serde_json::from_value(setup).unwrap();
    let (status, _) = app
        .call(
            Method::POST,
            "/two-factor/verify",
            Some(&token),
            Some(json!({ "code": code_for(&setup, app.clock.as_ref()) })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let login = |uid: &str| {
        json!({
            "email": "olga@example.com",
            "password": PASSWORD,
            "device_uid": uid,
            "fingerprint": "webgl:77ab",
        })
    };
    let (status, _) = app
        .call(Method::POST, "/auth/login", None, Some(login("phone-1")), Some(CLIENT_IP))
        .await;
    assert_eq!(status, StatusCode::OK);

    // phone-2 is trusted too, but the fingerprint was last seen on phone-1.
    let (status, pending) = app
        .call(Method::POST, "/auth/login", None, Some(login("phone-2")), Some(CLIENT_IP))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(pending["two_factor_required"], true);
}

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use mapstead::config::Config;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Bootstrap admin seeded by the initial migration
const ADMIN_USERNAME: &str = "admin";
const ADMIN_PASSWORD: &str = "changeme";

async fn spawn_app() -> Router {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    // Minimal Argon2 params so hashing stays fast under test
    config.security.argon2_memory_cost_kib = 64;
    config.security.argon2_time_cost = 1;
    config.security.argon2_parallelism = 1;
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    config.uploads.photos_path = std::env::temp_dir()
        .join(format!(
            "mapstead-test-photos-{}-{nonce}",
            std::process::id()
        ))
        .to_string_lossy()
        .into_owned();

    let state = mapstead::api::create_app_state_from_config(config)
        .await
        .expect("Failed to create app state");
    mapstead::api::router(state).await
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    cookie: Option<&str>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let session_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).to_string());

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json, session_cookie)
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, _, cookie) = send_json(
        app,
        "POST",
        "/api/login",
        Some(json!({"username": username, "password": password})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    cookie.expect("login should set a session cookie")
}

async fn mint_invite(app: &Router, cookie: &str) -> String {
    let (status, body, _) = send_json(app, "POST", "/api/invite", None, Some(cookie)).await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_registration_flow() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;
    let token = mint_invite(&app, &admin_cookie).await;

    // Missing fields
    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "", "password": "", "invite_token": &token})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    // Unknown token
    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "bob", "password": "pw123", "invite_token": "nope"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    // Success: session payload + session cookie
    let (status, body, cookie) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "bob", "password": "pw123", "invite_token": &token})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["username"], "bob");
    assert_eq!(body["data"]["is_admin"], false);
    let bob_cookie = cookie.expect("registration should establish a session");

    // The session works immediately
    let (status, body, _) = send_json(&app, "GET", "/api/me", None, Some(&bob_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "bob");

    // Same token again, different username
    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "carol", "password": "pw456", "invite_token": &token})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already been used"));

    // Taken username with a fresh token
    let fresh = mint_invite(&app, &admin_cookie).await;
    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "bob", "password": "other", "invite_token": &fresh})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already taken"));
}

#[tokio::test]
async fn test_login_does_not_leak_account_existence() {
    let app = spawn_app().await;

    let (status, wrong_pw, _) = send_json(
        &app,
        "POST",
        "/api/login",
        Some(json!({"username": ADMIN_USERNAME, "password": "wrong"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, unknown, _) = send_json(
        &app,
        "POST",
        "/api/login",
        Some(json!({"username": "who-is-this", "password": "wrong"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Same undifferentiated error shape for both
    assert_eq!(wrong_pw["error"], unknown["error"]);
}

#[tokio::test]
async fn test_invite_revocation() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;
    let token = mint_invite(&app, &admin_cookie).await;

    // Revoke while unused
    let (status, body, _) = send_json(
        &app,
        "DELETE",
        &format!("/api/admin/invite/{token}"),
        None,
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], true);

    // Registration with the revoked token fails, no account is created
    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "dave", "password": "pw", "invite_token": &token})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("revoked"));

    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/login",
        Some(json!({"username": "dave", "password": "pw"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A used token cannot be revoked
    let used = mint_invite(&app, &admin_cookie).await;
    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "erin", "password": "pw123", "invite_token": &used})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = send_json(
        &app,
        "DELETE",
        &format!("/api/admin/invite/{used}"),
        None,
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Ledger shows exactly one used, one revoked
    let (status, body, _) =
        send_json(&app, "GET", "/api/admin/invites", None, Some(&admin_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let invites = body["data"].as_array().unwrap();
    assert_eq!(invites.len(), 2);
    assert_eq!(
        invites
            .iter()
            .filter(|i| i["used_by"] == "erin" && i["revoked"] == false)
            .count(),
        1
    );
    assert_eq!(
        invites
            .iter()
            .filter(|i| i["revoked"] == true && i["used_by"].is_null())
            .count(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_redemption_admits_exactly_one() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;
    let token = mint_invite(&app, &admin_cookie).await;

    let attempt = |username: &str| {
        send_json(
            &app,
            "POST",
            "/api/register",
            Some(json!({"username": username, "password": "pw", "invite_token": &token})),
            None,
        )
    };

    let (a, b, c, d) = tokio::join!(
        attempt("racer0"),
        attempt("racer1"),
        attempt("racer2"),
        attempt("racer3")
    );

    let results = [a, b, c, d];
    let successes = results
        .iter()
        .filter(|(status, _, _)| *status == StatusCode::CREATED)
        .count();
    let losers = results
        .iter()
        .filter(|(status, body, _)| {
            *status == StatusCode::BAD_REQUEST
                && body["error"]
                    .as_str()
                    .is_some_and(|e| e.contains("no longer available"))
        })
        .count();

    assert_eq!(successes, 1);
    assert_eq!(losers, 3);

    // Exactly one racer account exists
    let (status, body, _) =
        send_json(&app, "GET", "/api/admin/users", None, Some(&admin_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let racers = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|u| {
            u["username"]
                .as_str()
                .is_some_and(|name| name.starts_with("racer"))
        })
        .count();
    assert_eq!(racers, 1);
}

#[tokio::test]
async fn test_auth_and_admin_gates() {
    let app = spawn_app().await;

    // No session
    let (status, _, _) = send_json(&app, "GET", "/api/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Regular member cannot reach admin routes
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;
    let token = mint_invite(&app, &admin_cookie).await;
    let (_, _, cookie) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "frank", "password": "pw123", "invite_token": &token})),
        None,
    )
    .await;
    let frank_cookie = cookie.unwrap();

    let (status, _, _) = send_json(&app, "GET", "/api/admin/users", None, Some(&frank_cookie)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // But members can mint invites
    let (status, _, _) = send_json(&app, "POST", "/api/invite", None, Some(&frank_cookie)).await;
    assert_eq!(status, StatusCode::OK);

    // Logout invalidates the session
    let (status, _, _) = send_json(&app, "POST", "/api/logout", None, Some(&frank_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send_json(&app, "GET", "/api/me", None, Some(&frank_cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_profile_update_and_member_list() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;
    let token = mint_invite(&app, &admin_cookie).await;
    let (_, _, cookie) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "grace", "password": "pw123", "invite_token": &token})),
        None,
    )
    .await;
    let grace_cookie = cookie.unwrap();

    let (status, body, _) = send_json(
        &app,
        "PUT",
        "/api/user/grace",
        Some(json!({
            "full_name": "Grace H.",
            "location": "Portland, OR",
            "latitude": 45.5152,
            "longitude": -122.6784,
            "marker_color": "green",
            "username": "ignored-rename"
        })),
        Some(&grace_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Username is immutable; unknown body fields are ignored
    assert_eq!(body["data"]["username"], "grace");
    assert_eq!(body["data"]["coordinates"]["lat"], 45.5152);
    assert_eq!(body["data"]["marker_color"], "green");

    // Invalid marker color
    let (status, _, _) = send_json(
        &app,
        "PUT",
        "/api/user/grace",
        Some(json!({"marker_color": "plaid"})),
        Some(&grace_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Member list reflects the update
    let (status, body, _) = send_json(&app, "GET", "/api/users", None, Some(&grace_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let grace = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["username"] == "grace")
        .unwrap();
    assert_eq!(grace["full_name"], "Grace H.");
    assert_eq!(grace["location"], "Portland, OR");

    // Editing someone else requires admin
    let (status, _, _) = send_json(
        &app,
        "PUT",
        "/api/user/admin",
        Some(json!({"full_name": "Hijacked"})),
        Some(&grace_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send_json(
        &app,
        "PUT",
        "/api/user/grace",
        Some(json!({"full_name": "Grace Hopper"})),
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Password change requires the current password
    let (status, _, _) = send_json(
        &app,
        "PUT",
        "/api/user/grace/password",
        Some(json!({"current_password": "nope", "new_password": "longenough"})),
        Some(&grace_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send_json(
        &app,
        "PUT",
        "/api/user/grace/password",
        Some(json!({"current_password": "pw123", "new_password": "longenough"})),
        Some(&grace_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let _ = login(&app, "grace", "longenough").await;
}

#[tokio::test]
async fn test_calendar_events() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    let token = mint_invite(&app, &admin_cookie).await;
    let (_, _, cookie) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "henry", "password": "pw123", "invite_token": &token})),
        None,
    )
    .await;
    let henry_cookie = cookie.unwrap();

    // Community potluck, personal reminder
    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/events",
        Some(json!({
            "title": "Summer Potluck",
            "event_date": "2026-08-15",
            "event_time": "18:00",
            "location": "The park",
            "visibility": "community"
        })),
        Some(&henry_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let potluck_id = body["data"]["id"].as_i64().unwrap();

    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/events",
        Some(json!({
            "title": "Water the plants",
            "event_date": "2026-08-20",
            "visibility": "personal"
        })),
        Some(&henry_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Bad date is rejected
    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/events",
        Some(json!({"title": "Bad", "event_date": "August 20th"})),
        Some(&henry_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Owner sees both; another member only sees the community event
    let (_, body, _) = send_json(
        &app,
        "GET",
        "/api/events?month=2026-08",
        None,
        Some(&henry_cookie),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body, _) = send_json(
        &app,
        "GET",
        "/api/events?month=2026-08",
        None,
        Some(&admin_cookie),
    )
    .await;
    let visible = body["data"].as_array().unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["title"], "Summer Potluck");

    // Another month is empty
    let (_, body, _) = send_json(
        &app,
        "GET",
        "/api/events?month=2026-09",
        None,
        Some(&henry_cookie),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    // Unpadded months are rejected, not silently empty
    for month in ["2026-8", "2026", "2026-13", "26-08", "2026-8-15"] {
        let (status, _, _) = send_json(
            &app,
            "GET",
            &format!("/api/events?month={month}"),
            None,
            Some(&henry_cookie),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "month '{month}'");
    }

    // Only owner or admin may edit
    let other_token = mint_invite(&app, &admin_cookie).await;
    let (_, _, cookie) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "iris", "password": "pw123", "invite_token": &other_token})),
        None,
    )
    .await;
    let iris_cookie = cookie.unwrap();

    let (status, _, _) = send_json(
        &app,
        "PUT",
        &format!("/api/events/{potluck_id}"),
        Some(json!({"title": "Hijacked", "event_date": "2026-08-15"})),
        Some(&iris_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin may delete anyone's event
    let (status, _, _) = send_json(
        &app,
        "DELETE",
        &format!("/api/events/{potluck_id}"),
        None,
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send_json(
        &app,
        "DELETE",
        &format!("/api/events/{potluck_id}"),
        None,
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_export_import_and_delete() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    let token = mint_invite(&app, &admin_cookie).await;
    let (status, _, _) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "judy", "password": "pw123", "invite_token": &token})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Export includes password hashes, never plaintext
    let (status, export, _) =
        send_json(&app, "GET", "/api/admin/export", None, Some(&admin_cookie)).await;
    assert_eq!(status, StatusCode::OK);
    let users = export["data"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    let judy = users.iter().find(|u| u["username"] == "judy").unwrap();
    let hash = judy["password_hash"].as_str().unwrap();
    assert!(hash.starts_with("$argon2"));
    assert!(!hash.contains("pw123"));

    // Merge-import a new member carrying judy's hash; they can then log in
    // with judy's password
    let (status, body, _) = send_json(
        &app,
        "POST",
        "/api/admin/import",
        Some(json!({
            "users": [{"username": "kate", "password_hash": hash, "marker_color": "blue"}],
            "mode": "merge"
        })),
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 3);

    let _ = login(&app, "kate", "pw123").await;

    // Delete judy; the invite she redeemed keeps its back-reference
    let (status, _, _) = send_json(
        &app,
        "DELETE",
        "/api/admin/user/judy",
        None,
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body, _) =
        send_json(&app, "GET", "/api/admin/invites", None, Some(&admin_cookie)).await;
    let invites = body["data"].as_array().unwrap();
    assert_eq!(invites[0]["used_by"], "judy");

    // Admins cannot delete themselves
    let (status, _, _) = send_json(
        &app,
        "DELETE",
        "/api/admin/user/admin",
        None,
        Some(&admin_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_photo_upload() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;
    let token = mint_invite(&app, &admin_cookie).await;
    let (_, _, cookie) = send_json(
        &app,
        "POST",
        "/api/register",
        Some(json!({"username": "liam", "password": "pw123", "invite_token": &token})),
        None,
    )
    .await;
    let liam_cookie = cookie.unwrap();

    let boundary = "MapsteadTestBoundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"photo\"; filename=\"me.png\"\r\n\
         Content-Type: {}\r\n\r\n\
         fake-png-bytes\r\n\
         --{boundary}--\r\n",
        mime::IMAGE_PNG
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/user/liam/photo")
                .header(header::COOKIE, &liam_cookie)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body_json: Value = serde_json::from_slice(&bytes).unwrap();
    let photo = body_json["data"]["photo"].as_str().unwrap();
    assert!(photo.starts_with("/photos/"));
    assert!(photo.ends_with(".png"));

    // Delete clears the reference
    let (status, body, _) = send_json(
        &app,
        "DELETE",
        "/api/user/liam/photo",
        None,
        Some(&liam_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["photo"].is_null());
}

#[tokio::test]
async fn test_photo_upload_honors_configured_size_cap() {
    let app = spawn_app().await;
    let admin_cookie = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;

    let boundary = "MapsteadTestBoundary";
    let upload = |payload: Vec<u8>| {
        let prefix = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"photo\"; filename=\"big.png\"\r\n\
             Content-Type: {}\r\n\r\n",
            mime::IMAGE_PNG
        );
        let suffix = format!("\r\n--{boundary}--\r\n");
        let body = [prefix.as_bytes(), &payload, suffix.as_bytes()].concat();

        let request = Request::builder()
            .method("POST")
            .uri("/api/user/admin/photo")
            .header(header::COOKIE, &admin_cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(request)
    };

    // 3 MiB is over axum's 2 MiB default but under the configured 5 MiB cap
    let response = upload(vec![0x7f; 3 * 1024 * 1024]).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 6 MiB is over the cap
    let response = upload(vec![0x7f; 6 * 1024 * 1024]).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::ServiceExt;

use joyride::auth::AuthService;
use joyride::clock::FixedClock;
use joyride::config::parse_windows;
use joyride::engine::{Engine, SlotGenerator, DEFAULT_STORE_TIMEOUT};
use joyride::http::{router, AppState};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("joyride_test_api");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct TestApp {
    router: Router,
    clock: Arc<FixedClock>,
}

/// 06:00-07:30 every 30 minutes, clock at 2024-06-01 05:00, admin "ops".
async fn app(name: &str) -> TestApp {
    serve(test_wal_path(name), DEFAULT_STORE_TIMEOUT).await
}

/// The same club over whatever log already sits at `path`.
async fn serve(path: PathBuf, store_timeout: Duration) -> TestApp {
    let now = NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(5, 0, 0)
        .unwrap();
    let clock = Arc::new(FixedClock::new(now));
    let slots = SlotGenerator::new(parse_windows("06:00-07:30/30").unwrap());
    let engine = Arc::new(Engine::open(path, slots, clock.clone(), store_timeout).unwrap());
    let auth = Arc::new(AuthService::new(engine.clone(), Duration::from_secs(3600)));
    auth.ensure_admin("ops", "ops-secret").await.unwrap();
    TestApp {
        router: router(AppState { engine, auth }),
        clock,
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        self.call_with(method, uri, token, body, &[]).await
    }

    async fn call_with(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn register(&self, username: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "hunter22",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn admin_token(&self) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"username": "ops", "password": "ops-secret"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["role"], "ADMIN");
        body["token"].as_str().unwrap().to_string()
    }

    async fn open_day(&self, date: &str) {
        let admin = self.admin_token().await;
        let (status, body) = self
            .call(
                Method::POST,
                &format!("/api/admin/availability?date={date}&isAvailable=true"),
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    async fn book(&self, token: &str, slot: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/bookings",
            Some(token),
            Some(json!({"bookingDateTime": slot, "notes": "crosswind practice"})),
        )
        .await
    }
}

#[tokio::test]
async fn health_is_public() {
    let app = app("health.wal").await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn register_then_login() {
    let app = app("register_login.wal").await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "username": "maverick",
                "email": "mav@example.com",
                "password": "topgun!",
                "phoneNumber": "+15550100",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["username"], "maverick");
    assert_eq!(body["email"], "mav@example.com");
    assert_eq!(body["role"], "USER");
    assert!(body["token"].as_str().unwrap().len() >= 32);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "maverick", "password": "topgun!"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "maverick", "password": "wrong-one"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn logout_revokes_token() {
    let app = app("logout.wal").await;
    let token = app.register("viper").await;
    let (status, _) = app.call(Method::POST, "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call(Method::GET, "/api/bookings/my-bookings", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registration_rejects_bad_input_and_duplicates() {
    let app = app("register_rejects.wal").await;
    let bad = [
        json!({"username": "ab", "email": "ab@example.com", "password": "hunter22"}),
        json!({"username": "goose", "email": "no-at-sign", "password": "hunter22"}),
        json!({"username": "goose", "email": "goose@example.com", "password": "123"}),
    ];
    for body in bad {
        let (status, resp) = app.call(Method::POST, "/api/auth/register", None, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{resp}");
    }

    app.register("goose").await;
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "goose", "email": "other@example.com", "password": "hunter22"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn booking_routes_require_a_token() {
    let app = app("requires_token.wal").await;
    let (status, body) = app
        .call(Method::GET, "/api/bookings/available-slots?date=2024-06-01", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .call(Method::GET, "/api/bookings/my-bookings", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_reject_plain_users() {
    let app = app("admin_forbidden.wal").await;
    let user = app.register("iceman").await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/admin/availability?date=2024-06-01&isAvailable=true",
            Some(&user),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app
        .call(Method::GET, "/api/admin/bookings?date=2024-06-01", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn book_list_and_cancel_flow() {
    let app = app("booking_flow.wal").await;
    app.open_day("2024-06-01").await;
    let user = app.register("rooster").await;

    let (status, body) = app
        .call(Method::GET, "/api/bookings/available-slots?date=2024-06-01", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!(["2024-06-01T06:00:00", "2024-06-01T06:30:00", "2024-06-01T07:00:00"])
    );

    let (status, booking) = app.book(&user, "2024-06-01T06:30:00").await;
    assert_eq!(status, StatusCode::OK, "{booking}");
    assert_eq!(booking["bookingDateTime"], "2024-06-01T06:30:00");
    assert_eq!(booking["status"], "CONFIRMED");
    assert_eq!(booking["username"], "rooster");
    assert_eq!(booking["notes"], "crosswind practice");
    let id = booking["id"].as_str().unwrap().to_string();

    let (_, body) = app
        .call(Method::GET, "/api/bookings/available-slots?date=2024-06-01", Some(&user), None)
        .await;
    assert_eq!(body, json!(["2024-06-01T06:00:00", "2024-06-01T07:00:00"]));

    let (status, mine) = app.call(Method::GET, "/api/bookings/my-bookings", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/bookings/{id}"), Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, mine) = app.call(Method::GET, "/api/bookings/my-bookings", Some(&user), None).await;
    assert_eq!(mine[0]["status"], "CANCELLED");
    let (_, body) = app
        .call(Method::GET, "/api/bookings/available-slots?date=2024-06-01", Some(&user), None)
        .await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn reservation_errors_map_to_codes() {
    let app = app("reservation_errors.wal").await;
    let user = app.register("phoenix").await;
    let other = app.register("bob_floyd").await;

    let (status, body) = app.book(&user, "2024-06-01T06:00:00").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "DAY_CLOSED");

    app.open_day("2024-06-01").await;

    let (status, body) = app.book(&user, "2024-06-01T06:15:00").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SLOT");

    let (status, _) = app.book(&user, "2024-06-01T06:00:00").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.book(&other, "2024-06-01T06:00:00").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert!(body["error"].as_str().is_some());

    app.clock.set(
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(6, 45, 0)
            .unwrap(),
    );
    let (status, body) = app.book(&other, "2024-06-01T06:30:00").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PAST_SLOT");
}

#[tokio::test]
async fn malformed_input_is_a_json_bad_request() {
    let app = app("malformed_input.wal").await;
    let user = app.register("sundown").await;
    app.open_day("2024-06-01").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/bookings",
            Some(&user),
            Some(json!({"bookingDateTime": "not-a-date"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(body["error"].as_str().is_some());

    let (status, body) = app
        .call(Method::POST, "/api/bookings", Some(&user), Some(json!({"notes": "no slot"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = app
        .call(Method::GET, "/api/bookings/available-slots?date=2024-13-99", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = app
        .call(Method::DELETE, "/api/bookings/123", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "BAD_REQUEST");

    // Nothing was booked along the way.
    let (_, body) = app
        .call(Method::GET, "/api/bookings/available-slots?date=2024-06-01", Some(&user), None)
        .await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn abandoned_wal_append_is_service_unavailable() {
    let path = test_wal_path("abandoned_append.wal");
    {
        let app = serve(path.clone(), DEFAULT_STORE_TIMEOUT).await;
        app.register("maverick").await;
        app.open_day("2024-06-01").await;
    }

    // A zero timeout gives up before the writer task ever runs.
    let app = serve(path, Duration::ZERO).await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "maverick", "password": "hunter22"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app.book(&token, "2024-06-01T06:00:00").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

    let (_, body) = app
        .call(Method::GET, "/api/bookings/my-bookings", Some(&token), None)
        .await;
    assert_eq!(body, json!([]));
    let (_, body) = app
        .call(Method::GET, "/api/bookings/available-slots?date=2024-06-01", Some(&token), None)
        .await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn cancel_rules_over_http() {
    let app = app("cancel_rules.wal").await;
    app.open_day("2024-06-01").await;
    let owner = app.register("hangman").await;
    let stranger = app.register("payback").await;
    let admin = app.admin_token().await;

    let (_, booking) = app.book(&owner, "2024-06-01T07:00:00").await;
    let uri = format!("/api/bookings/{}", booking["id"].as_str().unwrap());

    let (status, body) = app.call(Method::DELETE, &uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app.call(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call(Method::DELETE, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let missing = format!("/api/bookings/{}", ulid::Ulid::new());
    let (status, body) = app.call(Method::DELETE, &missing, Some(&owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn idempotency_key_header_returns_same_booking() {
    let app = app("idempotency_header.wal").await;
    app.open_day("2024-06-01").await;
    let user = app.register("fanboy").await;
    let body = json!({"bookingDateTime": "2024-06-01T06:00:00"});

    let (status, first) = app
        .call_with(Method::POST, "/api/bookings", Some(&user), Some(body.clone()), &[("Idempotency-Key", "abc")])
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = app
        .call_with(Method::POST, "/api/bookings", Some(&user), Some(body), &[("Idempotency-Key", "abc")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
}

#[tokio::test]
async fn admin_availability_and_daily_bookings() {
    let app = app("admin_views.wal").await;
    let admin = app.admin_token().await;

    let (status, row) = app
        .call(
            Method::POST,
            "/api/admin/availability?date=2024-06-02&isAvailable=true",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row, json!({"availableDate": "2024-06-02", "available": true}));

    let (status, rows) = app
        .call(
            Method::GET,
            "/api/admin/availability?startDate=2024-06-01&endDate=2024-06-03",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        rows,
        json!([
            {"availableDate": "2024-06-01", "available": false},
            {"availableDate": "2024-06-02", "available": true},
            {"availableDate": "2024-06-03", "available": false},
        ])
    );

    let (status, body) = app
        .call(
            Method::GET,
            "/api/admin/availability?startDate=2024-06-03&endDate=2024-06-01",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let user = app.register("coyote").await;
    app.book(&user, "2024-06-02T07:00:00").await;
    app.book(&user, "2024-06-02T06:00:00").await;

    let (status, daily) = app
        .call(Method::GET, "/api/admin/bookings?date=2024-06-02", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let daily = daily.as_array().unwrap();
    assert_eq!(daily.len(), 2);
    assert_eq!(daily[0]["bookingDateTime"], "2024-06-02T06:00:00");
    assert_eq!(daily[0]["username"], "coyote");
    assert_eq!(daily[1]["bookingDateTime"], "2024-06-02T07:00:00");
}

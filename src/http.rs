//! REST surface consumed by the booking client. Every route except `/health`
//! lives under `/api`; all booking and admin routes need a bearer token.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, MatchedPath, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{async_trait, Json, Router};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::auth::{AuthError, AuthService, Registration, Session};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub auth: Arc<AuthService>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/logout", post(logout))
        .route("/bookings", post(create_booking))
        .route("/bookings/available-slots", get(available_slots))
        .route("/bookings/my-bookings", get(my_bookings))
        .route("/bookings/:id", delete(cancel_booking))
        .route("/admin/availability", post(set_availability).get(get_availability))
        .route("/admin/bookings", get(daily_bookings));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Error returned by every handler; renders as `{"error", "code"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, "{}", self.message);
        }
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let (status, code) = match &e {
            EngineError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            EngineError::InvalidSlot(_) => (StatusCode::BAD_REQUEST, "INVALID_SLOT"),
            EngineError::PastSlot(_) => (StatusCode::BAD_REQUEST, "PAST_SLOT"),
            EngineError::DayClosed(_) => (StatusCode::BAD_REQUEST, "DAY_CLOSED"),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EngineError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            EngineError::AlreadyExists(_) => (StatusCode::BAD_REQUEST, "ALREADY_EXISTS"),
            EngineError::Invalid(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            EngineError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::Unauthenticated => {
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", e.to_string())
            }
            AuthError::NotAdmin => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", e.to_string()),
            AuthError::Invalid(_) => Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string()),
            AuthError::Engine(inner) => inner.into(),
            AuthError::Hashing(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", rejection.body_text())
    }
}

// ── Extractors ───────────────────────────────────────────────────

/// `Json` whose rejection renders as an `ApiError`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` whose rejection renders as an `ApiError`.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// `Path` whose rejection renders as an `ApiError`.
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Any authenticated caller.
pub struct CurrentUser(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::Unauthenticated)?;
        Ok(CurrentUser(state.auth.authenticate(token)?))
    }
}

/// An authenticated caller with the ADMIN role.
pub struct AdminUser(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(session) = CurrentUser::from_request_parts(parts, state).await?;
        if !session.is_admin() {
            return Err(AuthError::NotAdmin.into());
        }
        Ok(AdminUser(session))
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub username: String,
    pub email: String,
    pub role: &'static str,
}

impl From<Session> for AuthResponse {
    fn from(s: Session) -> Self {
        Self {
            role: s.role.as_str(),
            token: s.token,
            username: s.username,
            email: s.email,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub booking_date_time: SlotTime,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: Ulid,
    pub booking_date_time: SlotTime,
    pub status: &'static str,
    pub notes: Option<String>,
    pub username: Option<String>,
    pub created_at: NaiveDateTime,
}

impl BookingResponse {
    fn new(booking: Booking, username: Option<String>) -> Self {
        Self {
            id: booking.id,
            booking_date_time: booking.slot,
            status: booking.status.as_str(),
            notes: booking.notes,
            username,
            created_at: booking.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: CalendarDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAvailabilityQuery {
    pub date: CalendarDate,
    pub is_available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQuery {
    pub start_date: CalendarDate,
    pub end_date: CalendarDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub available_date: CalendarDate,
    pub available: bool,
}

impl From<DayAvailability> for AvailabilityResponse {
    fn from(d: DayAvailability) -> Self {
        Self {
            available_date: d.date,
            available: d.open,
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let session = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(session.into()))
}

async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let session = state
        .auth
        .register(Registration {
            username: req.username,
            email: req.email,
            password: req.password,
            phone_number: req.phone_number,
        })
        .await?;
    Ok(Json(session.into()))
}

async fn logout(State(state): State<AppState>, CurrentUser(session): CurrentUser) -> StatusCode {
    state.auth.logout(&session.token);
    StatusCode::NO_CONTENT
}

async fn available_slots(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    ApiQuery(q): ApiQuery<DateQuery>,
) -> Json<Vec<SlotTime>> {
    Json(state.engine.list_available_slots(q.date).await)
}

async fn create_booking(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    headers: HeaderMap,
    ApiJson(req): ApiJson<BookingRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let booking = state
        .engine
        .create_booking(session.user_id, req.booking_date_time, req.notes, idempotency_key)
        .await?;
    Ok(Json(BookingResponse::new(booking, Some(session.username))))
}

async fn my_bookings(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Json<Vec<BookingResponse>> {
    let bookings = state
        .engine
        .my_bookings(session.user_id)
        .into_iter()
        .map(|b| BookingResponse::new(b, Some(session.username.clone())))
        .collect();
    Json(bookings)
}

async fn cancel_booking(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    ApiPath(id): ApiPath<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.cancel_booking(id, session.requester()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_availability(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    ApiQuery(q): ApiQuery<SetAvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let row = state.engine.set_availability(q.date, q.is_available).await?;
    Ok(Json(row.into()))
}

async fn get_availability(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    ApiQuery(q): ApiQuery<RangeQuery>,
) -> Result<Json<Vec<AvailabilityResponse>>, ApiError> {
    let rows = state.engine.get_availability(q.start_date, q.end_date)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn daily_bookings(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    ApiQuery(q): ApiQuery<DateQuery>,
) -> Json<Vec<BookingResponse>> {
    let bookings = state
        .engine
        .daily_bookings(q.date)
        .await
        .into_iter()
        .map(|b| {
            let username = state.engine.users.username(b.user_id);
            BookingResponse::new(b, username)
        })
        .collect();
    Json(bookings)
}

// ── Middleware ───────────────────────────────────────────────────

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    response
}

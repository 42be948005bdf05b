mod acl;
pub mod attendance;
pub mod auth;
mod config;
mod error;
pub mod password;
pub mod push;
pub mod registration;

use crate::server::auth::AuthCtx;
use axum::http::{HeaderName, HeaderValue};
use axum::extract::rejection::JsonRejection;
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{get, post},
};
pub use config::{AppConfig, BootstrapAdmin, ConfigError, PushConfig};
pub use error::AppError;
use pickup_shared::api;
use pickup_shared::auth::StaffRole;
use push::PushService;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
    /// `None` when push is disabled or misconfigured.
    pub push: Option<PushService>,
    shutdown: CancellationToken,
    dummy_hash: Arc<str>,
}

impl AppState {
    pub fn new(config: AppConfig, store: crate::storage::Store) -> Self {
        let push = PushService::from_config(&config);
        if push.is_none() {
            tracing::info!("push: notifications disabled");
        }
        let dummy_hash = password::dummy_hash(config.bcrypt_cost).into();
        Self {
            config,
            store,
            push,
            shutdown: CancellationToken::new(),
            dummy_hash,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/auth/register", post(api_register))
        .route("/api/auth/registerBulk", post(api_register_bulk))
        .route("/api/qr/scan", post(api_qr_scan))
        .route(
            "/api/admin/users",
            get(api_admin_list_users).post(api_admin_create_user),
        )
        .route("/api/admin/childs", get(api_admin_present_children))
        .route("/api/child", get(api_list_children))
        .route("/api/child/{id}", get(api_get_child))
        .route("/api/parent/dashboard", get(api_parent_dashboard))
        .route("/api/parent/history", get(api_parent_history))
        .route("/api/parent/password", post(api_parent_password))
        .route("/api/teacher/dashboard", get(api_staff_dashboard))
        .route("/api/caretaker/dashboard", get(api_staff_dashboard))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            acl::enforce_acl,
        ))
        // Runs after require_bearer has inserted AuthCtx.
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
            role = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:8081"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    // Attendance and account data must never be cached
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("username", tracing::field::display(&auth.username));
        span.record("role", tracing::field::display(&auth.role));
    }
    Ok(next.run(req).await)
}

async fn api_auth_login(
    State(state): State<AppState>,
    body: Result<Json<api::AuthReq>, JsonRejection>,
) -> Result<Json<api::AuthResp>, AppError> {
    // A body without both credentials is just a failed login.
    let Json(body) = body.map_err(|e| {
        tracing::debug!(error = %e.body_text(), "login: unreadable body");
        AppError::InvalidCredentials
    })?;
    Ok(Json(auth::login(&state, body).await?))
}

async fn api_register(
    State(state): State<AppState>,
    body: Result<Json<api::RegisterChildReq>, JsonRejection>,
) -> Result<(StatusCode, Json<api::RegisterChildResp>), AppError> {
    let Json(body) = body?;
    let child = registration::register_child(&state, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(api::RegisterChildResp {
            message: registration::CHILD_REGISTERED.to_string(),
            child: child.to_dto(),
        }),
    ))
}

async fn api_register_bulk(
    State(state): State<AppState>,
    body: Result<Json<api::BulkRegisterReq>, JsonRejection>,
) -> Result<Json<api::BulkRegisterResp>, AppError> {
    let Json(body) = body?;
    let results = registration::register_bulk(&state, body.students).await;
    Ok(Json(api::BulkRegisterResp { results }))
}

async fn api_qr_scan(
    State(state): State<AppState>,
    body: Result<Json<api::ScanReq>, JsonRejection>,
) -> Result<Json<api::ScanResp>, AppError> {
    let Json(body) = body?;
    Ok(Json(attendance::process_scan(&state, body).await?))
}

#[derive(Deserialize)]
struct RoleFilter {
    role: Option<String>,
}

async fn api_admin_list_users(
    State(state): State<AppState>,
    Query(filter): Query<RoleFilter>,
) -> Result<Json<Vec<api::StaffDto>>, AppError> {
    let role = match filter.role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(r) => Some(
            r.parse::<StaffRole>()
                .map_err(|e| AppError::invalid_input(e.to_string()))?,
        ),
    };
    let rows = state.store.list_staff(role).await?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let role = row
            .staff_role()
            .ok_or_else(|| AppError::StoreFailure(format!("unknown stored role {}", row.role)))?;
        items.push(row.to_dto(role));
    }
    Ok(Json(items))
}

async fn api_admin_create_user(
    State(state): State<AppState>,
    body: Result<Json<api::CreateStaffReq>, JsonRejection>,
) -> Result<(StatusCode, Json<api::CreateStaffResp>), AppError> {
    let Json(body) = body?;
    let staff = registration::create_staff(&state, body).await?;
    let role = staff
        .staff_role()
        .ok_or_else(|| AppError::StoreFailure(format!("unknown stored role {}", staff.role)))?;
    Ok((
        StatusCode::CREATED,
        Json(api::CreateStaffResp {
            user: staff.to_dto(role),
        }),
    ))
}

async fn api_admin_present_children(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::PresentChildDto>>, AppError> {
    Ok(Json(attendance::present_today(&state).await?))
}

async fn api_list_children(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::ChildDto>>, AppError> {
    let rows = state.store.list_children().await?;
    Ok(Json(rows.iter().map(|c| c.to_dto()).collect()))
}

async fn api_get_child(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<api::ChildDto>, AppError> {
    let child = state
        .store
        .find_child_by_id(id)
        .await?
        .ok_or(AppError::ChildNotFound)?;
    Ok(Json(child.to_dto()))
}

async fn api_parent_dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::ChildDto>, AppError> {
    let child = state
        .store
        .find_child_by_username(&auth.username)
        .await?
        .ok_or(AppError::ChildNotFound)?;
    Ok(Json(child.to_dto()))
}

async fn api_parent_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::AttendanceHistoryResp>, AppError> {
    let child = state
        .store
        .find_child_by_username(&auth.username)
        .await?
        .ok_or(AppError::ChildNotFound)?;
    let rows = state.store.list_attendance_for_child(child.id).await?;
    Ok(Json(api::AttendanceHistoryResp {
        attendance: attendance::history_items(rows),
    }))
}

async fn api_parent_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    body: Result<Json<api::ChangePasswordReq>, JsonRejection>,
) -> Result<Json<api::MessageResp>, AppError> {
    let Json(body) = body?;
    if body.new_password.is_empty() {
        return Err(AppError::invalid_input("New password is required"));
    }
    let hash =
        password::hash_password_blocking(body.new_password, state.config.bcrypt_cost).await?;
    if !state
        .store
        .update_child_password(&auth.username, &hash)
        .await?
    {
        return Err(AppError::ChildNotFound);
    }
    tracing::info!(username = %auth.username, "parent: password changed");
    Ok(Json(api::MessageResp {
        message: "Password updated successfully".to_string(),
    }))
}

async fn api_staff_dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::StaffDto>, AppError> {
    let staff = state
        .store
        .find_staff_by_username(&auth.username)
        .await?
        .ok_or(AppError::UserNotFound)?;
    let role = staff
        .staff_role()
        .ok_or_else(|| AppError::StoreFailure(format!("unknown stored role {}", staff.role)))?;
    Ok(Json(staff.to_dto(role)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StaffInput, Store};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pickup_shared::auth::Role;
    use pickup_shared::jwt::{self, JwtClaims};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing::span;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    const SECRET: &str = "router-test-secret";

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("router.db");
        let store = Store::connect_sqlite(db.to_str().unwrap(), 2).await.unwrap();
        let mut config = AppConfig::with_secret(SECRET);
        config.bcrypt_cost = 4;
        store
            .create_staff(StaffInput {
                name: "Ms. Smith".into(),
                email: "smith@example.com".into(),
                contact: "555".into(),
                username: "teach".into(),
                password_hash: bcrypt::hash("teachpw", 4).unwrap(),
                role: StaffRole::Teacher,
            })
            .await
            .unwrap();
        (AppState::new(config, store), dir)
    }

    fn token_for(username: &str, role: Role, issued_at: i64) -> String {
        jwt::encode(&JwtClaims::new(username, role, issued_at), SECRET.as_bytes()).unwrap()
    }

    async fn call(
        app: Router,
        method: &str,
        path: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(h) = auth {
            builder = builder.header(header::AUTHORIZATION, h);
        }
        let req = match body {
            Some(b) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let (state, _dir) = test_state().await;
        let resp = router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn gate_distinguishes_missing_invalid_and_forbidden() {
        let (state, _dir) = test_state().await;
        let app = router(state);

        let (s, b) = call(app.clone(), "GET", "/api/teacher/dashboard", None, None).await;
        assert_eq!(s, StatusCode::UNAUTHORIZED);
        assert_eq!(b["error"], "Access denied. No token provided.");

        let (s, _) = call(
            app.clone(),
            "GET",
            "/api/teacher/dashboard",
            Some("Basic abc"),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::UNAUTHORIZED);

        let (s, b) = call(
            app.clone(),
            "GET",
            "/api/teacher/dashboard",
            Some("Bearer not.a.jwt"),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert_eq!(b["error"], "Invalid token.");

        let parent = token_for("alice99", Role::Parent, chrono::Utc::now().timestamp());
        let (s, b) = call(
            app,
            "GET",
            "/api/teacher/dashboard",
            Some(&format!("Bearer {}", parent)),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::FORBIDDEN);
        assert_eq!(b["error"], "Access denied. You do not have permission.");
    }

    #[tokio::test]
    async fn token_expiry_boundary() {
        let (state, _dir) = test_state().await;
        let app = router(state);
        let now = chrono::Utc::now().timestamp();

        let fresh = token_for("teach", Role::Teacher, now - 59 * 60);
        let (s, b) = call(
            app.clone(),
            "GET",
            "/api/teacher/dashboard",
            Some(&format!("Bearer {}", fresh)),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(b["username"], "teach");
        assert_eq!(b["role"], "teacher");
        assert!(b.get("password_hash").is_none());

        let stale = token_for("teach", Role::Teacher, now - 61 * 60);
        let (s, _) = call(
            app,
            "GET",
            "/api/teacher/dashboard",
            Some(&format!("Bearer {}", stale)),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn staff_login_keeps_stored_role() {
        let (state, _dir) = test_state().await;
        let app = router(state);
        let (s, b) = call(
            app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"username": "teach", "password": "teachpw"})),
        )
        .await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(b["role"], "teacher");
        assert_eq!(b["message"], "Login successful");
        let claims = jwt::decode_and_verify(b["token"].as_str().unwrap(), SECRET.as_bytes())
            .unwrap();
        assert_eq!(claims.sub, "teach");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[tokio::test]
    async fn admin_user_filter_rejects_unknown_role() {
        let (state, _dir) = test_state().await;
        let app = router(state);
        let admin = format!(
            "Bearer {}",
            token_for("root", Role::Admin, chrono::Utc::now().timestamp())
        );
        let (s, b) = call(
            app.clone(),
            "GET",
            "/api/admin/users?role=teacher",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(b.as_array().unwrap().len(), 1);

        let (s, _) = call(
            app.clone(),
            "GET",
            "/api/admin/users?role=janitor",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);

        let (s, b) = call(app, "GET", "/api/admin/childs", Some(&admin), None).await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(b, json!([]));
    }

    #[tokio::test]
    async fn scan_validates_before_lookup() {
        let (state, _dir) = test_state().await;
        let app = router(state);
        let teacher = format!(
            "Bearer {}",
            token_for("teach", Role::Teacher, chrono::Utc::now().timestamp())
        );
        let (s, _) = call(
            app.clone(),
            "POST",
            "/api/qr/scan",
            Some(&teacher),
            Some(json!({"username": "", "eventType": "checkin"})),
        )
        .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);

        let (s, b) = call(
            app.clone(),
            "POST",
            "/api/qr/scan",
            Some(&teacher),
            Some(json!({"username": "ghost", "eventType": "lunch"})),
        )
        .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert_eq!(b["error"], "Invalid event type");

        let (s, b) = call(
            app,
            "POST",
            "/api/qr/scan",
            Some(&teacher),
            Some(json!({"username": "ghost", "eventType": "checkout"})),
        )
        .await;
        assert_eq!(s, StatusCode::NOT_FOUND);
        assert_eq!(b["error"], "Child not found");
    }

    #[tokio::test]
    async fn malformed_bodies_get_error_json() {
        let (state, _dir) = test_state().await;
        let app = router(state);

        let (s, b) = call(
            app.clone(),
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"username": "teach"})),
        )
        .await;
        assert_eq!(s, StatusCode::UNAUTHORIZED);
        assert_eq!(b["error"], "Invalid username or password");

        let teacher = format!(
            "Bearer {}",
            token_for("teach", Role::Teacher, chrono::Utc::now().timestamp())
        );
        let (s, b) = call(
            app.clone(),
            "POST",
            "/api/qr/scan",
            Some(&teacher),
            Some(json!({"username": 42, "eventType": "checkin"})),
        )
        .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert!(b["error"].as_str().unwrap().starts_with("Invalid request"));

        let req = Request::post("/api/qr/scan")
            .header(header::AUTHORIZATION, &teacher)
            .body(Body::from("username=alice"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let b: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(b["error"].is_string());
    }

    #[tokio::test]
    async fn bulk_upload_reports_mistyped_row_per_item() {
        let (state, _dir) = test_state().await;
        let app = router(state);
        let admin = format!(
            "Bearer {}",
            token_for("root", Role::Admin, chrono::Utc::now().timestamp())
        );
        let row = |username: &str| {
            json!({
                "parent_mail": "p@example.com",
                "parent_contact": "555-0100",
                "child_first_name": "Kid",
                "child_last_name": "Doe",
                "username": username,
                "password": "pw",
                "confirm_password": "pw",
            })
        };
        let mut bad = row("k2");
        bad["parent_contact"] = json!(5550100);

        let (s, b) = call(
            app,
            "POST",
            "/api/auth/registerBulk",
            Some(&admin),
            Some(json!({"students": [row("k1"), bad]})),
        )
        .await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(b["results"][0]["status"], "success");
        assert_eq!(b["results"][1]["status"], "error");
        assert_eq!(b["results"][1]["username"], "k2");
    }

    #[derive(Clone, Default)]
    struct RecordedFields(Arc<Mutex<Vec<String>>>);

    impl Visit for RecordedFields {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{}={:?}", field.name(), value));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for RecordedFields {
        fn on_record(&self, _id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut self.clone());
        }
    }

    #[tokio::test]
    async fn request_span_records_authenticated_user() {
        let recorded = RecordedFields::default();
        let subscriber = tracing_subscriber::registry().with(recorded.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let (state, _dir) = test_state().await;
        let teacher = format!(
            "Bearer {}",
            token_for("teach", Role::Teacher, chrono::Utc::now().timestamp())
        );
        let (s, _) = call(
            router(state),
            "GET",
            "/api/teacher/dashboard",
            Some(&teacher),
            None,
        )
        .await;
        assert_eq!(s, StatusCode::OK);

        let fields = recorded.0.lock().unwrap().clone();
        assert!(fields.contains(&"username=teach".to_string()), "{fields:?}");
        assert!(fields.contains(&"role=teacher".to_string()), "{fields:?}");
    }
}

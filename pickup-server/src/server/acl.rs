use super::{AppError, AppState, auth::AuthCtx, config::AppConfig};
use axum::response::Response;
use axum::{
    extract::{OriginalUri, State},
    http::{Method, Request},
    middleware::Next,
};
use pickup_shared::auth::{Role, StaffRole};

pub async fn enforce_acl(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::Unauthorized);
    };

    let segs = segmented(&path);
    let Some(rest) = segs.strip_prefix(&["api"]) else {
        tracing::warn!(?segs, "ACL: path outside api scope");
        return Err(AppError::Forbidden);
    };

    let decision = match auth.role {
        Role::Admin => allow_staff(StaffRole::Admin, &method, rest, &state.config),
        Role::Teacher => allow_staff(StaffRole::Teacher, &method, rest, &state.config),
        Role::Caretaker => allow_staff(StaffRole::Caretaker, &method, rest, &state.config),
        Role::Parent => allow_parent(&method, rest),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            username = %auth.username,
            role = %auth.role,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_staff(
    role: StaffRole,
    method: &Method,
    rest: &[&str],
    config: &AppConfig,
) -> Result<(), AppError> {
    use StaffRole::{Admin, Caretaker, Teacher};
    let get = *method == Method::GET;
    let post = *method == Method::POST;
    match (role, rest) {
        (_, ["qr", "scan"]) if post && config.scan_roles.contains(&role) => Ok(()),
        (Admin | Teacher, ["auth", "register" | "registerBulk"]) if post => Ok(()),
        (Admin, ["admin", "users"]) if get || post => Ok(()),
        (Admin, ["admin", "childs"]) if get => Ok(()),
        (Admin | Caretaker, ["child"]) if get => Ok(()),
        (Admin | Caretaker, ["child", _]) if get => Ok(()),
        (Teacher, ["teacher", "dashboard"]) if get => Ok(()),
        (Caretaker, ["caretaker", "dashboard"]) if get => Ok(()),
        _ => Err(AppError::Forbidden),
    }
}

fn allow_parent(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["parent", "dashboard"] if *method == Method::GET => Ok(()),
        ["parent", "history"] if *method == Method::GET => Ok(()),
        ["parent", "password"] if *method == Method::POST => Ok(()),
        _ => Err(AppError::Forbidden),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

use pickup_shared::api::{BulkItemResult, BulkStatus, CreateStaffReq, RegisterChildReq};
use pickup_shared::auth::StaffRole;
use tracing::{info, warn};

use super::password::hash_password_blocking;
use super::{AppError, AppState};
use crate::storage::models::{ChildAccount, StaffAccount};
use crate::storage::{ChildInput, StaffInput};

pub const CHILD_REGISTERED: &str = "Child registered successfully";

fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        Err(AppError::invalid_input(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

fn require_email(field: &str, value: &str) -> Result<(), AppError> {
    require(field, value)?;
    let v = value.trim();
    match v.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AppError::invalid_input(format!(
            "{} must be an email address",
            field
        ))),
    }
}

/// Display name stored for a child: first and last name joined by a space.
pub fn child_display_name(first: &str, last: &str) -> String {
    format!("{} {}", first.trim(), last.trim())
        .trim()
        .to_string()
}

/// Field checks, then password confirmation. Uniqueness is checked later
/// against the store.
fn validate_child(req: &RegisterChildReq) -> Result<(), AppError> {
    require_email("parent_mail", &req.parent_mail)?;
    require("parent_contact", &req.parent_contact)?;
    require("child_first_name", &req.child_first_name)?;
    require("username", &req.username)?;
    require("password", &req.password)?;
    if req.password != req.confirm_password {
        return Err(AppError::PasswordMismatch);
    }
    Ok(())
}

pub async fn register_child(
    state: &AppState,
    req: RegisterChildReq,
) -> Result<ChildAccount, AppError> {
    validate_child(&req)?;
    let username = req.username.trim().to_string();
    // Cheap early exit before paying for bcrypt; the insert re-checks atomically.
    if state.store.username_exists(&username).await? {
        return Err(AppError::DuplicateUsername);
    }
    let password_hash = hash_password_blocking(req.password, state.config.bcrypt_cost).await?;
    let child = state
        .store
        .create_child(ChildInput {
            name: child_display_name(&req.child_first_name, &req.child_last_name),
            parent_mail: req.parent_mail.trim().to_string(),
            parent_contact: req.parent_contact.trim().to_string(),
            username,
            password_hash,
        })
        .await?;
    info!(username = %child.username, child_id = child.id, "registration: child created");
    Ok(child)
}

fn row_username(row: &serde_json::Value) -> String {
    row.get("username")
        .and_then(serde_json::Value::as_str)
        .map(|u| u.trim().to_string())
        .unwrap_or_default()
}

/// Registers every row in order. One bad row never fails the batch; a
/// username repeated inside the batch is a duplicate for the later row.
pub async fn register_bulk(
    state: &AppState,
    rows: Vec<serde_json::Value>,
) -> Vec<BulkItemResult> {
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let username = row_username(&row);
        let outcome = match serde_json::from_value::<RegisterChildReq>(row) {
            Ok(item) => register_child(state, item).await.map(|_| ()),
            Err(e) => Err(AppError::invalid_input(format!(
                "Invalid registration entry: {e}"
            ))),
        };
        let result = match outcome {
            Ok(()) => BulkItemResult {
                username,
                status: BulkStatus::Success,
                message: CHILD_REGISTERED.to_string(),
            },
            Err(err) => {
                warn!(username = %username, error = %err, "registration: bulk item rejected");
                BulkItemResult {
                    username,
                    status: BulkStatus::Error,
                    message: err.to_string(),
                }
            }
        };
        results.push(result);
    }
    results
}

pub async fn create_staff(state: &AppState, req: CreateStaffReq) -> Result<StaffAccount, AppError> {
    require("name", &req.name)?;
    require_email("email", &req.email)?;
    require("contact", &req.contact)?;
    require("username", &req.username)?;
    require("password", &req.password)?;
    let role: StaffRole = req
        .role
        .trim()
        .parse()
        .map_err(|e: pickup_shared::auth::UnknownRole| AppError::invalid_input(e.to_string()))?;

    let username = req.username.trim().to_string();
    if state.store.username_exists(&username).await? {
        return Err(AppError::DuplicateUsername);
    }
    let password_hash = hash_password_blocking(req.password, state.config.bcrypt_cost).await?;
    let staff = state
        .store
        .create_staff(StaffInput {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_string(),
            contact: req.contact.trim().to_string(),
            username,
            password_hash,
            role,
        })
        .await?;
    info!(username = %staff.username, role = %role, "registration: staff created");
    Ok(staff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::AppConfig;
    use crate::storage::Store;
    use serde_json::json;

    fn valid() -> RegisterChildReq {
        RegisterChildReq {
            parent_mail: "p@example.com".into(),
            parent_contact: "555-0100".into(),
            child_first_name: "Alice".into(),
            child_last_name: "Doe".into(),
            username: "alice99".into(),
            password: "pw".into(),
            confirm_password: "pw".into(),
        }
    }

    #[test]
    fn display_name_joins_and_trims() {
        assert_eq!(child_display_name(" Alice ", "Doe"), "Alice Doe");
        assert_eq!(child_display_name("Alice", ""), "Alice");
    }

    #[test]
    fn missing_fields_come_before_password_mismatch() {
        let mut req = valid();
        req.username.clear();
        req.confirm_password = "other".into();
        let err = validate_child(&req).unwrap_err();
        assert!(matches!(&err, AppError::InvalidInput(m) if m.contains("username")));
    }

    #[test]
    fn mismatch_is_reported() {
        let mut req = valid();
        req.confirm_password = "other".into();
        assert!(matches!(validate_child(&req), Err(AppError::PasswordMismatch)));
        assert!(validate_child(&valid()).is_ok());
    }

    #[test]
    fn parent_mail_must_look_like_an_address() {
        let mut req = valid();
        req.parent_mail = "not-an-email".into();
        assert!(matches!(validate_child(&req), Err(AppError::InvalidInput(_))));
        req.parent_mail = "@example.com".into();
        assert!(validate_child(&req).is_err());
    }

    #[tokio::test]
    async fn bulk_row_with_wrong_field_type_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("bulk.db");
        let store = Store::connect_sqlite(db.to_str().unwrap(), 2).await.unwrap();
        let mut config = AppConfig::with_secret("bulk-secret");
        config.bcrypt_cost = 4;
        let state = AppState::new(config, store);

        let good = serde_json::to_value(valid()).unwrap();
        let mut numeric_contact = good.clone();
        numeric_contact["username"] = json!("k2");
        numeric_contact["parent_contact"] = json!(5550100);
        let mut null_last_name = good.clone();
        null_last_name["username"] = json!("k3");
        null_last_name["child_last_name"] = json!(null);

        let results = register_bulk(&state, vec![good, numeric_contact, null_last_name]).await;
        let statuses: Vec<BulkStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![BulkStatus::Success, BulkStatus::Error, BulkStatus::Error]
        );
        assert_eq!(results[1].username, "k2");
        assert!(results[1].message.starts_with("Invalid registration entry"));
        assert!(state.store.username_exists("alice99").await.unwrap());
        assert!(!state.store.username_exists("k2").await.unwrap());
    }
}

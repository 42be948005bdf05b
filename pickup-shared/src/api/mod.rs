use serde::{Deserialize, Serialize};

use crate::auth::{Role, StaffRole};

// Auth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
    #[serde(default, rename = "deviceToken", skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResp {
    pub message: String,
    pub role: Role,
    pub token: String,
}

// Registration. Missing fields default to empty and fail validation later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterChildReq {
    #[serde(default)]
    pub parent_mail: String,
    #[serde(default)]
    pub parent_contact: String,
    #[serde(default)]
    pub child_first_name: String,
    #[serde(default)]
    pub child_last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterChildResp {
    pub message: String,
    pub child: ChildDto,
}

/// Rows stay raw JSON so each one is decoded on its own; a row with a
/// mistyped field becomes an error result for that row only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkRegisterReq {
    #[serde(default)]
    pub students: Vec<serde_json::Value>,
}

impl BulkRegisterReq {
    pub fn from_rows(rows: &[RegisterChildReq]) -> Result<Self, serde_json::Error> {
        let students = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { students })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub username: String,
    pub status: BulkStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRegisterResp {
    pub results: Vec<BulkItemResult>,
}

// Scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReq {
    #[serde(default)]
    pub username: String,
    #[serde(default, rename = "eventType")]
    pub event_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResp {
    pub message: String,
    #[serde(rename = "notificationSent")]
    pub notification_sent: bool,
    #[serde(
        default,
        rename = "notificationError",
        skip_serializing_if = "Option::is_none"
    )]
    pub notification_error: Option<String>,
    pub child: ChildDto,
}

// Accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildDto {
    pub id: i32,
    pub name: String,
    pub parent_mail: String,
    pub parent_contact: String,
    pub username: String,
    pub device_token: Option<String>,
    pub qr_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffDto {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub contact: String,
    pub username: String,
    pub role: StaffRole,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateStaffReq {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStaffResp {
    pub user: StaffDto,
}

// Attendance views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentChildDto {
    pub name: String,
    pub timestamp: String, // RFC3339 UTC
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceItemDto {
    pub is_checkin: bool,
    pub timestamp: String, // RFC3339 UTC
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceHistoryResp {
    pub attendance: Vec<AttendanceItemDto>,
}

// Parent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordReq {
    #[serde(default, rename = "newPassword")]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResp {
    pub message: String,
}

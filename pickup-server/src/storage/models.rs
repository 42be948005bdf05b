use crate::storage::schema::{attendance_log, child_accounts, staff_accounts};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use pickup_shared::api::{ChildDto, StaffDto};
use pickup_shared::auth::{Role, StaffRole};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = staff_accounts)]
pub struct StaffAccount {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub contact: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = staff_accounts)]
pub struct NewStaffAccount<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub contact: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
}

impl StaffAccount {
    pub fn staff_role(&self) -> Option<StaffRole> {
        self.role.parse().ok()
    }

    pub fn to_dto(&self, role: StaffRole) -> StaffDto {
        StaffDto {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            contact: self.contact.clone(),
            username: self.username.clone(),
            role,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = child_accounts)]
pub struct ChildAccount {
    pub id: i32,
    pub name: String,
    pub parent_mail: String,
    pub parent_contact: String,
    pub username: String,
    pub password_hash: String,
    pub device_token: Option<String>,
    pub qr_code: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = child_accounts)]
pub struct NewChildAccount<'a> {
    pub name: &'a str,
    pub parent_mail: &'a str,
    pub parent_contact: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub device_token: Option<&'a str>,
    pub qr_code: Option<&'a str>,
}

impl ChildAccount {
    pub fn to_dto(&self) -> ChildDto {
        ChildDto {
            id: self.id,
            name: self.name.clone(),
            parent_mail: self.parent_mail.clone(),
            parent_contact: self.parent_contact.clone(),
            username: self.username.clone(),
            device_token: self.device_token.clone(),
            qr_code: self.qr_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = attendance_log)]
#[diesel(belongs_to(ChildAccount, foreign_key = child_id))]
pub struct AttendanceEntry {
    pub id: i32,
    pub child_id: i32,
    pub is_checkin: bool,
    pub recorded_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = attendance_log)]
pub struct NewAttendanceEntry {
    pub child_id: i32,
    pub is_checkin: bool,
    pub recorded_at: NaiveDateTime,
}

/// One attendance row of a day, joined with the child's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayEntry {
    pub id: i32,
    pub child_id: i32,
    pub child_name: String,
    pub is_checkin: bool,
    pub recorded_at: NaiveDateTime,
}

/// A username resolved against both credential tables.
#[derive(Debug, Clone)]
pub enum Identity {
    Staff {
        account: StaffAccount,
        role: StaffRole,
    },
    Child(ChildAccount),
}

impl Identity {
    pub fn username(&self) -> &str {
        match self {
            Identity::Staff { account, .. } => &account.username,
            Identity::Child(child) => &child.username,
        }
    }

    pub fn password_hash(&self) -> &str {
        match self {
            Identity::Staff { account, .. } => &account.password_hash,
            Identity::Child(child) => &child.password_hash,
        }
    }

    /// Staff keep their stored role; a child login always acts as `Parent`.
    pub fn role(&self) -> Role {
        match self {
            Identity::Staff { role, .. } => (*role).into(),
            Identity::Child(_) => Role::Parent,
        }
    }
}

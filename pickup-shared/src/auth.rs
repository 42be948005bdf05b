use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Effective role carried in a token. Staff roles come from the staff table,
/// `Parent` is what every child-account login resolves to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Caretaker,
    Parent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Caretaker => "caretaker",
            Role::Parent => "parent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles a staff account may hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Admin,
    Teacher,
    Caretaker,
}

impl StaffRole {
    pub const ALL: [StaffRole; 3] = [StaffRole::Admin, StaffRole::Teacher, StaffRole::Caretaker];

    pub fn as_str(self) -> &'static str {
        Role::from(self).as_str()
    }
}

impl From<StaffRole> for Role {
    fn from(value: StaffRole) -> Self {
        match value {
            StaffRole::Admin => Role::Admin,
            StaffRole::Teacher => Role::Teacher,
            StaffRole::Caretaker => Role::Caretaker,
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown staff role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for StaffRole {
    type Err = UnknownRole;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(StaffRole::Admin),
            "teacher" => Ok(StaffRole::Teacher),
            "caretaker" => Ok(StaffRole::Caretaker),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles_parse_their_own_names() {
        for role in StaffRole::ALL {
            assert_eq!(role.as_str().parse::<StaffRole>(), Ok(role));
        }
    }

    #[test]
    fn parent_is_not_a_staff_role() {
        assert_eq!(
            "parent".parse::<StaffRole>(),
            Err(UnknownRole("parent".into()))
        );
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Role::Caretaker).unwrap();
        assert_eq!(json, "\"caretaker\"");
        let back: Role = serde_json::from_str("\"parent\"").unwrap();
        assert_eq!(back, Role::Parent);
    }
}

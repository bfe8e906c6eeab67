use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub active: bool,
    /// Cameras a non-admin user may see
    pub authorized_cameras: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// User role enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "operator")]
    Operator,
    #[serde(rename = "viewer")]
    Viewer,
}

/// Access level used by the streaming core
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees every enabled device
    Elevated,
    /// Sees only the devices listed on the identity
    Standard,
}

impl From<UserRole> for Role {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Admin => Role::Elevated,
            UserRole::Operator | UserRole::Viewer => Role::Standard,
        }
    }
}

/// Authenticated identity attached to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub active: bool,
    pub authorized_devices: BTreeSet<String>,
}

impl Identity {
    pub fn is_elevated(&self) -> bool {
        self.role == Role::Elevated
    }

    /// Whether the identity's role or device list covers `serial`
    pub fn covers(&self, serial: &str) -> bool {
        self.is_elevated() || self.authorized_devices.contains(serial)
    }
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Identity {
            user_id: user.id,
            username: user.username,
            role: user.role.into(),
            active: user.active,
            authorized_devices: user.authorized_cameras.into_iter().collect(),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Group ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub group_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// --- Role ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    /// Admins and managers may administer a group and its projects.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Manager => write!(f, "manager"),
            Role::User => write!(f, "user"),
        }
    }
}

// --- Membership ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: u64,
    pub group_id: u64,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRequest {
    pub u_id: u64,
    pub g_id: u64,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipDeleteRequest {
    pub u_id: u64,
    pub g_id: u64,
}

/// One group entry in a per-user membership listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRole {
    pub g_id: u64,
    pub group_name: String,
    pub role: Role,
}

/// Memberships of one user, with group names resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemberships {
    pub u_id: u64,
    pub username: String,
    pub groups: Vec<GroupRole>,
}

/// One user entry in a per-group membership listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRole {
    pub u_id: u64,
    pub username: String,
    pub role: Role,
}

/// Members of one group, with usernames resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembers {
    pub g_id: u64,
    pub group_name: String,
    pub users: Vec<UserRole>,
}

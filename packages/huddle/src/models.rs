//! Domain document types shared by the store, the HTTP handlers, and the
//! real-time relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role vocabulary carried in every user's role set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    SuperAdmin,
    GroupAdmin,
    User,
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Argon2 PHC string. Never leaves the server.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(Role::SuperAdmin)
    }
}

/// Membership entry inside a group. The per-group role lets a super admin
/// promote a member to group admin without touching their global role set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user_id: String,
    pub role: Role,
}

/// A channel inside a group. The channel id doubles as the room id of the
/// real-time layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// A group of users with its channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    /// The user who created the group.
    pub admin_id: String,
    pub members: Vec<GroupMember>,
    pub channels: Vec<Channel>,
}

impl Group {
    /// Whether `user_id` administers this group (creator or promoted member).
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_id == user_id
            || self
                .members
                .iter()
                .any(|m| m.user_id == user_id && m.role == Role::GroupAdmin)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.admin_id == user_id || self.members.iter().any(|m| m.user_id == user_id)
    }
}

/// A persisted chat message. The store assigns `id` and `timestamp`; the
/// relay only ever forwards records that already carry both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    /// Sender display name.
    pub sender: String,
    /// May be empty when an image is attached.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A bearer session issued by login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

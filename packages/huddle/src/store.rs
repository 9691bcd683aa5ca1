//! In-memory document store.
//!
//! This is the persistence collaborator behind the HTTP handlers and the
//! relay. Users, groups and messages live in maps guarded by `RwLock`; room
//! membership is ephemeral and lives in the hub, never here.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ChatMessage, Channel, Group, GroupMember, Role, Session, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already exists")]
    UsernameTaken,
    #[error("user not found")]
    UserNotFound,
    #[error("group not found")]
    GroupNotFound,
    #[error("channel not found")]
    ChannelNotFound,
    #[error("user already has this role")]
    RoleAlreadyHeld,
}

/// Document store with per-collection locks.
#[derive(Default)]
pub struct Store {
    users: RwLock<HashMap<String, User>>,
    groups: RwLock<HashMap<String, Group>>,
    /// Append log per channel id.
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: String,
        roles: Vec<Role>,
    ) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == username) {
            return Err(StoreError::UsernameTaken);
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            roles,
            created_at: Utc::now(),
        };
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Option<User> {
        self.users.read().await.get(id).cloned()
    }

    pub async fn find_user_by_username(&self, username: &str) -> Option<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    pub async fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        users
    }

    /// Remove an account and its live sessions. Returns false if unknown.
    pub async fn delete_user(&self, id: &str) -> bool {
        let removed = self.users.write().await.remove(id).is_some();
        if removed {
            self.sessions.write().await.retain(|_, s| s.user_id != id);
        }
        removed
    }

    pub async fn promote_user(&self, id: &str, role: Role) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(id).ok_or(StoreError::UserNotFound)?;
        if user.roles.contains(&role) {
            return Err(StoreError::RoleAlreadyHeld);
        }
        user.roles.push(role);
        Ok(user.clone())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn insert_session(&self, user_id: &str, ttl_secs: u64) -> Session {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expires_at: Utc::now() + Duration::seconds(ttl_secs as i64),
        };
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        session
    }

    /// Resolve a bearer token to its user. Expired tokens are removed on the
    /// way out so the map does not accumulate garbage.
    pub async fn resolve_session(&self, token: &str, now: DateTime<Utc>) -> Option<User> {
        let user_id = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(token) {
                Some(s) if s.is_expired(now) => {
                    sessions.remove(token);
                    return None;
                }
                Some(s) => s.user_id.clone(),
                None => return None,
            }
        };
        self.get_user(&user_id).await
    }

    pub async fn remove_session(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    // =========================================================================
    // Groups and channels
    // =========================================================================

    pub async fn create_group(&self, name: &str, admin_id: &str) -> Group {
        let group = Group {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            admin_id: admin_id.to_string(),
            members: vec![GroupMember {
                user_id: admin_id.to_string(),
                role: Role::GroupAdmin,
            }],
            channels: vec![],
        };
        self.groups
            .write()
            .await
            .insert(group.id.clone(), group.clone());
        group
    }

    pub async fn get_group(&self, id: &str) -> Option<Group> {
        self.groups.read().await.get(id).cloned()
    }

    pub async fn list_groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.groups.read().await.values().cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    /// Remove a group and the message logs of its channels.
    pub async fn delete_group(&self, id: &str) -> bool {
        let group = self.groups.write().await.remove(id);
        match group {
            Some(group) => {
                let mut messages = self.messages.write().await;
                for channel in &group.channels {
                    messages.remove(&channel.id);
                }
                true
            }
            None => false,
        }
    }

    pub async fn add_member(&self, group_id: &str, member: GroupMember) -> Result<(), StoreError> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(group_id).ok_or(StoreError::GroupNotFound)?;
        if !group.members.iter().any(|m| m.user_id == member.user_id) {
            group.members.push(member);
        }
        Ok(())
    }

    pub async fn create_channel(&self, group_id: &str, name: &str) -> Result<Channel, StoreError> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(group_id).ok_or(StoreError::GroupNotFound)?;
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        group.channels.push(channel.clone());
        Ok(channel)
    }

    pub async fn delete_channel(&self, group_id: &str, channel_id: &str) -> Result<(), StoreError> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(group_id).ok_or(StoreError::GroupNotFound)?;
        let before = group.channels.len();
        group.channels.retain(|c| c.id != channel_id);
        if group.channels.len() == before {
            return Err(StoreError::ChannelNotFound);
        }
        drop(groups);
        self.messages.write().await.remove(channel_id);
        Ok(())
    }

    /// Find the group that owns a channel.
    pub async fn group_of_channel(&self, channel_id: &str) -> Option<Group> {
        self.groups
            .read()
            .await
            .values()
            .find(|g| g.channels.iter().any(|c| c.id == channel_id))
            .cloned()
    }

    /// Whether `user_id` may join/read a channel: a member of the owning
    /// group, its admin, or a super admin.
    pub async fn can_access_channel(&self, user_id: &str, channel_id: &str) -> bool {
        if let Some(user) = self.get_user(user_id).await {
            if user.is_super_admin() {
                return true;
            }
        }
        match self.group_of_channel(channel_id).await {
            Some(group) => group.is_member(user_id),
            None => false,
        }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Persist a message, assigning its canonical id and timestamp. The relay
    /// must only broadcast the record returned from here.
    pub async fn append_message(
        &self,
        channel_id: &str,
        user_id: &str,
        sender: &str,
        content: String,
        image: Option<String>,
    ) -> Result<ChatMessage, StoreError> {
        if self.group_of_channel(channel_id).await.is_none() {
            return Err(StoreError::ChannelNotFound);
        }
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            sender: sender.to_string(),
            content,
            image,
            timestamp: Utc::now(),
        };
        self.messages
            .write()
            .await
            .entry(channel_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    /// Most recent `limit` messages for a channel, oldest first.
    pub async fn messages(&self, channel_id: &str, limit: usize) -> Vec<ChatMessage> {
        let messages = self.messages.read().await;
        match messages.get(channel_id) {
            Some(log) => {
                let skip = log.len().saturating_sub(limit);
                log[skip..].to_vec()
            }
            None => vec![],
        }
    }
}

//! Demo-data seeding for local development.
//!
//! Mirrors the fixture accounts the web client expects: one user per role,
//! all with password `123`, plus a sample group with a `general` channel.

use anyhow::{Result, anyhow};
use tracing::info;

use crate::auth;
use crate::models::{GroupMember, Role};
use crate::store::Store;

pub async fn seed_demo(store: &Store) -> Result<()> {
    let hash = |password: &str| auth::hash_password(password).map_err(|e| anyhow!("{e}"));

    store
        .create_user("super", hash("123")?, vec![Role::SuperAdmin])
        .await?;
    let group_admin = store
        .create_user("group", hash("123")?, vec![Role::GroupAdmin])
        .await?;
    let user = store
        .create_user("user", hash("123")?, vec![Role::User])
        .await?;

    let group = store.create_group("Demo", &group_admin.id).await;
    store
        .add_member(
            &group.id,
            GroupMember {
                user_id: user.id.clone(),
                role: Role::User,
            },
        )
        .await?;
    let channel = store.create_channel(&group.id, "general").await?;

    info!(
        group_id = %group.id,
        channel_id = %channel.id,
        "seeded demo accounts: super / group / user (password: 123)"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_creates_accounts_and_demo_channel() {
        let store = Store::new();
        seed_demo(&store).await.unwrap();

        let superuser = store.find_user_by_username("super").await.unwrap();
        assert!(superuser.is_super_admin());
        assert!(auth::verify_password(&superuser.password_hash, "123"));

        let user = store.find_user_by_username("user").await.unwrap();
        let groups = store.list_groups().await;
        assert_eq!(groups.len(), 1);
        let channel = &groups[0].channels[0];
        assert_eq!(channel.name, "general");
        assert!(store.can_access_channel(&user.id, &channel.id).await);
    }

    #[tokio::test]
    async fn seeding_twice_fails_on_duplicate_accounts() {
        let store = Store::new();
        seed_demo(&store).await.unwrap();
        assert!(seed_demo(&store).await.is_err());
    }
}

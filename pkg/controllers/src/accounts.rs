use chrono::Utc;
use pkg_constants::auth::{
    MIN_PASSWORD_LEN, RESERVED_ADMIN_ID, RESERVED_ADMIN_USERNAME, RESERVED_GROUP_NAME,
};
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::{Actor, AuditEvent};
use pkg_types::group::{Group, Membership, Role};
use pkg_types::user::{RegisterRequest, UpdateUserRequest, User, UserStatus, UserType, UserView};
use pkg_types::{CoreError, CoreResult};
use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::Arc;
use tracing::info;

use crate::Caller;

/// Argon2id, stored as a PHC string with the salt embedded.
pub fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn check_password(password: &str) -> CoreResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CoreError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AccountService {
    repos: Repos,
    audit: Arc<dyn AuditSink>,
}

impl AccountService {
    pub fn new(repos: Repos, audit: Arc<dyn AuditSink>) -> Self {
        Self { repos, audit }
    }

    pub async fn register(&self, input: RegisterRequest, actor: &Actor) -> CoreResult<User> {
        let username = input.username.trim().to_string();
        if username.is_empty() {
            return Err(CoreError::InvalidInput("username must not be empty".into()));
        }
        check_password(&input.password)?;
        if self.repos.users.get_by_username(&username).await?.is_some() {
            return Err(CoreError::AlreadyExists(format!(
                "user '{}' already exists",
                username
            )));
        }
        let now = Utc::now();
        let user = self
            .repos
            .users
            .create(User {
                id: 0,
                username,
                password_hash: hash_password(&input.password)?,
                full_name: input.full_name,
                email: input.email,
                user_type: UserType::Local,
                status: UserStatus::Offline,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.audit.record(AuditEvent::created(
            actor,
            "user",
            user.id.to_string(),
            &UserView::from(&user),
        ));
        info!("Registered user {} (id={})", user.username, user.id);
        Ok(user)
    }

    /// The user behind valid credentials, or `None`. Soft-deleted
    /// accounts never authenticate.
    pub async fn authenticate(&self, username: &str, password: &str) -> CoreResult<Option<User>> {
        let Some(user) = self.repos.users.get_by_username(username.trim()).await? else {
            return Ok(None);
        };
        if user.status == UserStatus::Deleted || !verify_password(&user.password_hash, password) {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Live accounts; soft-deleted users are hidden.
    pub async fn list(&self) -> CoreResult<Vec<User>> {
        let users = self.repos.users.list().await?;
        Ok(users
            .into_iter()
            .filter(|u| u.status != UserStatus::Deleted)
            .collect())
    }

    pub async fn get(&self, id: u64) -> CoreResult<User> {
        self.repos
            .users
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: u64,
        input: UpdateUserRequest,
    ) -> CoreResult<User> {
        let before = self.get(id).await?;
        let mut user = before.clone();
        if let Some(password) = input.password {
            check_password(&password)?;
            user.password_hash = hash_password(&password)?;
        }
        if let Some(full_name) = input.full_name {
            user.full_name = Some(full_name);
        }
        if let Some(email) = input.email {
            user.email = Some(email);
        }
        if let Some(status) = input.status {
            if status == UserStatus::Deleted && id == RESERVED_ADMIN_ID {
                return Err(CoreError::Forbidden("cannot delete the admin user".into()));
            }
            user.status = status;
        }
        user.updated_at = Utc::now();
        self.repos.users.update(&user).await?;
        self.audit.record(AuditEvent::updated(
            &caller.actor(),
            "user",
            id.to_string(),
            &UserView::from(&before),
            &UserView::from(&user),
        ));
        Ok(user)
    }

    /// Soft delete: the row stays, with status `deleted`.
    pub async fn delete(&self, caller: &Caller, id: u64) -> CoreResult<()> {
        let before = self.get(id).await?;
        if before.id == RESERVED_ADMIN_ID && before.username == RESERVED_ADMIN_USERNAME {
            return Err(CoreError::Forbidden("cannot delete the admin user".into()));
        }
        let mut user = before.clone();
        user.status = UserStatus::Deleted;
        user.updated_at = Utc::now();
        self.repos.users.update(&user).await?;
        self.audit.record(AuditEvent::deleted(
            &caller.actor(),
            "user",
            id.to_string(),
            &UserView::from(&before),
        ));
        info!("Deleted user {} (id={})", user.username, id);
        Ok(())
    }

    /// Make sure user 1 `admin`, group 1 `super` and their admin
    /// membership exist. Existing rows are left alone.
    pub async fn bootstrap_admin(&self, password: &str) -> CoreResult<()> {
        let now = Utc::now();
        let admin = match self.repos.users.get_by_username(RESERVED_ADMIN_USERNAME).await? {
            Some(user) => user,
            None => {
                let user = self
                    .repos
                    .users
                    .create(User {
                        id: RESERVED_ADMIN_ID,
                        username: RESERVED_ADMIN_USERNAME.to_string(),
                        password_hash: hash_password(password)?,
                        full_name: None,
                        email: None,
                        user_type: UserType::Local,
                        status: UserStatus::Offline,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
                info!("Created bootstrap user {}", user.username);
                user
            }
        };
        let group = match self.repos.groups.get_by_name(RESERVED_GROUP_NAME).await? {
            Some(group) => group,
            None => {
                let group = self
                    .repos
                    .groups
                    .create(Group {
                        id: 1,
                        name: RESERVED_GROUP_NAME.to_string(),
                        description: "platform administrators".to_string(),
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
                info!("Created bootstrap group {}", group.name);
                group
            }
        };
        match self.repos.memberships.get(admin.id, group.id).await? {
            Some(m) if m.role == Role::Admin => {}
            Some(mut m) => {
                m.role = Role::Admin;
                self.repos.memberships.update(&m).await?;
            }
            None => {
                self.repos
                    .memberships
                    .create(Membership {
                        user_id: admin.id,
                        group_id: group.id,
                        role: Role::Admin,
                        created_at: now,
                    })
                    .await?;
                info!("Granted {} admin in group {}", admin.username, group.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    fn register(name: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: name.into(),
            password: password.into(),
            full_name: None,
            email: Some(format!("{}@example.com", name)),
        }
    }

    #[test]
    fn password_hash_is_salted() {
        let a = hash_password("secret1").unwrap();
        let b = hash_password("secret1").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password(&a, "secret1"));
        assert!(!verify_password(&a, "secret2"));
        assert!(!verify_password("garbage", "secret1"));
    }

    #[tokio::test]
    async fn register_and_authenticate() {
        let fx = Fixture::new();
        let accounts = &fx.engine.accounts;
        let actor = Actor::system();

        let user = accounts.register(register("alice", "wonderland"), &actor).await.unwrap();
        assert!(accounts.authenticate("alice", "wonderland").await.unwrap().is_some());
        assert!(accounts.authenticate("alice", "nope!!").await.unwrap().is_none());
        assert!(accounts.authenticate("bob", "wonderland").await.unwrap().is_none());

        assert!(matches!(
            accounts.register(register("alice", "another1"), &actor).await,
            Err(CoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            accounts.register(register("bob", "short"), &actor).await,
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            accounts.register(register("  ", "longenough"), &actor).await,
            Err(CoreError::InvalidInput(_))
        ));

        let caller = Caller::new(user.id, "alice");
        accounts.delete(&caller, user.id).await.unwrap();
        assert!(accounts.authenticate("alice", "wonderland").await.unwrap().is_none());
        assert!(accounts.list().await.unwrap().is_empty());
        assert_eq!(accounts.get(user.id).await.unwrap().status, UserStatus::Deleted);
    }

    #[tokio::test]
    async fn update_changes_password() {
        let fx = Fixture::new();
        let accounts = &fx.engine.accounts;
        let user = accounts
            .register(register("carol", "password1"), &Actor::system())
            .await
            .unwrap();
        let caller = Caller::new(user.id, "carol");
        let updated = accounts
            .update(
                &caller,
                user.id,
                UpdateUserRequest {
                    password: Some("password2".into()),
                    full_name: Some("Carol C".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Carol C"));
        assert!(accounts.authenticate("carol", "password1").await.unwrap().is_none());
        assert!(accounts.authenticate("carol", "password2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let fx = Fixture::new();
        let accounts = &fx.engine.accounts;
        accounts.bootstrap_admin("admin-pass").await.unwrap();
        accounts.bootstrap_admin("other-pass").await.unwrap();

        let admin = fx.engine.repos.users.get(RESERVED_ADMIN_ID).await.unwrap().unwrap();
        assert_eq!(admin.username, RESERVED_ADMIN_USERNAME);
        assert!(accounts.authenticate("admin", "admin-pass").await.unwrap().is_some());
        assert!(fx.engine.gate.is_super_admin(admin.id).await.unwrap());
        assert_eq!(fx.engine.repos.groups.list().await.unwrap().len(), 1);

        let caller = Caller::new(admin.id, "admin");
        assert!(matches!(
            accounts.delete(&caller, RESERVED_ADMIN_ID).await,
            Err(CoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn admin_lock_follows_the_reserved_identity() {
        let fx = Fixture::new();
        let accounts = &fx.engine.accounts;
        let first = accounts
            .register(register("dave", "password1"), &Actor::system())
            .await
            .unwrap();
        assert_eq!(first.id, RESERVED_ADMIN_ID);

        accounts
            .delete(&Caller::new(first.id, "dave"), first.id)
            .await
            .unwrap();
        assert_eq!(accounts.get(first.id).await.unwrap().status, UserStatus::Deleted);
    }
}

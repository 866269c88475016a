use pkg_constants::auth::RESERVED_GROUP_NAME;
use pkg_state::Repos;
use pkg_types::group::Role;
use pkg_types::{CoreError, CoreResult};

/// Authorisation predicates over group membership.
///
/// A super-admin is an `admin` member of the reserved group and passes
/// every predicate.
#[derive(Clone)]
pub struct PermissionGate {
    repos: Repos,
}

impl PermissionGate {
    pub fn new(repos: Repos) -> Self {
        Self { repos }
    }

    pub async fn role_in(&self, user_id: u64, group_id: u64) -> CoreResult<Option<Role>> {
        Ok(self
            .repos
            .memberships
            .get(user_id, group_id)
            .await?
            .map(|m| m.role))
    }

    pub async fn is_super_admin(&self, user_id: u64) -> CoreResult<bool> {
        let Some(group) = self.repos.groups.get_by_name(RESERVED_GROUP_NAME).await? else {
            return Ok(false);
        };
        Ok(self.role_in(user_id, group.id).await? == Some(Role::Admin))
    }

    pub async fn group_member(&self, user_id: u64, group_id: u64) -> CoreResult<bool> {
        if self.role_in(user_id, group_id).await?.is_some() {
            return Ok(true);
        }
        self.is_super_admin(user_id).await
    }

    pub async fn group_elevated(&self, user_id: u64, group_id: u64) -> CoreResult<bool> {
        if self
            .role_in(user_id, group_id)
            .await?
            .is_some_and(|r| r.is_elevated())
        {
            return Ok(true);
        }
        self.is_super_admin(user_id).await
    }

    pub async fn user_or_super(&self, user_id: u64, target_user_id: u64) -> CoreResult<bool> {
        if user_id == target_user_id {
            return Ok(true);
        }
        self.is_super_admin(user_id).await
    }

    pub async fn require_super_admin(&self, user_id: u64) -> CoreResult<()> {
        allow(
            self.is_super_admin(user_id).await?,
            "super admin privileges required",
        )
    }

    pub async fn require_group_member(&self, user_id: u64, group_id: u64) -> CoreResult<()> {
        allow(
            self.group_member(user_id, group_id).await?,
            "not a member of this group",
        )
    }

    pub async fn require_group_elevated(&self, user_id: u64, group_id: u64) -> CoreResult<()> {
        allow(
            self.group_elevated(user_id, group_id).await?,
            "group admin or manager role required",
        )
    }

    pub async fn require_user_or_super(&self, user_id: u64, target_user_id: u64) -> CoreResult<()> {
        allow(
            self.user_or_super(user_id, target_user_id).await?,
            "can only modify your own account",
        )
    }
}

fn allow(granted: bool, reason: &str) -> CoreResult<()> {
    if granted {
        Ok(())
    } else {
        Err(CoreError::Forbidden(reason.to_string()))
    }
}

use chrono::Utc;
use pkg_constants::auth::{RESERVED_ADMIN_ID, RESERVED_GROUP_NAME};
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::AuditEvent;
use pkg_types::group::{
    Group, GroupMembers, GroupRole, Membership, MembershipDeleteRequest, MembershipRequest, Role,
    UserMemberships, UserRole,
};
use pkg_types::user::User;
use pkg_types::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{info, warn};

use crate::Caller;
use crate::allocator::WorkspaceAllocator;

/// (user, group, role) lifecycle. Joining a group provisions the user's
/// namespace in every project of that group; leaving tears it down.
#[derive(Clone)]
pub struct MembershipService {
    repos: Repos,
    allocator: WorkspaceAllocator,
    audit: Arc<dyn AuditSink>,
}

fn key(user_id: u64, group_id: u64) -> String {
    format!("{}/{}", user_id, group_id)
}

impl MembershipService {
    pub fn new(repos: Repos, allocator: WorkspaceAllocator, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repos,
            allocator,
            audit,
        }
    }

    async fn user(&self, id: u64) -> CoreResult<User> {
        self.repos
            .users
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("user {}", id)))
    }

    async fn group(&self, id: u64) -> CoreResult<Group> {
        self.repos
            .groups
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("group {}", id)))
    }

    /// Whether (user, group) is the locked super-admin cell.
    async fn is_locked(&self, user_id: u64, group_id: u64) -> CoreResult<bool> {
        if user_id != RESERVED_ADMIN_ID {
            return Ok(false);
        }
        Ok(self.group(group_id).await?.name == RESERVED_GROUP_NAME)
    }

    pub async fn list(&self) -> CoreResult<Vec<Membership>> {
        Ok(self.repos.memberships.list().await?)
    }

    pub async fn create(&self, caller: &Caller, input: MembershipRequest) -> CoreResult<Membership> {
        let user = self.user(input.u_id).await?;
        let group = self.group(input.g_id).await?;
        if self.repos.memberships.get(user.id, group.id).await?.is_some() {
            return Err(CoreError::AlreadyExists(format!(
                "user {} is already a member of group {}",
                user.username, group.name
            )));
        }
        let membership = self
            .repos
            .memberships
            .create(Membership {
                user_id: user.id,
                group_id: group.id,
                role: input.role,
                created_at: Utc::now(),
            })
            .await?;
        self.audit.record(AuditEvent::created(
            &caller.actor(),
            "membership",
            key(user.id, group.id),
            &membership,
        ));
        info!("Added {} to group {} as {}", user.username, group.name, input.role);

        if let Err(e) = self.allocator.allocate_for_group(group.id, &user.username).await {
            warn!(
                "Failed to provision namespaces for {} in group {}: {}",
                user.username, group.name, e
            );
        }
        Ok(membership)
    }

    pub async fn update_role(&self, caller: &Caller, input: MembershipRequest) -> CoreResult<Membership> {
        let before = self
            .repos
            .memberships
            .get(input.u_id, input.g_id)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!("membership of user {} in group {}", input.u_id, input.g_id))
            })?;
        if input.role != Role::Admin && self.is_locked(input.u_id, input.g_id).await? {
            return Err(CoreError::Forbidden(
                "cannot downgrade admin user role in super group".into(),
            ));
        }
        let mut membership = before.clone();
        membership.role = input.role;
        self.repos.memberships.update(&membership).await?;
        self.audit.record(AuditEvent::updated(
            &caller.actor(),
            "membership",
            key(input.u_id, input.g_id),
            &before,
            &membership,
        ));
        Ok(membership)
    }

    pub async fn delete(&self, caller: &Caller, input: MembershipDeleteRequest) -> CoreResult<()> {
        if self.is_locked(input.u_id, input.g_id).await? {
            return Err(CoreError::Forbidden(
                "cannot remove admin user from super group".into(),
            ));
        }
        let before = self
            .repos
            .memberships
            .get(input.u_id, input.g_id)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!("membership of user {} in group {}", input.u_id, input.g_id))
            })?;
        let user = self.user(input.u_id).await?;

        if let Err(e) = self.allocator.deallocate_for_group(input.g_id, &user.username).await {
            warn!(
                "Failed to remove namespaces of {} in group {}: {}",
                user.username, input.g_id, e
            );
        }
        self.repos.memberships.delete(input.u_id, input.g_id).await?;
        self.audit.record(AuditEvent::deleted(
            &caller.actor(),
            "membership",
            key(input.u_id, input.g_id),
            &before,
        ));
        info!("Removed {} from group {}", user.username, input.g_id);
        Ok(())
    }

    pub async fn list_by_user(&self, user_id: u64) -> CoreResult<UserMemberships> {
        let user = self.user(user_id).await?;
        let mut groups = Vec::new();
        for m in self.repos.memberships.list_by_user(user_id).await? {
            if let Some(group) = self.repos.groups.get(m.group_id).await? {
                groups.push(GroupRole {
                    g_id: group.id,
                    group_name: group.name,
                    role: m.role,
                });
            }
        }
        Ok(UserMemberships {
            u_id: user.id,
            username: user.username,
            groups,
        })
    }

    pub async fn list_by_group(&self, group_id: u64) -> CoreResult<GroupMembers> {
        let group = self.group(group_id).await?;
        let mut users = Vec::new();
        for m in self.repos.memberships.list_by_group(group_id).await? {
            if let Some(user) = self.repos.users.get(m.user_id).await? {
                users.push(UserRole {
                    u_id: user.id,
                    username: user.username,
                    role: m.role,
                });
            }
        }
        Ok(GroupMembers {
            g_id: group.id,
            group_name: group.name,
            users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[tokio::test]
    async fn joining_provisions_and_leaving_tears_down() {
        let fx = Fixture::new();
        let admin = fx.super_admin().await;
        let alice = fx.user("Alice.B").await;
        let team = fx.group("team").await;
        let project = fx.project(team.id, "vision", 0, "none").await;
        let svc = &fx.engine.memberships;

        svc.create(
            &admin,
            MembershipRequest {
                u_id: alice.id,
                g_id: team.id,
                role: Role::User,
            },
        )
        .await
        .unwrap();
        let ns = format!("proj-{}-alice-b", project.id);
        assert!(fx.mock.has_namespace(&ns).await);

        assert!(matches!(
            svc.create(
                &admin,
                MembershipRequest {
                    u_id: alice.id,
                    g_id: team.id,
                    role: Role::Manager,
                },
            )
            .await,
            Err(CoreError::AlreadyExists(_))
        ));

        let listing = svc.list_by_user(alice.id).await.unwrap();
        assert_eq!(listing.groups.len(), 1);
        assert_eq!(listing.groups[0].group_name, "team");
        let members = svc.list_by_group(team.id).await.unwrap();
        assert_eq!(members.users[0].username, "Alice.B");

        svc.update_role(
            &admin,
            MembershipRequest {
                u_id: alice.id,
                g_id: team.id,
                role: Role::Manager,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            fx.engine.gate.role_in(alice.id, team.id).await.unwrap(),
            Some(Role::Manager)
        );

        svc.delete(
            &admin,
            MembershipDeleteRequest {
                u_id: alice.id,
                g_id: team.id,
            },
        )
        .await
        .unwrap();
        assert!(!fx.mock.has_namespace(&ns).await);
        assert!(svc.list_by_user(alice.id).await.unwrap().groups.is_empty());
    }

    #[tokio::test]
    async fn super_admin_cell_is_locked() {
        let fx = Fixture::new();
        let admin = fx.super_admin().await;
        let super_id = fx.engine.repos.groups.get_by_name("super").await.unwrap().unwrap().id;
        let svc = &fx.engine.memberships;

        let err = svc
            .delete(
                &admin,
                MembershipDeleteRequest {
                    u_id: admin.user_id,
                    g_id: super_id,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot remove admin user from super group");

        let err = svc
            .update_role(
                &admin,
                MembershipRequest {
                    u_id: admin.user_id,
                    g_id: super_id,
                    role: Role::User,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot downgrade admin user role in super group");
        assert!(fx.engine.gate.is_super_admin(admin.user_id).await.unwrap());
    }
}

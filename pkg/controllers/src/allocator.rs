use pkg_cluster::ClusterGateway;
use pkg_constants::labels::{MANAGED_BY_LABEL, PLATFORM_NAME, PROJECT_ID_LABEL};
use pkg_manifest::naming::{format_namespace, sanitise};
use pkg_state::Repos;
use pkg_types::project::Project;
use pkg_types::user::User;
use pkg_types::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Creates and removes the per-(project, member) namespaces.
#[derive(Clone)]
pub struct WorkspaceAllocator {
    repos: Repos,
    gateway: Arc<dyn ClusterGateway>,
}

fn namespace_labels(project_id: u64) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), PLATFORM_NAME.to_string()),
        (PROJECT_ID_LABEL.to_string(), project_id.to_string()),
    ])
}

/// Keep the first error, log the rest.
fn keep_first(first: &mut Option<CoreError>, what: &str, err: CoreError) {
    warn!("{}: {}", what, err);
    if first.is_none() {
        *first = Some(err);
    }
}

impl WorkspaceAllocator {
    pub fn new(repos: Repos, gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { repos, gateway }
    }

    async fn project(&self, project_id: u64) -> CoreResult<Project> {
        self.repos
            .projects
            .get(project_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("project {}", project_id)))
    }

    /// Current members of the project's group.
    pub async fn members(&self, project_id: u64) -> CoreResult<Vec<User>> {
        let project = self.project(project_id).await?;
        let mut users = Vec::new();
        for membership in self.repos.memberships.list_by_group(project.group_id).await? {
            match self.repos.users.get(membership.user_id).await? {
                Some(user) => users.push(user),
                None => warn!(
                    "Membership of group {} references missing user {}",
                    project.group_id, membership.user_id
                ),
            }
        }
        Ok(users)
    }

    /// Namespaces of every current member of the project.
    pub async fn member_namespaces(&self, project_id: u64) -> CoreResult<Vec<String>> {
        Ok(self
            .members(project_id)
            .await?
            .iter()
            .map(|u| format_namespace(project_id, &sanitise(&u.username)))
            .collect())
    }

    /// Ensure a namespace for every member. All members are attempted;
    /// the first failure is reported and created namespaces stay.
    pub async fn allocate(&self, project_id: u64) -> CoreResult<()> {
        let mut first = None;
        for ns in self.member_namespaces(project_id).await? {
            match self.gateway.ensure_namespace(&ns, &namespace_labels(project_id)).await {
                Ok(()) => info!("Allocated workspace {}", ns),
                Err(e) => keep_first(&mut first, &format!("Failed to allocate {}", ns), e.into()),
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub async fn deallocate(&self, project_id: u64) -> CoreResult<()> {
        let mut first = None;
        for ns in self.member_namespaces(project_id).await? {
            match self.gateway.delete_namespace(&ns).await {
                Ok(()) => info!("Released workspace {}", ns),
                Err(e) => keep_first(&mut first, &format!("Failed to release {}", ns), e.into()),
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub async fn allocate_member(&self, project_id: u64, username: &str) -> CoreResult<()> {
        let ns = format_namespace(project_id, &sanitise(username));
        self.gateway
            .ensure_namespace(&ns, &namespace_labels(project_id))
            .await?;
        info!("Allocated workspace {}", ns);
        Ok(())
    }

    pub async fn deallocate_member(&self, project_id: u64, username: &str) -> CoreResult<()> {
        let ns = format_namespace(project_id, &sanitise(username));
        self.gateway.delete_namespace(&ns).await?;
        info!("Released workspace {}", ns);
        Ok(())
    }

    /// Give a new group member a namespace in each of the group's projects.
    pub async fn allocate_for_group(&self, group_id: u64, username: &str) -> CoreResult<()> {
        let mut first = None;
        for project in self.repos.projects.list_by_group(group_id).await? {
            if let Err(e) = self.allocate_member(project.id, username).await {
                keep_first(
                    &mut first,
                    &format!("Failed to allocate project {} for {}", project.id, username),
                    e,
                );
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub async fn deallocate_for_group(&self, group_id: u64, username: &str) -> CoreResult<()> {
        let mut first = None;
        for project in self.repos.projects.list_by_group(group_id).await? {
            if let Err(e) = self.deallocate_member(project.id, username).await {
                keep_first(
                    &mut first,
                    &format!("Failed to release project {} for {}", project.id, username),
                    e,
                );
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::Fixture;
    use pkg_types::group::Role;

    #[tokio::test]
    async fn allocate_and_deallocate_follow_group_members() {
        let fx = Fixture::new();
        let alice = fx.user("Alice.Smith").await;
        let bob = fx.user("bob").await;
        let team = fx.group("team").await;
        fx.member(alice.id, team.id, Role::Manager).await;
        fx.member(bob.id, team.id, Role::User).await;
        let project = fx.project(team.id, "vision", 0, "shared").await;
        let allocator = &fx.engine.allocator;

        allocator.allocate(project.id).await.unwrap();
        let alice_ns = format!("proj-{}-alice-smith", project.id);
        let bob_ns = format!("proj-{}-bob", project.id);
        assert!(fx.mock.has_namespace(&alice_ns).await);
        assert!(fx.mock.has_namespace(&bob_ns).await);

        // Second run is a no-op.
        let writes = fx.mock.creating_writes();
        allocator.allocate(project.id).await.unwrap();
        assert_eq!(fx.mock.creating_writes(), writes);

        allocator.deallocate(project.id).await.unwrap();
        assert!(!fx.mock.has_namespace(&alice_ns).await);
        allocator.deallocate(project.id).await.unwrap();
    }

    #[tokio::test]
    async fn group_fan_out_covers_every_project() {
        let fx = Fixture::new();
        let team = fx.group("team").await;
        let p1 = fx.project(team.id, "a", 0, "shared").await;
        let p2 = fx.project(team.id, "b", 0, "shared").await;
        let other = fx.group("other").await;
        let p3 = fx.project(other.id, "c", 0, "shared").await;

        fx.engine.allocator.allocate_for_group(team.id, "carol").await.unwrap();
        assert!(fx.mock.has_namespace(&format!("proj-{}-carol", p1.id)).await);
        assert!(fx.mock.has_namespace(&format!("proj-{}-carol", p2.id)).await);
        assert!(!fx.mock.has_namespace(&format!("proj-{}-carol", p3.id)).await);

        fx.engine.allocator.deallocate_for_group(team.id, "carol").await.unwrap();
        assert!(fx.mock.namespaces().await.is_empty());
    }
}

//! In-memory implementation of the membership store.
//!
//! # Purpose
//! Implements [`MembershipStore`] with `HashMap`s guarded by `tokio::sync::RwLock`.
//! It exists for local development, tests, and deployments where durability is
//! not required.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: every mutation holds the memberships write
//!   lock for its whole duration, so the guard check, uniqueness check, and write
//!   are atomic with respect to other mutations.
//! - **No multi-node coordination**: each instance has independent state.
use super::{MembershipStore, MutationGuard, StoreError, StoreResult, guard_denied};
use crate::model::{Membership, Project, ProjectRole};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    /// Project references keyed by `project_id`.
    projects: Arc<RwLock<HashMap<Uuid, Project>>>,
    /// Memberships keyed by `membership_id`.
    memberships: Arc<RwLock<HashMap<Uuid, Membership>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_guard(memberships: &HashMap<Uuid, Membership>, guard: &MutationGuard) -> StoreResult<()> {
    match guard {
        MutationGuard::GlobalAuthority => Ok(()),
        MutationGuard::ProjectManager {
            project_id,
            account_id,
        } => {
            let still_manager = memberships.values().any(|membership| {
                membership.project_id == *project_id
                    && membership.account_id == *account_id
                    && membership.project_role == ProjectRole::Manager
            });
            if still_manager {
                Ok(())
            } else {
                Err(guard_denied())
            }
        }
    }
}

fn sorted(mut memberships: Vec<Membership>) -> Vec<Membership> {
    memberships.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.membership_id.cmp(&b.membership_id))
    });
    memberships
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn upsert_project(&self, project: Project) -> StoreResult<Project> {
        self.projects
            .write()
            .await
            .insert(project.project_id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: Uuid) -> StoreResult<Project> {
        self.projects
            .read()
            .await
            .get(&project_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("project".into()))
    }

    async fn project_exists(&self, project_id: Uuid) -> StoreResult<bool> {
        Ok(self.projects.read().await.contains_key(&project_id))
    }

    async fn list_memberships(&self, project_id: Uuid) -> StoreResult<Vec<Membership>> {
        let memberships = self.memberships.read().await;
        Ok(sorted(
            memberships
                .values()
                .filter(|membership| membership.project_id == project_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_account_memberships(&self, account_id: &str) -> StoreResult<Vec<Membership>> {
        let memberships = self.memberships.read().await;
        Ok(sorted(
            memberships
                .values()
                .filter(|membership| membership.account_id == account_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find_membership(
        &self,
        project_id: Uuid,
        account_id: &str,
    ) -> StoreResult<Option<Membership>> {
        Ok(self
            .memberships
            .read()
            .await
            .values()
            .find(|membership| {
                membership.project_id == project_id && membership.account_id == account_id
            })
            .cloned())
    }

    async fn insert_memberships(
        &self,
        guard: &MutationGuard,
        memberships: Vec<Membership>,
    ) -> StoreResult<Vec<Membership>> {
        let mut stored = self.memberships.write().await;
        check_guard(&stored, guard)?;

        // Validate the whole batch before writing anything.
        let mut batch_keys = HashSet::new();
        for membership in &memberships {
            let key = (membership.project_id, membership.account_id.as_str());
            if !batch_keys.insert(key) {
                return Err(StoreError::Conflict(format!(
                    "account {} appears twice in the batch",
                    membership.account_id
                )));
            }
            let exists = stored.values().any(|existing| {
                existing.project_id == membership.project_id
                    && existing.account_id == membership.account_id
            });
            if exists {
                return Err(StoreError::Conflict(format!(
                    "account {} is already a member of the project",
                    membership.account_id
                )));
            }
        }
        for membership in &memberships {
            stored.insert(membership.membership_id, membership.clone());
        }
        Ok(memberships)
    }

    async fn delete_memberships(
        &self,
        guard: &MutationGuard,
        project_id: Uuid,
        membership_ids: &[Uuid],
        role: Option<ProjectRole>,
    ) -> StoreResult<Vec<Membership>> {
        let mut stored = self.memberships.write().await;
        check_guard(&stored, guard)?;
        let matching: Vec<Uuid> = membership_ids
            .iter()
            .filter(|id| {
                stored.get(*id).is_some_and(|membership| {
                    membership.project_id == project_id
                        && role.is_none_or(|role| membership.project_role == role)
                })
            })
            .copied()
            .collect();
        let deleted = matching
            .iter()
            .filter_map(|id| stored.remove(id))
            .collect();
        Ok(sorted(deleted))
    }

    async fn update_membership_role(
        &self,
        guard: &MutationGuard,
        project_id: Uuid,
        membership_id: Uuid,
        role: ProjectRole,
    ) -> StoreResult<(Membership, Membership)> {
        let mut stored = self.memberships.write().await;
        check_guard(&stored, guard)?;
        let membership = stored
            .get_mut(&membership_id)
            .filter(|membership| membership.project_id == project_id)
            .ok_or_else(|| StoreError::NotFound("membership".into()))?;
        let previous = membership.clone();
        membership.project_role = role;
        Ok((previous, membership.clone()))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

//! Membership storage.
//!
//! # Purpose
//! Persists the local membership projection and the project references it is
//! keyed by. Two backends implement [`MembershipStore`]: an in-memory map for
//! development and tests, and Postgres for durable deployments.
//!
//! # Key invariants
//! - At most one membership per `(project_id, account_id)`; inserting a
//!   duplicate fails with [`StoreError::Conflict`] and writes nothing.
//! - Bulk inserts and deletes are all-or-nothing.
//! - Every mutation carries a [`MutationGuard`]. Project-manager authority is
//!   re-checked inside the same lock or transaction as the write, so a manager
//!   demoted mid-request cannot complete the mutation.
use crate::model::{Membership, Project, ProjectRole};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// Authority the caller holds for a mutation, re-verified at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationGuard {
    /// Already verified against the identity provider.
    GlobalAuthority,
    /// Caller must still hold the manager role in `project_id` when the write runs.
    ProjectManager {
        project_id: Uuid,
        account_id: String,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn guard_denied() -> StoreError {
    StoreError::PreconditionFailed("caller no longer holds the project manager role".into())
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn upsert_project(&self, project: Project) -> StoreResult<Project>;
    async fn get_project(&self, project_id: Uuid) -> StoreResult<Project>;
    async fn project_exists(&self, project_id: Uuid) -> StoreResult<bool>;

    async fn list_memberships(&self, project_id: Uuid) -> StoreResult<Vec<Membership>>;
    async fn list_account_memberships(&self, account_id: &str) -> StoreResult<Vec<Membership>>;
    async fn find_membership(
        &self,
        project_id: Uuid,
        account_id: &str,
    ) -> StoreResult<Option<Membership>>;

    /// Insert every row or none. All rows must belong to one project.
    async fn insert_memberships(
        &self,
        guard: &MutationGuard,
        memberships: Vec<Membership>,
    ) -> StoreResult<Vec<Membership>>;

    /// Delete the listed memberships of `project_id`, optionally only those with
    /// `role`. Returns the rows actually deleted; ids that do not match are ignored.
    async fn delete_memberships(
        &self,
        guard: &MutationGuard,
        project_id: Uuid,
        membership_ids: &[Uuid],
        role: Option<ProjectRole>,
    ) -> StoreResult<Vec<Membership>>;

    /// Change one membership's role. Returns `(previous, updated)`.
    async fn update_membership_role(
        &self,
        guard: &MutationGuard,
        project_id: Uuid,
        membership_id: Uuid,
        role: ProjectRole,
    ) -> StoreResult<(Membership, Membership)>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

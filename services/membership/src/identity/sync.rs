//! Group membership synchronizer.
//!
//! # Purpose
//! Converges an account's provider-side group set to a desired set by running
//! the diff engine and executing the resulting add/remove calls.
//!
//! # Key invariants
//! - Removals run before additions so an account never briefly holds both a
//!   stale elevated group and its replacement.
//! - Every group to add is resolved against the catalog before the first call;
//!   an unknown name fails the sync with no remote mutation.
//! - Completed calls are never rolled back. A failure reports the completed,
//!   failed, and pending operations; re-running the full sync is safe.
//! - Cancellation is checked between calls. An in-flight call always finishes.
use crate::identity::diff::{self, GroupDiff};
use crate::identity::gateway::{GatewayError, Group, IdentityGateway, find_group};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOpKind {
    Remove,
    Add,
}

impl GroupOpKind {
    fn as_str(&self) -> &'static str {
        match self {
            GroupOpKind::Remove => "remove",
            GroupOpKind::Add => "add",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOperation {
    pub kind: GroupOpKind,
    pub group_id: String,
    pub group_name: String,
}

impl fmt::Display for GroupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.group_name)
    }
}

/// Relative change to an account's groups: everything else is left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupChange {
    pub grant: BTreeSet<String>,
    pub revoke: BTreeSet<String>,
}

impl GroupChange {
    pub fn grant(group: impl Into<String>) -> Self {
        Self {
            grant: BTreeSet::from([group.into()]),
            revoke: BTreeSet::new(),
        }
    }

    pub fn revoke(group: impl Into<String>) -> Self {
        Self {
            grant: BTreeSet::new(),
            revoke: BTreeSet::from([group.into()]),
        }
    }

    /// Desired set after applying this change to `current`.
    ///
    /// A group named in both `grant` and `revoke` ends up granted.
    pub fn desired_from(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        let mut desired: BTreeSet<String> = current
            .iter()
            .filter(|name| !diff::contains_ignore_case(&self.revoke, name))
            .cloned()
            .collect();
        for name in &self.grant {
            if !diff::contains_ignore_case(&desired, name) {
                desired.insert(name.clone());
            }
        }
        desired
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub account_id: String,
    pub applied: Vec<GroupOperation>,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("groups not found: {}", .0.join(", "))]
    GroupNotFound(Vec<String>),
    #[error("failed to read group state: {0}")]
    Gateway(#[source] GatewayError),
    #[error("group sync stopped at '{failed}' after {} operation(s): {source}", .completed.len())]
    Partial {
        completed: Vec<GroupOperation>,
        failed: GroupOperation,
        pending: Vec<GroupOperation>,
        #[source]
        source: GatewayError,
    },
    #[error("group sync cancelled after {} operation(s)", .completed.len())]
    Cancelled {
        completed: Vec<GroupOperation>,
        pending: Vec<GroupOperation>,
    },
}

impl SyncError {
    /// Operations not known to have been applied, in execution order.
    pub fn remaining(&self) -> Vec<GroupOperation> {
        match self {
            SyncError::Partial {
                failed, pending, ..
            } => std::iter::once(failed.clone())
                .chain(pending.iter().cloned())
                .collect(),
            SyncError::Cancelled { pending, .. } => pending.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct GroupSynchronizer {
    gateway: Arc<dyn IdentityGateway>,
}

impl GroupSynchronizer {
    pub fn new(gateway: Arc<dyn IdentityGateway>) -> Self {
        Self { gateway }
    }

    /// Make the account's groups equal `desired`.
    pub async fn sync(
        &self,
        account_id: &str,
        desired: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        self.converge(account_id, cancel, |_| desired.clone()).await
    }

    /// Grant and revoke specific groups, leaving unrelated groups untouched.
    pub async fn apply(
        &self,
        account_id: &str,
        change: &GroupChange,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        self.converge(account_id, cancel, |current| change.desired_from(current))
            .await
    }

    async fn converge<F>(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
        desired_for: F,
    ) -> Result<SyncReport, SyncError>
    where
        F: FnOnce(&BTreeSet<String>) -> BTreeSet<String>,
    {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                completed: Vec::new(),
                pending: Vec::new(),
            });
        }

        let current_groups = self
            .gateway
            .account_groups(account_id)
            .await
            .map_err(|err| match err {
                GatewayError::NotFound(_) => SyncError::AccountNotFound(account_id.to_string()),
                other => SyncError::Gateway(other),
            })?;
        let current: BTreeSet<String> = current_groups
            .iter()
            .map(|group| group.name.clone())
            .collect();
        let desired = desired_for(&current);
        let plan = diff::diff(&current, &desired);
        if plan.is_empty() {
            tracing::debug!(account_id, "account groups already converged");
            return Ok(SyncReport {
                account_id: account_id.to_string(),
                applied: Vec::new(),
            });
        }

        let catalog = if plan.to_add.is_empty() {
            Vec::new()
        } else {
            self.gateway
                .list_groups(None)
                .await
                .map_err(SyncError::Gateway)?
        };
        let operations = resolve_operations(&plan, &current_groups, &catalog)?;
        self.execute(account_id, operations, cancel).await
    }

    async fn execute(
        &self,
        account_id: &str,
        operations: Vec<GroupOperation>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let mut completed = Vec::with_capacity(operations.len());
        let mut queue = operations.into_iter();
        while let Some(op) = queue.next() {
            if cancel.is_cancelled() {
                tracing::info!(account_id, completed = completed.len(), "group sync cancelled");
                let pending = std::iter::once(op).chain(queue).collect();
                return Err(SyncError::Cancelled { completed, pending });
            }
            let result = match op.kind {
                GroupOpKind::Remove => {
                    self.gateway
                        .remove_account_from_group(account_id, &op.group_id)
                        .await
                }
                GroupOpKind::Add => {
                    self.gateway
                        .add_account_to_group(account_id, &op.group_id)
                        .await
                }
            };
            match result {
                Ok(()) => {
                    metrics::counter!(
                        "group_sync_ops_total",
                        "op" => op.kind.as_str(),
                        "outcome" => "ok"
                    )
                    .increment(1);
                    tracing::info!(account_id, group = %op.group_name, op = op.kind.as_str(), "group membership changed");
                    completed.push(op);
                }
                Err(source) => {
                    metrics::counter!(
                        "group_sync_ops_total",
                        "op" => op.kind.as_str(),
                        "outcome" => "error"
                    )
                    .increment(1);
                    tracing::warn!(account_id, group = %op.group_name, op = op.kind.as_str(), error = %source, "group membership change failed");
                    return Err(SyncError::Partial {
                        completed,
                        failed: op,
                        pending: queue.collect(),
                        source,
                    });
                }
            }
        }
        Ok(SyncReport {
            account_id: account_id.to_string(),
            applied: completed,
        })
    }
}

fn resolve_operations(
    plan: &GroupDiff,
    current: &[Group],
    catalog: &[Group],
) -> Result<Vec<GroupOperation>, SyncError> {
    let mut missing = Vec::new();
    let mut additions = Vec::new();
    for name in &plan.to_add {
        match find_group(catalog, name) {
            Some(group) => additions.push(GroupOperation {
                kind: GroupOpKind::Add,
                group_id: group.id.clone(),
                group_name: group.name.clone(),
            }),
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(SyncError::GroupNotFound(missing));
    }

    let mut operations: Vec<GroupOperation> = plan
        .to_remove
        .iter()
        .filter_map(|name| find_group(current, name))
        .map(|group| GroupOperation {
            kind: GroupOpKind::Remove,
            group_id: group.id.clone(),
            group_name: group.name.clone(),
        })
        .collect();
    operations.extend(additions);
    Ok(operations)
}

//! Project membership authority.
//!
//! # Purpose
//! Single gate for every membership mutation. It validates the request, checks
//! the caller's authority, writes the local projection, and then drives group
//! changes for each affected account through the synchronizer.
//!
//! # Authority model
//! - Global authority (add/remove managers, reconciliation) is read from the
//!   identity provider: the caller must belong to the system-admin group.
//! - In-project authority (add/remove members, role changes) is read from the
//!   local store: the caller must hold the manager role in that project. The
//!   store re-checks it inside the write via [`MutationGuard`].
//!
//! # Key invariants
//! - A requested role naming the system-admin group is rejected before any
//!   lookup, whoever the caller is.
//! - Local rows are committed in one store transaction before any remote call.
//!   Remote group outcomes are reported per account and never undo the rows.
//! - Cancellation is honoured between remote calls. A call already in flight
//!   always completes.
use crate::error::MembershipError;
use crate::identity::gateway::{GatewayError, IdentityGateway};
use crate::identity::sync::{GroupChange, GroupOperation, GroupSynchronizer, SyncError, SyncReport};
use crate::model::{Membership, Project, ProjectRole, RoleGroups, same_name};
use crate::store::{MembershipStore, MutationGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity of the account issuing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub account_id: String,
}

impl Caller {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// One entry of a bulk add. A missing role means `member`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemberRequest {
    pub account_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl MemberRequest {
    pub fn new(account_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            role: Some(role.into()),
        }
    }
}

/// Choices about remote group handling that change the security posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipPolicy {
    /// Grant the new role's group and revoke the old one after a role change.
    pub resync_on_role_change: bool,
    /// Revoke the role's group when a removed account holds that role nowhere else.
    pub revoke_on_remove: bool,
}

impl Default for MembershipPolicy {
    fn default() -> Self {
        Self {
            resync_on_role_change: true,
            revoke_on_remove: false,
        }
    }
}

/// Outcome of the remote group step for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupSyncOutcome {
    Synced {
        applied: Vec<GroupOperation>,
    },
    /// Not attempted because the request was cancelled first.
    Skipped,
    Failed {
        error: String,
        pending: Vec<GroupOperation>,
    },
}

impl GroupSyncOutcome {
    fn from_result(result: Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) => GroupSyncOutcome::Synced {
                applied: report.applied,
            },
            Err(SyncError::Cancelled { completed, .. }) if completed.is_empty() => {
                GroupSyncOutcome::Skipped
            }
            Err(err) => GroupSyncOutcome::Failed {
                pending: err.remaining(),
                error: err.to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, GroupSyncOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrolledMember {
    pub membership_id: Uuid,
    pub account_id: String,
    pub project_role: ProjectRole,
    pub group_sync: GroupSyncOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentReport {
    pub project_id: Uuid,
    pub enrolled: Vec<EnrolledMember>,
    /// Requested ids the identity provider does not know; dropped, not enrolled.
    pub unknown_accounts: Vec<String>,
    /// Requested ids that already had a membership in the project.
    pub already_enrolled: Vec<String>,
}

impl EnrollmentReport {
    pub fn membership_ids(&self) -> Vec<Uuid> {
        self.enrolled
            .iter()
            .map(|member| member.membership_id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRevocation {
    pub account_id: String,
    pub group: String,
    pub outcome: GroupSyncOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub project_id: Uuid,
    pub removed: Vec<Membership>,
    /// Empty unless the revoke-on-remove policy is enabled.
    pub revocations: Vec<GroupRevocation>,
}

impl RemovalReport {
    pub fn membership_ids(&self) -> Vec<Uuid> {
        self.removed
            .iter()
            .map(|membership| membership.membership_id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChangeReport {
    pub membership: Membership,
    pub previous_role: ProjectRole,
    /// `None` when the resync-on-role-change policy is disabled.
    pub group_sync: Option<GroupSyncOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub account_id: String,
    pub held_roles: Vec<ProjectRole>,
    pub applied: Vec<GroupOperation>,
}

#[derive(Clone)]
pub struct MembershipAuthority {
    store: Arc<dyn MembershipStore>,
    gateway: Arc<dyn IdentityGateway>,
    synchronizer: GroupSynchronizer,
    role_groups: RoleGroups,
    policy: MembershipPolicy,
}

impl MembershipAuthority {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        gateway: Arc<dyn IdentityGateway>,
        role_groups: RoleGroups,
        policy: MembershipPolicy,
    ) -> Self {
        let synchronizer = GroupSynchronizer::new(gateway.clone());
        Self {
            store,
            gateway,
            synchronizer,
            role_groups,
            policy,
        }
    }

    pub fn policy(&self) -> MembershipPolicy {
        self.policy
    }

    pub fn role_groups(&self) -> &RoleGroups {
        &self.role_groups
    }

    /// Enroll accounts as project managers. Requires global authority.
    ///
    /// # Errors
    /// - `Validation` when no account id is supplied.
    /// - `NotFound` when the project or every requested account is unknown.
    /// - `AccessDenied` when the caller lacks global authority.
    /// - `AllMembersAlreadyExist` when every account is already enrolled.
    pub async fn add_managers(
        &self,
        project_id: Uuid,
        caller: &Caller,
        account_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<EnrollmentReport, MembershipError> {
        let entries: Vec<(String, ProjectRole)> = account_ids
            .iter()
            .map(|account_id| (account_id.clone(), ProjectRole::Manager))
            .collect();
        if entries.is_empty() {
            return Err(MembershipError::Validation(
                "at least one account id is required".to_string(),
            ));
        }
        self.require_project(project_id).await?;
        self.ensure_global_authority(caller).await?;
        self.enroll(
            project_id,
            MutationGuard::GlobalAuthority,
            entries,
            "add_managers",
            cancel,
        )
        .await
    }

    /// Enroll accounts with the requested roles. Requires the caller to manage
    /// the project.
    ///
    /// Duplicate account ids keep the last requested role. Accounts unknown to
    /// the identity provider are skipped and listed in the report.
    ///
    /// # Errors
    /// - `AccessDenied` for a restricted role value or a caller that does not
    ///   manage the project.
    /// - `Validation` for an unknown role value or an empty request.
    /// - `NotFound` when the project or every remaining account is unknown.
    /// - `AllMembersAlreadyExist` when nothing new remains after filtering.
    pub async fn add_members(
        &self,
        project_id: Uuid,
        caller: &Caller,
        requests: &[MemberRequest],
        cancel: &CancellationToken,
    ) -> Result<EnrollmentReport, MembershipError> {
        if let Some(restricted) = requests
            .iter()
            .filter_map(|request| request.role.as_deref())
            .find(|role| self.role_groups.is_restricted(role))
        {
            tracing::warn!(project_id = %project_id, caller = %caller.account_id, role = restricted, "restricted role requested");
            return Err(MembershipError::AccessDenied(
                "the system administrator role cannot be assigned through project membership"
                    .to_string(),
            ));
        }
        let mut entries = Vec::with_capacity(requests.len());
        for request in requests {
            let role = match request.role.as_deref().map(str::trim) {
                None | Some("") => ProjectRole::Member,
                Some(value) => self.role_groups.parse_role(value).ok_or_else(|| {
                    MembershipError::Validation(format!("unknown project role '{value}'"))
                })?,
            };
            entries.push((request.account_id.clone(), role));
        }
        if entries.is_empty() {
            return Err(MembershipError::Validation(
                "at least one member is required".to_string(),
            ));
        }
        self.require_project(project_id).await?;
        let guard = self.require_project_manager(project_id, caller).await?;
        self.enroll(project_id, guard, entries, "add_members", cancel)
            .await
    }

    /// Remove manager memberships. Requires global authority; memberships with
    /// any other role are left alone.
    pub async fn remove_managers(
        &self,
        project_id: Uuid,
        caller: &Caller,
        membership_ids: &[Uuid],
        cancel: &CancellationToken,
    ) -> Result<RemovalReport, MembershipError> {
        let ids = normalize_ids(membership_ids)?;
        self.require_project(project_id).await?;
        self.ensure_global_authority(caller).await?;
        self.remove(
            project_id,
            MutationGuard::GlobalAuthority,
            &ids,
            Some(ProjectRole::Manager),
            "remove_managers",
            cancel,
        )
        .await
    }

    /// Remove memberships of any role. Requires the caller to manage the project.
    pub async fn remove_members(
        &self,
        project_id: Uuid,
        caller: &Caller,
        membership_ids: &[Uuid],
        cancel: &CancellationToken,
    ) -> Result<RemovalReport, MembershipError> {
        let ids = normalize_ids(membership_ids)?;
        self.require_project(project_id).await?;
        let guard = self.require_project_manager(project_id, caller).await?;
        self.remove(project_id, guard, &ids, None, "remove_members", cancel)
            .await
    }

    /// Change one membership's role. The membership must belong to `project_id`.
    pub async fn update_member_role(
        &self,
        project_id: Uuid,
        caller: &Caller,
        membership_id: Uuid,
        role: &str,
        cancel: &CancellationToken,
    ) -> Result<RoleChangeReport, MembershipError> {
        if self.role_groups.is_restricted(role) {
            tracing::warn!(project_id = %project_id, caller = %caller.account_id, role, "restricted role requested");
            return Err(MembershipError::AccessDenied(
                "the system administrator role cannot be assigned through project membership"
                    .to_string(),
            ));
        }
        let role = self
            .role_groups
            .parse_role(role)
            .ok_or_else(|| MembershipError::Validation(format!("unknown project role '{role}'")))?;
        self.require_project(project_id).await?;
        let guard = self.require_project_manager(project_id, caller).await?;
        if cancel.is_cancelled() {
            return Err(MembershipError::Cancelled);
        }

        let (previous, updated) = self
            .store
            .update_membership_role(&guard, project_id, membership_id, role)
            .await?;
        tracing::info!(
            project_id = %project_id,
            membership_id = %membership_id,
            from = %previous.project_role,
            to = %updated.project_role,
            "membership role changed"
        );

        let group_sync = if self.policy.resync_on_role_change {
            let mut change = GroupChange::grant(self.role_groups.group_for(role));
            if !self
                .holds_role(&updated.account_id, previous.project_role)
                .await?
            {
                change
                    .revoke
                    .insert(self.role_groups.group_for(previous.project_role).to_string());
            }
            let outcome = GroupSyncOutcome::from_result(
                self.synchronizer
                    .apply(&updated.account_id, &change, cancel)
                    .await,
            );
            if outcome.is_failed() {
                tracing::warn!(account_id = %updated.account_id, ?outcome, "group resync after role change failed");
            }
            Some(outcome)
        } else {
            None
        };

        Ok(RoleChangeReport {
            previous_role: previous.project_role,
            membership: updated,
            group_sync,
        })
    }

    /// Role of `account_id` in `project_id`, or `None` without a membership.
    pub async fn get_role(
        &self,
        project_id: Uuid,
        account_id: &str,
    ) -> Result<Option<ProjectRole>, MembershipError> {
        Ok(self
            .store
            .find_membership(project_id, account_id)
            .await?
            .map(|membership| membership.project_role))
    }

    /// Record or refresh a project reference pushed by the project service.
    /// Requires global authority.
    pub async fn register_project(
        &self,
        caller: &Caller,
        project: Project,
    ) -> Result<Project, MembershipError> {
        if project.name.trim().is_empty() {
            return Err(MembershipError::Validation(
                "project name is required".to_string(),
            ));
        }
        self.ensure_global_authority(caller).await?;
        let project = self.store.upsert_project(project).await?;
        tracing::info!(project_id = %project.project_id, "project reference registered");
        Ok(project)
    }

    pub async fn project(&self, project_id: Uuid) -> Result<Project, MembershipError> {
        Ok(self.store.get_project(project_id).await?)
    }

    pub async fn list_members(&self, project_id: Uuid) -> Result<Vec<Membership>, MembershipError> {
        self.require_project(project_id).await?;
        Ok(self.store.list_memberships(project_id).await?)
    }

    /// Converge an account's managed role groups to the roles its memberships
    /// hold across all projects. Groups this service does not manage are kept.
    pub async fn reconcile_account(
        &self,
        caller: &Caller,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, MembershipError> {
        self.ensure_global_authority(caller).await?;
        let held_roles: BTreeSet<ProjectRole> = self
            .store
            .list_account_memberships(account_id)
            .await?
            .into_iter()
            .map(|membership| membership.project_role)
            .collect();
        let mut change = GroupChange::default();
        for role in ProjectRole::ALL {
            let group = self.role_groups.group_for(role).to_string();
            if held_roles.contains(&role) {
                change.grant.insert(group);
            } else {
                change.revoke.insert(group);
            }
        }
        let report = self.synchronizer.apply(account_id, &change, cancel).await?;
        tracing::info!(account_id, applied = report.applied.len(), "account groups reconciled");
        Ok(ReconcileReport {
            account_id: account_id.to_string(),
            held_roles: held_roles.into_iter().collect(),
            applied: report.applied,
        })
    }

    async fn enroll(
        &self,
        project_id: Uuid,
        guard: MutationGuard,
        entries: Vec<(String, ProjectRole)>,
        op: &'static str,
        cancel: &CancellationToken,
    ) -> Result<EnrollmentReport, MembershipError> {
        // Last role wins for a repeated id; first position is kept for ordering.
        let mut order: Vec<String> = Vec::new();
        let mut roles: HashMap<String, ProjectRole> = HashMap::new();
        for (account_id, role) in entries {
            let account_id = account_id.trim().to_string();
            if account_id.is_empty() {
                continue;
            }
            if roles.insert(account_id.clone(), role).is_none() {
                order.push(account_id);
            }
        }

        let enrolled: HashSet<String> = self
            .store
            .list_memberships(project_id)
            .await?
            .into_iter()
            .map(|membership| membership.account_id)
            .collect();
        let (already_enrolled, candidates): (Vec<String>, Vec<String>) = order
            .into_iter()
            .partition(|account_id| enrolled.contains(account_id));
        if candidates.is_empty() {
            return Err(MembershipError::AllMembersAlreadyExist);
        }

        if cancel.is_cancelled() {
            return Err(MembershipError::Cancelled);
        }
        let known = self.gateway.existing_account_ids(&candidates).await?;
        let (survivors, unknown_accounts): (Vec<String>, Vec<String>) = candidates
            .into_iter()
            .partition(|account_id| known.contains(account_id));
        if survivors.is_empty() {
            return Err(MembershipError::NotFound("account".to_string()));
        }
        if !unknown_accounts.is_empty() {
            tracing::info!(project_id = %project_id, unknown = ?unknown_accounts, "skipping accounts unknown to the identity provider");
        }
        if cancel.is_cancelled() {
            return Err(MembershipError::Cancelled);
        }

        let rows: Vec<Membership> = survivors
            .iter()
            .filter_map(|account_id| {
                roles
                    .get(account_id)
                    .map(|role| Membership::new(project_id, account_id.clone(), *role))
            })
            .collect();
        let rows = self.store.insert_memberships(&guard, rows).await?;
        metrics::counter!("membership_enrollments_total", "op" => op).increment(rows.len() as u64);
        tracing::info!(project_id = %project_id, op, count = rows.len(), "memberships created");

        let mut members = Vec::with_capacity(rows.len());
        for membership in rows {
            let group_sync = if cancel.is_cancelled() {
                GroupSyncOutcome::Skipped
            } else {
                let change = GroupChange::grant(self.role_groups.group_for(membership.project_role));
                GroupSyncOutcome::from_result(
                    self.synchronizer
                        .apply(&membership.account_id, &change, cancel)
                        .await,
                )
            };
            if group_sync.is_failed() {
                tracing::warn!(project_id = %project_id, account_id = %membership.account_id, ?group_sync, "group grant failed after enrollment");
            }
            members.push(EnrolledMember {
                membership_id: membership.membership_id,
                account_id: membership.account_id,
                project_role: membership.project_role,
                group_sync,
            });
        }

        Ok(EnrollmentReport {
            project_id,
            enrolled: members,
            unknown_accounts,
            already_enrolled,
        })
    }

    async fn remove(
        &self,
        project_id: Uuid,
        guard: MutationGuard,
        ids: &[Uuid],
        role: Option<ProjectRole>,
        op: &'static str,
        cancel: &CancellationToken,
    ) -> Result<RemovalReport, MembershipError> {
        if cancel.is_cancelled() {
            return Err(MembershipError::Cancelled);
        }
        let removed = self
            .store
            .delete_memberships(&guard, project_id, ids, role)
            .await?;
        if removed.is_empty() {
            return Err(MembershipError::MembersNotFound);
        }
        metrics::counter!("membership_removals_total", "op" => op).increment(removed.len() as u64);
        tracing::info!(project_id = %project_id, op, count = removed.len(), "memberships removed");

        let mut revocations = Vec::new();
        if self.policy.revoke_on_remove {
            for membership in &removed {
                if self
                    .holds_role(&membership.account_id, membership.project_role)
                    .await?
                {
                    continue;
                }
                let group = self.role_groups.group_for(membership.project_role).to_string();
                let outcome = if cancel.is_cancelled() {
                    GroupSyncOutcome::Skipped
                } else {
                    GroupSyncOutcome::from_result(
                        self.synchronizer
                            .apply(&membership.account_id, &GroupChange::revoke(group.clone()), cancel)
                            .await,
                    )
                };
                revocations.push(GroupRevocation {
                    account_id: membership.account_id.clone(),
                    group,
                    outcome,
                });
            }
        }

        Ok(RemovalReport {
            project_id,
            removed,
            revocations,
        })
    }

    /// True when any remaining membership of `account_id` holds `role`.
    async fn holds_role(&self, account_id: &str, role: ProjectRole) -> Result<bool, MembershipError> {
        Ok(self
            .store
            .list_account_memberships(account_id)
            .await?
            .iter()
            .any(|membership| membership.project_role == role))
    }

    async fn require_project(&self, project_id: Uuid) -> Result<(), MembershipError> {
        if self.store.project_exists(project_id).await? {
            Ok(())
        } else {
            Err(MembershipError::NotFound("project".to_string()))
        }
    }

    async fn require_project_manager(
        &self,
        project_id: Uuid,
        caller: &Caller,
    ) -> Result<MutationGuard, MembershipError> {
        let membership = self
            .store
            .find_membership(project_id, &caller.account_id)
            .await?;
        match membership {
            Some(membership) if membership.project_role == ProjectRole::Manager => {
                Ok(MutationGuard::ProjectManager {
                    project_id,
                    account_id: caller.account_id.clone(),
                })
            }
            _ => {
                tracing::warn!(project_id = %project_id, caller = %caller.account_id, "caller does not manage the project");
                Err(MembershipError::AccessDenied(
                    "caller is not a manager of this project".to_string(),
                ))
            }
        }
    }

    /// Succeeds when the caller belongs to the system-admin group in the
    /// identity provider. An account unknown to the provider has no authority.
    pub async fn ensure_global_authority(&self, caller: &Caller) -> Result<(), MembershipError> {
        let groups = match self.gateway.account_groups(&caller.account_id).await {
            Ok(groups) => groups,
            Err(GatewayError::NotFound(_)) => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let admin = groups
            .iter()
            .any(|group| same_name(&group.name, &self.role_groups.system_admin));
        if admin {
            Ok(())
        } else {
            tracing::warn!(caller = %caller.account_id, "caller lacks global authority");
            Err(MembershipError::AccessDenied(
                "caller lacks the system administrator role".to_string(),
            ))
        }
    }
}

/// Drop nil ids and duplicates, keeping request order.
fn normalize_ids(ids: &[Uuid]) -> Result<Vec<Uuid>, MembershipError> {
    let mut seen = HashSet::new();
    let ids: Vec<Uuid> = ids
        .iter()
        .copied()
        .filter(|id| !id.is_nil() && seen.insert(*id))
        .collect();
    if ids.is_empty() {
        return Err(MembershipError::Validation(
            "at least one membership id is required".to_string(),
        ));
    }
    Ok(ids)
}

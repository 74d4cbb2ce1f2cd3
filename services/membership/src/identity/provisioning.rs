//! Identity provisioning saga.
//!
//! # Purpose
//! Creates a provider account and assigns its initial groups as one logical
//! unit of work. Nothing local is written here; callers record whatever they
//! need once the saga returns the new account id.
//!
//! # State flow
//! `Initiated -> AccountCreated -> GroupsAssigned` on success, or
//! `Initiated -> AccountCreated -> CompensationRequested -> Compensated | CompensationFailed`
//! when a step after creation fails.
//!
//! # Key invariants
//! - Input is validated before any remote call.
//! - Compensation only runs once creation is known to have succeeded. A create
//!   call that timed out has an unknown outcome and is reported without deleting
//!   anything.
//! - `CompensationFailed` is logged at error level with an `orphaned_account`
//!   alert, counted, and recorded in the orphan registry. Further provisioning
//!   for that username is refused until an operator clears the entry.
use crate::error::MembershipError;
use crate::identity::gateway::{IdentityGateway, NewAccount};
use crate::identity::sync::{GroupChange, GroupSynchronizer};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub initial_password: String,
    pub temporary_password: bool,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SagaState {
    Initiated,
    AccountCreated,
    GroupsAssigned,
    CompensationRequested,
    Compensated,
    CompensationFailed,
}

/// Provider account left behind by a failed compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedAccount {
    pub username: String,
    pub account_id: Option<String>,
    pub cause: String,
    pub detected_at: DateTime<Utc>,
}

/// Successful provisioning outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedAccount {
    pub account_id: String,
    pub groups: Vec<String>,
}

#[derive(Clone)]
pub struct ProvisioningSaga {
    gateway: Arc<dyn IdentityGateway>,
    synchronizer: GroupSynchronizer,
    orphans: Arc<DashMap<String, OrphanedAccount>>,
}

struct SagaRun<'a> {
    username: &'a str,
    state: SagaState,
}

impl SagaRun<'_> {
    fn advance(&mut self, next: SagaState) {
        tracing::debug!(username = self.username, from = ?self.state, to = ?next, "provisioning saga transition");
        self.state = next;
    }
}

impl ProvisioningSaga {
    pub fn new(gateway: Arc<dyn IdentityGateway>) -> Self {
        let synchronizer = GroupSynchronizer::new(gateway.clone());
        Self {
            gateway,
            synchronizer,
            orphans: Arc::new(DashMap::new()),
        }
    }

    pub fn orphaned_accounts(&self) -> Vec<OrphanedAccount> {
        let mut orphans: Vec<_> = self
            .orphans
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        orphans.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        orphans
    }

    /// Remove an orphan entry after an operator cleaned up the provider account.
    pub fn clear_orphan(&self, username: &str) -> Option<OrphanedAccount> {
        self.orphans
            .remove(&orphan_key(username))
            .map(|(_, orphan)| orphan)
    }

    pub async fn provision(
        &self,
        request: ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedAccount, MembershipError> {
        validate(&request)?;
        if let Some(orphan) = self.orphans.get(&orphan_key(&request.username)) {
            tracing::error!(
                alert = "orphaned_account",
                username = %request.username,
                account_id = ?orphan.account_id,
                "provisioning refused: an orphaned account for this username awaits cleanup"
            );
            return Err(MembershipError::Conflict(format!(
                "provisioning for '{}' is blocked until the orphaned account is cleaned up",
                request.username
            )));
        }
        if cancel.is_cancelled() {
            return Err(MembershipError::Cancelled);
        }

        let mut run = SagaRun {
            username: &request.username,
            state: SagaState::Initiated,
        };
        let new_account = NewAccount {
            username: request.username.clone(),
            email: request.email.clone(),
            first_name: request.first_name.clone(),
            last_name: request.last_name.clone(),
            initial_password: request.initial_password.clone(),
            temporary_password: request.temporary_password,
        };
        let hinted_id = match self.gateway.create_account(&new_account).await {
            Ok(hint) => hint,
            Err(err) if err.is_outcome_unknown() => {
                metrics::counter!("identity_provisioning_total", "outcome" => "unknown").increment(1);
                tracing::warn!(username = %request.username, error = %err, "account creation outcome unknown; not compensating");
                return Err(MembershipError::Infrastructure(format!(
                    "account creation outcome unknown: {err}"
                )));
            }
            Err(err) => {
                metrics::counter!("identity_provisioning_total", "outcome" => "rejected").increment(1);
                return Err(err.into());
            }
        };
        run.advance(SagaState::AccountCreated);

        let account_id = match self.gateway.find_account_by_username(&request.username).await {
            Ok(Some(account)) => account.id,
            Ok(None) => {
                let cause = MembershipError::Infrastructure(
                    "created account not found by username".to_string(),
                );
                return Err(self.compensate(&mut run, hinted_id, cause).await);
            }
            Err(err) => {
                let cause = MembershipError::Infrastructure(format!(
                    "failed to resolve created account: {err}"
                ));
                return Err(self.compensate(&mut run, hinted_id, cause).await);
            }
        };

        if !request.groups.is_empty() {
            let change = GroupChange {
                grant: request.groups.iter().cloned().collect(),
                revoke: Default::default(),
            };
            if let Err(err) = self.synchronizer.apply(&account_id, &change, cancel).await {
                tracing::warn!(username = %request.username, account_id = %account_id, error = %err, "initial group assignment failed");
                return Err(self.compensate(&mut run, Some(account_id), err.into()).await);
            }
        }
        run.advance(SagaState::GroupsAssigned);
        metrics::counter!("identity_provisioning_total", "outcome" => "ok").increment(1);
        tracing::info!(username = %request.username, account_id = %account_id, "account provisioned");
        Ok(ProvisionedAccount {
            account_id,
            groups: request.groups,
        })
    }

    async fn compensate(
        &self,
        run: &mut SagaRun<'_>,
        account_id: Option<String>,
        cause: MembershipError,
    ) -> MembershipError {
        run.advance(SagaState::CompensationRequested);
        let Some(account_id) = account_id else {
            return self.record_orphan(run, None, format!("{cause}; created account id unknown"));
        };
        match self.gateway.delete_account(&account_id).await {
            Ok(()) => {
                run.advance(SagaState::Compensated);
                metrics::counter!("identity_provisioning_total", "outcome" => "compensated").increment(1);
                tracing::warn!(username = run.username, account_id = %account_id, error = %cause, "provisioning rolled back");
                cause
            }
            Err(err) => self.record_orphan(
                run,
                Some(account_id),
                format!("{cause}; compensating delete failed: {err}"),
            ),
        }
    }

    fn record_orphan(
        &self,
        run: &mut SagaRun<'_>,
        account_id: Option<String>,
        cause: String,
    ) -> MembershipError {
        run.advance(SagaState::CompensationFailed);
        metrics::counter!("identity_provisioning_total", "outcome" => "compensation_failed").increment(1);
        tracing::error!(
            alert = "orphaned_account",
            username = run.username,
            account_id = ?account_id,
            cause = %cause,
            "provisioning compensation failed; orphaned account requires operator cleanup"
        );
        self.orphans.insert(
            orphan_key(run.username),
            OrphanedAccount {
                username: run.username.to_string(),
                account_id: account_id.clone(),
                cause: cause.clone(),
                detected_at: Utc::now(),
            },
        );
        MembershipError::CompensationFailed {
            username: run.username.to_string(),
            account_id,
            cause,
        }
    }
}

fn orphan_key(username: &str) -> String {
    username.to_lowercase()
}

fn validate(request: &ProvisioningRequest) -> Result<(), MembershipError> {
    let username_len = request.username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&username_len) {
        return Err(MembershipError::Validation(format!(
            "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )));
    }
    if !is_valid_email(&request.email) {
        return Err(MembershipError::Validation(
            "email address is not valid".to_string(),
        ));
    }
    if request.initial_password.chars().count() < PASSWORD_MIN {
        return Err(MembershipError::Validation(format!(
            "password must be at least {PASSWORD_MIN} characters"
        )));
    }
    Ok(())
}

/// `local@domain.tld`, no whitespace, exactly one `@`.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::identity::memory::InMemoryGateway;
    use crate::identity::test_support::FlakyGateway;

    fn request(username: &str, groups: &[&str]) -> ProvisioningRequest {
        ProvisioningRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            first_name: Some("Test".to_string()),
            last_name: None,
            initial_password: "correct-horse".to_string(),
            temporary_password: true,
            groups: groups.iter().map(|group| group.to_string()).collect(),
        }
    }

    async fn gateway_with_groups() -> InMemoryGateway {
        let gateway = InMemoryGateway::new();
        gateway.seed_group("project:member").await;
        gateway.seed_group("project:author").await;
        gateway
    }

    #[test]
    fn email_validation_rules() {
        assert!(is_valid_email("a@b.io"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.io"));
        assert!(!is_valid_email("a b@c.io"));
        assert!(!is_valid_email("a@b@c.io"));
        assert!(!is_valid_email("a@.io"));
    }

    #[tokio::test]
    async fn validation_fails_before_any_remote_call() {
        let gateway = InMemoryGateway::new();
        let saga = ProvisioningSaga::new(Arc::new(gateway.clone()));
        let cancel = CancellationToken::new();

        let mut short = request("ab", &[]);
        let err = saga.provision(short.clone(), &cancel).await.expect_err("short");
        assert_eq!(err.kind(), ErrorKind::Validation);

        short.username = "long-enough".into();
        short.initial_password = "short".into();
        let err = saga.provision(short, &cancel).await.expect_err("password");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut bad_email = request("frank", &[]);
        bad_email.email = "frank".into();
        let err = saga.provision(bad_email, &cancel).await.expect_err("email");
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn success_creates_account_and_assigns_groups() {
        let gateway = gateway_with_groups().await;
        let saga = ProvisioningSaga::new(Arc::new(gateway.clone()));

        let created = saga
            .provision(request("grace", &["project:member"]), &CancellationToken::new())
            .await
            .expect("provision");
        assert!(gateway.account_exists(&created.account_id).await);
        assert_eq!(
            gateway.group_names(&created.account_id).await,
            std::collections::BTreeSet::from(["project:member".to_string()])
        );
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict_without_compensation() {
        let gateway = gateway_with_groups().await;
        gateway.seed_account("heidi", "heidi@example.com").await;
        let saga = ProvisioningSaga::new(Arc::new(gateway.clone()));

        let err = saga
            .provision(request("heidi", &[]), &CancellationToken::new())
            .await
            .expect_err("conflict");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(
            !gateway
                .calls()
                .await
                .iter()
                .any(|call| call.operation == "delete_account")
        );
    }

    #[tokio::test]
    async fn failed_group_assignment_deletes_the_account() {
        let gateway = gateway_with_groups().await;
        let flaky = FlakyGateway::new(gateway.clone());
        flaky.fail_adds_to("project:author").await;
        let saga = ProvisioningSaga::new(Arc::new(flaky));

        let err = saga
            .provision(request("ivan", &["project:author"]), &CancellationToken::new())
            .await
            .expect_err("compensated");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        let lookup = gateway.find_account_by_username("ivan").await.expect("lookup");
        assert!(lookup.is_none());
        assert!(saga.orphaned_accounts().is_empty());
    }

    #[tokio::test]
    async fn unknown_group_is_not_found_after_rollback() {
        let gateway = gateway_with_groups().await;
        let saga = ProvisioningSaga::new(Arc::new(gateway.clone()));

        let err = saga
            .provision(request("judy", &["nope"]), &CancellationToken::new())
            .await
            .expect_err("missing group");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(gateway.find_account_by_username("judy").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn failed_compensation_is_reported_distinctly_and_blocks_retries() {
        let gateway = gateway_with_groups().await;
        let flaky = FlakyGateway::new(gateway.clone());
        flaky.fail_adds_to("project:author").await;
        flaky.fail_delete().await;
        let saga = ProvisioningSaga::new(Arc::new(flaky));
        let cancel = CancellationToken::new();

        let err = saga
            .provision(request("mallory", &["project:author"]), &cancel)
            .await
            .expect_err("orphaned");
        assert_eq!(err.kind(), ErrorKind::CompensationFailed);
        match &err {
            MembershipError::CompensationFailed { account_id, .. } => assert!(account_id.is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(saga.orphaned_accounts().len(), 1);

        let retry = saga
            .provision(request("MALLORY", &[]), &cancel)
            .await
            .expect_err("blocked");
        assert_eq!(retry.kind(), ErrorKind::Conflict);

        assert!(saga.clear_orphan("mallory").is_some());
        assert!(saga.orphaned_accounts().is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_compensates_with_hinted_id() {
        let gateway = gateway_with_groups().await;
        let flaky = FlakyGateway::new(gateway.clone());
        flaky.fail_lookup().await;
        let saga = ProvisioningSaga::new(Arc::new(flaky));

        let err = saga
            .provision(request("niaj", &[]), &CancellationToken::new())
            .await
            .expect_err("lookup failed");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(gateway.find_account_by_username("niaj").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn lookup_failure_without_id_hint_is_an_orphan() {
        let gateway = gateway_with_groups().await;
        let flaky = FlakyGateway::new(gateway.clone());
        flaky.fail_lookup().await;
        flaky.omit_created_id().await;
        let saga = ProvisioningSaga::new(Arc::new(flaky));

        let err = saga
            .provision(request("olivia", &[]), &CancellationToken::new())
            .await
            .expect_err("orphan");
        assert_eq!(err.kind(), ErrorKind::CompensationFailed);
    }

    #[tokio::test]
    async fn create_timeout_is_unknown_outcome_without_compensation() {
        let gateway = gateway_with_groups().await;
        let flaky = FlakyGateway::new(gateway.clone());
        flaky.time_out_create().await;
        let saga = ProvisioningSaga::new(Arc::new(flaky));

        let err = saga
            .provision(request("peggy", &[]), &CancellationToken::new())
            .await
            .expect_err("timeout");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(gateway.find_account_by_username("peggy").await.expect("lookup").is_some());
        assert!(
            !gateway
                .calls()
                .await
                .iter()
                .any(|call| call.operation == "delete_account")
        );
    }

    #[tokio::test]
    async fn cancelled_request_touches_nothing() {
        let gateway = gateway_with_groups().await;
        let saga = ProvisioningSaga::new(Arc::new(gateway.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = saga
            .provision(request("rupert", &[]), &cancel)
            .await
            .expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(gateway.calls().await.is_empty());
    }
}

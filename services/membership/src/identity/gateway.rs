//! Identity-provider gateway abstraction.
//!
//! # Purpose
//! Defines the capability the membership core needs from the external identity
//! provider: account lifecycle, group membership, and role-to-group bindings.
//! Implementations are fallible network boundaries; every call may time out,
//! fail to authenticate, or be rejected by the provider.
//!
//! # Key invariants
//! - Membership calls operate on provider group identifiers, never names.
//!   Callers resolve names through [`find_group`] over the flattened catalog.
//! - A timeout means the outcome is unknown. Callers must not treat it as a
//!   clean failure when deciding whether to compensate.
use crate::model::fold_name;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_timestamp: Option<i64>,
    /// Group names; only populated by directory lookups.
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_groups: Vec<Group>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub composite: bool,
    #[serde(default)]
    pub client_role: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub initial_password: String,
    pub temporary_password: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Paged account search. `page_number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountQuery {
    pub search: Option<String>,
    pub page_number: u32,
    pub page_size: u32,
}

impl AccountQuery {
    pub fn first_index(&self) -> u32 {
        self.page_number
            .max(1)
            .saturating_sub(1)
            .saturating_mul(self.page_size)
    }
}

impl Default for AccountQuery {
    fn default() -> Self {
        Self {
            search: None,
            page_number: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPage {
    pub items: Vec<Account>,
    pub total: u64,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("failed to get access token: {0}")]
    TokenUnavailable(String),
    #[error("identity provider timed out during {0}")]
    Timeout(String),
    #[error("identity provider returned {status} during {operation}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("invalid identity provider url: {0}")]
    InvalidUrl(String),
    #[error("invalid identity provider response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    /// The remote call may or may not have taken effect.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Create an account; returns the provider id when the response carries one.
    async fn create_account(&self, account: &NewAccount) -> GatewayResult<Option<String>>;
    async fn find_account_by_username(&self, username: &str) -> GatewayResult<Option<Account>>;
    async fn get_account(&self, account_id: &str) -> GatewayResult<Account>;
    async fn list_accounts(&self, query: &AccountQuery) -> GatewayResult<AccountPage>;
    async fn update_account(&self, account_id: &str, update: &AccountUpdate) -> GatewayResult<()>;
    async fn delete_account(&self, account_id: &str) -> GatewayResult<()>;

    async fn list_groups(&self, search: Option<&str>) -> GatewayResult<Vec<Group>>;
    async fn account_groups(&self, account_id: &str) -> GatewayResult<Vec<Group>>;
    async fn add_account_to_group(&self, account_id: &str, group_id: &str) -> GatewayResult<()>;
    async fn remove_account_from_group(&self, account_id: &str, group_id: &str)
    -> GatewayResult<()>;

    async fn list_realm_roles(&self) -> GatewayResult<Vec<Role>>;
    async fn group_roles(&self, group_id: &str) -> GatewayResult<Vec<Role>>;
    async fn add_roles_to_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()>;
    async fn remove_roles_from_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()>;

    /// Return the subset of `account_ids` the provider knows about.
    ///
    /// Unknown ids are skipped; any other failure aborts the whole lookup.
    async fn existing_account_ids(&self, account_ids: &[String]) -> GatewayResult<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        for account_id in account_ids {
            match self.get_account(account_id).await {
                Ok(account) => {
                    found.insert(account.id);
                }
                Err(GatewayError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(found)
    }
}

/// Flatten a nested group tree depth-first, parents before children.
pub fn flatten_groups(groups: &[Group]) -> Vec<&Group> {
    let mut out = Vec::new();
    let mut stack: Vec<&Group> = groups.iter().rev().collect();
    while let Some(group) = stack.pop() {
        out.push(group);
        stack.extend(group.sub_groups.iter().rev());
    }
    out
}

/// Find a group by name anywhere in the tree, case-insensitive.
pub fn find_group<'a>(groups: &'a [Group], name: &str) -> Option<&'a Group> {
    let wanted = fold_name(name);
    flatten_groups(groups)
        .into_iter()
        .find(|group| fold_name(&group.name) == wanted)
}

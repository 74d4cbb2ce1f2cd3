//! In-memory identity provider.
//!
//! # Purpose
//! Implements [`IdentityGateway`] over process-local maps so the service can run
//! without a Keycloak realm (local development, demos, tests).
//!
//! # Notes
//! - Not durable; state is lost on restart.
//! - Every gateway call is appended to a call journal, which tests use to
//!   assert exactly which remote operations a flow issued.
use crate::identity::gateway::{
    Account, AccountPage, AccountQuery, AccountUpdate, GatewayError, GatewayResult, Group,
    IdentityGateway, NewAccount, Role, find_group, flatten_groups,
};
use crate::model::fold_name;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One journaled gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub operation: &'static str,
    pub target: String,
}

#[derive(Default)]
struct GatewayState {
    accounts: BTreeMap<String, Account>,
    groups: Vec<Group>,
    /// Account id to group ids.
    memberships: HashMap<String, BTreeSet<String>>,
    roles: Vec<Role>,
    group_roles: HashMap<String, Vec<Role>>,
    calls: Vec<GatewayCall>,
}

impl GatewayState {
    fn record(&mut self, operation: &'static str, target: impl Into<String>) {
        self.calls.push(GatewayCall {
            operation,
            target: target.into(),
        });
    }

    fn group_exists(&self, group_id: &str) -> bool {
        flatten_groups(&self.groups)
            .iter()
            .any(|group| group.id == group_id)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<RwLock<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enabled account without journaling; returns its id.
    pub async fn seed_account(&self, username: &str, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.write().await;
        state.accounts.insert(
            id.clone(),
            Account {
                id: id.clone(),
                username: username.to_string(),
                email: Some(email.to_string()),
                first_name: None,
                last_name: None,
                enabled: true,
                email_verified: false,
                created_timestamp: Some(chrono::Utc::now().timestamp_millis()),
                groups: Vec::new(),
            },
        );
        id
    }

    /// Add a top-level group; returns its id.
    pub async fn seed_group(&self, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.state.write().await.groups.push(Group {
            id: id.clone(),
            name: name.to_string(),
            path: Some(format!("/{name}")),
            sub_groups: Vec::new(),
        });
        id
    }

    /// Add a realm role available for group bindings.
    pub async fn seed_role(&self, name: &str) -> Role {
        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: None,
            composite: false,
            client_role: false,
        };
        self.state.write().await.roles.push(role.clone());
        role
    }

    /// Put an account into a group by name without journaling.
    pub async fn seed_membership(&self, account_id: &str, group_name: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(group_id) = find_group(&state.groups, group_name).map(|group| group.id.clone())
        else {
            return false;
        };
        state
            .memberships
            .entry(account_id.to_string())
            .or_default()
            .insert(group_id);
        true
    }

    /// Resolve a group id by name without journaling.
    pub async fn group_id(&self, group_name: &str) -> Option<String> {
        let state = self.state.read().await;
        find_group(&state.groups, group_name).map(|group| group.id.clone())
    }

    /// Group names the account currently belongs to.
    pub async fn group_names(&self, account_id: &str) -> BTreeSet<String> {
        let state = self.state.read().await;
        let ids = state.memberships.get(account_id).cloned().unwrap_or_default();
        flatten_groups(&state.groups)
            .into_iter()
            .filter(|group| ids.contains(&group.id))
            .map(|group| group.name.clone())
            .collect()
    }

    pub async fn account_exists(&self, account_id: &str) -> bool {
        self.state.read().await.accounts.contains_key(account_id)
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }
}

#[async_trait]
impl IdentityGateway for InMemoryGateway {
    async fn create_account(&self, account: &NewAccount) -> GatewayResult<Option<String>> {
        let mut state = self.state.write().await;
        state.record("create_account", &account.username);
        if state
            .accounts
            .values()
            .any(|existing| existing.username.eq_ignore_ascii_case(&account.username))
        {
            return Err(GatewayError::Conflict(format!(
                "account {} already exists",
                account.username
            )));
        }
        let id = Uuid::new_v4().to_string();
        state.accounts.insert(
            id.clone(),
            Account {
                id: id.clone(),
                username: account.username.to_lowercase(),
                email: Some(account.email.clone()),
                first_name: account.first_name.clone(),
                last_name: account.last_name.clone(),
                enabled: true,
                email_verified: false,
                created_timestamp: Some(chrono::Utc::now().timestamp_millis()),
                groups: Vec::new(),
            },
        );
        Ok(Some(id))
    }

    async fn find_account_by_username(&self, username: &str) -> GatewayResult<Option<Account>> {
        let mut state = self.state.write().await;
        state.record("find_account_by_username", username);
        Ok(state
            .accounts
            .values()
            .find(|account| account.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn get_account(&self, account_id: &str) -> GatewayResult<Account> {
        let mut state = self.state.write().await;
        state.record("get_account", account_id);
        state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound("account".to_string()))
    }

    async fn list_accounts(&self, query: &AccountQuery) -> GatewayResult<AccountPage> {
        let mut state = self.state.write().await;
        state.record("list_accounts", query.search.clone().unwrap_or_default());
        let needle = query.search.as_deref().unwrap_or_default().to_lowercase();
        let matching: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| {
                needle.is_empty()
                    || account.username.to_lowercase().contains(&needle)
                    || account
                        .email
                        .as_deref()
                        .is_some_and(|email| email.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.first_index() as usize)
            .take(query.page_size as usize)
            .collect();
        Ok(AccountPage { items, total })
    }

    async fn update_account(&self, account_id: &str, update: &AccountUpdate) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.record("update_account", account_id);
        let account = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| GatewayError::NotFound("account".to_string()))?;
        if let Some(first_name) = &update.first_name {
            account.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            account.last_name = Some(last_name.clone());
        }
        if let Some(enabled) = update.enabled {
            account.enabled = enabled;
        }
        Ok(())
    }

    async fn delete_account(&self, account_id: &str) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.record("delete_account", account_id);
        if state.accounts.remove(account_id).is_none() {
            return Err(GatewayError::NotFound("account".to_string()));
        }
        state.memberships.remove(account_id);
        Ok(())
    }

    async fn list_groups(&self, search: Option<&str>) -> GatewayResult<Vec<Group>> {
        let mut state = self.state.write().await;
        state.record("list_groups", search.unwrap_or_default());
        let needle = fold_name(search.unwrap_or_default());
        Ok(state
            .groups
            .iter()
            .filter(|group| {
                needle.is_empty()
                    || flatten_groups(std::slice::from_ref(*group))
                        .iter()
                        .any(|nested| fold_name(&nested.name).contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn account_groups(&self, account_id: &str) -> GatewayResult<Vec<Group>> {
        let mut state = self.state.write().await;
        state.record("account_groups", account_id);
        if !state.accounts.contains_key(account_id) {
            return Err(GatewayError::NotFound("account".to_string()));
        }
        let ids = state.memberships.get(account_id).cloned().unwrap_or_default();
        Ok(flatten_groups(&state.groups)
            .into_iter()
            .filter(|group| ids.contains(&group.id))
            .map(|group| Group {
                sub_groups: Vec::new(),
                ..group.clone()
            })
            .collect())
    }

    async fn add_account_to_group(&self, account_id: &str, group_id: &str) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.record("add_account_to_group", format!("{account_id}:{group_id}"));
        if !state.accounts.contains_key(account_id) {
            return Err(GatewayError::NotFound("account".to_string()));
        }
        if !state.group_exists(group_id) {
            return Err(GatewayError::NotFound("group".to_string()));
        }
        state
            .memberships
            .entry(account_id.to_string())
            .or_default()
            .insert(group_id.to_string());
        Ok(())
    }

    async fn remove_account_from_group(
        &self,
        account_id: &str,
        group_id: &str,
    ) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.record(
            "remove_account_from_group",
            format!("{account_id}:{group_id}"),
        );
        if !state.accounts.contains_key(account_id) {
            return Err(GatewayError::NotFound("account".to_string()));
        }
        if let Some(groups) = state.memberships.get_mut(account_id) {
            groups.remove(group_id);
        }
        Ok(())
    }

    async fn list_realm_roles(&self) -> GatewayResult<Vec<Role>> {
        let mut state = self.state.write().await;
        state.record("list_realm_roles", "");
        Ok(state.roles.clone())
    }

    async fn group_roles(&self, group_id: &str) -> GatewayResult<Vec<Role>> {
        let mut state = self.state.write().await;
        state.record("group_roles", group_id);
        if !state.group_exists(group_id) {
            return Err(GatewayError::NotFound("group".to_string()));
        }
        Ok(state.group_roles.get(group_id).cloned().unwrap_or_default())
    }

    async fn add_roles_to_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.record("add_roles_to_group", group_id);
        if !state.group_exists(group_id) {
            return Err(GatewayError::NotFound("group".to_string()));
        }
        let bound = state.group_roles.entry(group_id.to_string()).or_default();
        for role in roles {
            if !bound.iter().any(|existing| existing.id == role.id) {
                bound.push(role.clone());
            }
        }
        Ok(())
    }

    async fn remove_roles_from_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state.record("remove_roles_from_group", group_id);
        if !state.group_exists(group_id) {
            return Err(GatewayError::NotFound("group".to_string()));
        }
        if let Some(bound) = state.group_roles.get_mut(group_id) {
            bound.retain(|existing| !roles.iter().any(|role| role.id == existing.id));
        }
        Ok(())
    }
}

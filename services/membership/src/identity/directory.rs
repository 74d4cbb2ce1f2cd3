//! Account directory operations.
//!
//! # Purpose
//! Read and administer provider accounts, groups, and role-to-group bindings on
//! behalf of the user-management endpoints. Group changes for an account go
//! through the synchronizer so they follow the same ordering and reporting
//! rules as membership-driven changes.
use crate::error::MembershipError;
use crate::identity::gateway::{
    Account, AccountPage, AccountQuery, AccountUpdate, Group, IdentityGateway, Role,
};
use crate::identity::sync::{GroupSynchronizer, SyncReport};
use crate::model::{fold_name, same_name};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Search parameters for [`AccountDirectory::list_accounts`].
#[derive(Debug, Clone, Default)]
pub struct DirectoryQuery {
    pub search: Option<String>,
    /// Case-insensitive substring matched against each account's group names.
    pub group: Option<String>,
    pub page_number: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AccountChanges {
    pub update: AccountUpdate,
    /// When present, the account's groups converge to exactly this set.
    pub groups: Option<BTreeSet<String>>,
}

#[derive(Clone)]
pub struct AccountDirectory {
    gateway: Arc<dyn IdentityGateway>,
    synchronizer: GroupSynchronizer,
}

impl AccountDirectory {
    pub fn new(gateway: Arc<dyn IdentityGateway>) -> Self {
        let synchronizer = GroupSynchronizer::new(gateway.clone());
        Self {
            gateway,
            synchronizer,
        }
    }

    pub async fn list_accounts(&self, query: &DirectoryQuery) -> Result<AccountPage, MembershipError> {
        let page = self
            .gateway
            .list_accounts(&AccountQuery {
                search: query.search.clone().filter(|term| !term.trim().is_empty()),
                page_number: query.page_number.max(1),
                page_size: query.page_size.clamp(1, 200),
            })
            .await?;

        let mut items = Vec::with_capacity(page.items.len());
        for account in page.items {
            items.push(self.with_groups(account).await?);
        }

        // The provider cannot filter by group, so the filter applies to this page
        // and the total reflects the filtered page.
        match query.group.as_deref().map(str::trim).filter(|group| !group.is_empty()) {
            Some(filter) => {
                let needle = fold_name(filter);
                let items: Vec<Account> = items
                    .into_iter()
                    .filter(|account| {
                        account
                            .groups
                            .iter()
                            .any(|group| fold_name(group).contains(&needle))
                    })
                    .collect();
                Ok(AccountPage {
                    total: items.len() as u64,
                    items,
                })
            }
            None => Ok(AccountPage {
                items,
                total: page.total,
            }),
        }
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Account, MembershipError> {
        let account = self.gateway.get_account(account_id).await?;
        self.with_groups(account).await
    }

    pub async fn update_account(
        &self,
        account_id: &str,
        changes: &AccountChanges,
        cancel: &CancellationToken,
    ) -> Result<Option<SyncReport>, MembershipError> {
        self.gateway
            .update_account(account_id, &changes.update)
            .await?;
        match &changes.groups {
            Some(groups) => Ok(Some(
                self.synchronizer.sync(account_id, groups, cancel).await?,
            )),
            None => Ok(None),
        }
    }

    pub async fn deactivate_account(&self, account_id: &str) -> Result<(), MembershipError> {
        let update = AccountUpdate {
            enabled: Some(false),
            ..AccountUpdate::default()
        };
        self.gateway.update_account(account_id, &update).await?;
        tracing::info!(account_id, "account deactivated");
        Ok(())
    }

    pub async fn list_groups(&self, search: Option<&str>) -> Result<Vec<Group>, MembershipError> {
        let search = search.map(str::trim).filter(|term| !term.is_empty());
        Ok(self.gateway.list_groups(search).await?)
    }

    pub async fn realm_roles(&self) -> Result<Vec<Role>, MembershipError> {
        Ok(self.gateway.list_realm_roles().await?)
    }

    pub async fn group_roles(&self, group_id: &str) -> Result<Vec<Role>, MembershipError> {
        Ok(self.gateway.group_roles(group_id).await?)
    }

    pub async fn add_roles_to_group(
        &self,
        group_id: &str,
        role_names: &[String],
    ) -> Result<Vec<Role>, MembershipError> {
        let roles = self.resolve_roles(role_names).await?;
        self.gateway.add_roles_to_group(group_id, &roles).await?;
        tracing::info!(group_id, roles = roles.len(), "roles bound to group");
        Ok(roles)
    }

    pub async fn remove_roles_from_group(
        &self,
        group_id: &str,
        role_names: &[String],
    ) -> Result<Vec<Role>, MembershipError> {
        let roles = self.resolve_roles(role_names).await?;
        self.gateway.remove_roles_from_group(group_id, &roles).await?;
        tracing::info!(group_id, roles = roles.len(), "roles unbound from group");
        Ok(roles)
    }

    async fn resolve_roles(&self, role_names: &[String]) -> Result<Vec<Role>, MembershipError> {
        if role_names.is_empty() {
            return Err(MembershipError::Validation(
                "at least one role name is required".to_string(),
            ));
        }
        let catalog = self.gateway.list_realm_roles().await?;
        let mut resolved: Vec<Role> = Vec::with_capacity(role_names.len());
        for name in role_names {
            let role = catalog
                .iter()
                .find(|role| same_name(&role.name, name.trim()))
                .ok_or_else(|| MembershipError::NotFound(format!("role {name}")))?;
            if !resolved.iter().any(|existing| existing.id == role.id) {
                resolved.push(role.clone());
            }
        }
        Ok(resolved)
    }

    async fn with_groups(&self, mut account: Account) -> Result<Account, MembershipError> {
        account.groups = self
            .gateway
            .account_groups(&account.id)
            .await?
            .into_iter()
            .map(|group| group.name)
            .collect();
        Ok(account)
    }
}

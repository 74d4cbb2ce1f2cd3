//! Failure-injecting gateway wrapper for unit tests.
use crate::identity::gateway::{
    Account, AccountPage, AccountQuery, AccountUpdate, GatewayError, GatewayResult, Group,
    IdentityGateway, NewAccount, Role,
};
use crate::identity::memory::InMemoryGateway;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Faults {
    add_group_ids: BTreeSet<String>,
    create_times_out: bool,
    omit_created_id: bool,
    lookup_fails: bool,
    delete_fails: bool,
    account_groups_fail: bool,
}

#[derive(Clone)]
pub(crate) struct FlakyGateway {
    inner: InMemoryGateway,
    faults: Arc<RwLock<Faults>>,
}

fn unavailable(operation: &str) -> GatewayError {
    GatewayError::Status {
        operation: operation.to_string(),
        status: 503,
        body: "unavailable".to_string(),
    }
}

impl FlakyGateway {
    pub(crate) fn new(inner: InMemoryGateway) -> Self {
        Self {
            inner,
            faults: Arc::new(RwLock::new(Faults::default())),
        }
    }

    pub(crate) async fn fail_adds_to(&self, group_name: &str) {
        if let Some(id) = self.inner.group_id(group_name).await {
            self.faults.write().await.add_group_ids.insert(id);
        }
    }

    pub(crate) async fn time_out_create(&self) {
        self.faults.write().await.create_times_out = true;
    }

    pub(crate) async fn omit_created_id(&self) {
        self.faults.write().await.omit_created_id = true;
    }

    pub(crate) async fn fail_lookup(&self) {
        self.faults.write().await.lookup_fails = true;
    }

    pub(crate) async fn fail_delete(&self) {
        self.faults.write().await.delete_fails = true;
    }

    pub(crate) async fn fail_account_groups(&self) {
        self.faults.write().await.account_groups_fail = true;
    }
}

#[async_trait]
impl IdentityGateway for FlakyGateway {
    async fn create_account(&self, account: &NewAccount) -> GatewayResult<Option<String>> {
        let (times_out, omit_id) = {
            let faults = self.faults.read().await;
            (faults.create_times_out, faults.omit_created_id)
        };
        let created = self.inner.create_account(account).await?;
        if times_out {
            return Err(GatewayError::Timeout("create account".to_string()));
        }
        Ok(if omit_id { None } else { created })
    }

    async fn find_account_by_username(&self, username: &str) -> GatewayResult<Option<Account>> {
        if self.faults.read().await.lookup_fails {
            return Err(unavailable("find account"));
        }
        self.inner.find_account_by_username(username).await
    }

    async fn get_account(&self, account_id: &str) -> GatewayResult<Account> {
        self.inner.get_account(account_id).await
    }

    async fn list_accounts(&self, query: &AccountQuery) -> GatewayResult<AccountPage> {
        self.inner.list_accounts(query).await
    }

    async fn update_account(&self, account_id: &str, update: &AccountUpdate) -> GatewayResult<()> {
        self.inner.update_account(account_id, update).await
    }

    async fn delete_account(&self, account_id: &str) -> GatewayResult<()> {
        if self.faults.read().await.delete_fails {
            return Err(unavailable("delete account"));
        }
        self.inner.delete_account(account_id).await
    }

    async fn list_groups(&self, search: Option<&str>) -> GatewayResult<Vec<Group>> {
        self.inner.list_groups(search).await
    }

    async fn account_groups(&self, account_id: &str) -> GatewayResult<Vec<Group>> {
        if self.faults.read().await.account_groups_fail {
            return Err(unavailable("get account groups"));
        }
        self.inner.account_groups(account_id).await
    }

    async fn add_account_to_group(&self, account_id: &str, group_id: &str) -> GatewayResult<()> {
        if self.faults.read().await.add_group_ids.contains(group_id) {
            return Err(unavailable("add account to group"));
        }
        self.inner.add_account_to_group(account_id, group_id).await
    }

    async fn remove_account_from_group(
        &self,
        account_id: &str,
        group_id: &str,
    ) -> GatewayResult<()> {
        self.inner
            .remove_account_from_group(account_id, group_id)
            .await
    }

    async fn list_realm_roles(&self) -> GatewayResult<Vec<Role>> {
        self.inner.list_realm_roles().await
    }

    async fn group_roles(&self, group_id: &str) -> GatewayResult<Vec<Role>> {
        self.inner.group_roles(group_id).await
    }

    async fn add_roles_to_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()> {
        self.inner.add_roles_to_group(group_id, roles).await
    }

    async fn remove_roles_from_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()> {
        self.inner.remove_roles_from_group(group_id, roles).await
    }
}

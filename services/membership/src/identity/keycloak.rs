//! Keycloak admin REST binding of [`IdentityGateway`].
//!
//! # Purpose
//! Translates gateway calls into realm-scoped Keycloak admin API requests and
//! maps HTTP outcomes back onto [`GatewayError`].
//!
//! # Key invariants
//! - Every request carries a bearer token from [`AccessTokenCache`]. A 401 drops
//!   the cached token and retries the request once with a fresh one.
//! - Requests are bounded by the client timeout; a timed-out request surfaces
//!   as [`GatewayError::Timeout`] so callers can treat it as an unknown outcome.
//! - Account and group ids travel as single percent-encoded path segments, so
//!   no id can address a different admin resource.
//! - Keycloak wire shapes stay private to this module.
use crate::config::KeycloakConfig;
use crate::identity::gateway::{
    Account, AccountPage, AccountQuery, AccountUpdate, GatewayError, GatewayResult, Group,
    IdentityGateway, NewAccount, Role,
};
use crate::identity::token::{AccessTokenCache, ClientCredentials, TokenPolicy};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KcUser {
    id: String,
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    created_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KcGroup {
    id: String,
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    sub_groups: Vec<KcGroup>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KcRole {
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    composite: bool,
    #[serde(default)]
    client_role: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KcCreateUser<'a> {
    username: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    enabled: bool,
    email_verified: bool,
    credentials: Vec<KcCredential<'a>>,
}

#[derive(Debug, Serialize)]
struct KcCredential<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
    temporary: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KcUpdateUser<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

impl From<KcUser> for Account {
    fn from(user: KcUser) -> Self {
        Account {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            enabled: user.enabled,
            email_verified: user.email_verified,
            created_timestamp: user.created_timestamp,
            groups: Vec::new(),
        }
    }
}

impl From<KcGroup> for Group {
    fn from(group: KcGroup) -> Self {
        Group {
            id: group.id,
            name: group.name,
            path: group.path,
            sub_groups: group.sub_groups.into_iter().map(Group::from).collect(),
        }
    }
}

impl From<KcRole> for Role {
    fn from(role: KcRole) -> Self {
        Role {
            id: role.id,
            name: role.name,
            description: role.description,
            composite: role.composite,
            client_role: role.client_role,
        }
    }
}

impl From<&Role> for KcRole {
    fn from(role: &Role) -> Self {
        KcRole {
            id: role.id.clone(),
            name: role.name.clone(),
            description: role.description.clone(),
            composite: role.composite,
            client_role: role.client_role,
        }
    }
}

#[derive(Clone)]
pub struct KeycloakGateway {
    client: reqwest::Client,
    admin_url: reqwest::Url,
    tokens: AccessTokenCache,
}

impl KeycloakGateway {
    pub fn new(config: &KeycloakConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let tokens = AccessTokenCache::new(
            client.clone(),
            ClientCredentials {
                token_url: realm_url(
                    &config.base_url,
                    &["realms", config.realm.as_str(), "protocol", "openid-connect", "token"],
                )?
                .to_string(),
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                grant_type: config.grant_type.clone(),
                scopes: config.scopes.clone(),
            },
            TokenPolicy {
                max_attempts: config.token_max_attempts,
                ..TokenPolicy::default()
            },
        );
        Ok(Self {
            client,
            admin_url: realm_url(&config.base_url, &["admin", "realms", config.realm.as_str()])?,
            tokens,
        })
    }

    /// Admin API URL with each of `segments` percent-encoded as one path
    /// segment. Empty and dot segments cannot name a `resource`.
    fn url(&self, resource: &'static str, segments: &[&str]) -> GatewayResult<reqwest::Url> {
        let mut url = self.admin_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| GatewayError::InvalidUrl(self.admin_url.to_string()))?;
            for segment in segments {
                if matches!(*segment, "" | "." | "..") {
                    return Err(GatewayError::NotFound(resource.to_string()));
                }
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn send<F>(
        &self,
        operation: &'static str,
        resource: &'static str,
        build: F,
    ) -> GatewayResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut response = self.send_once(operation, &build).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(operation, "identity provider rejected token; refreshing");
            self.tokens.invalidate().await;
            response = self.send_once(operation, &build).await?;
        }
        check_status(operation, resource, response).await
    }

    async fn send_once<F>(
        &self,
        operation: &'static str,
        build: &F,
    ) -> GatewayResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let token = self.tokens.bearer().await?;
        build(&self.client)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| transport_error(operation, err))
    }

    async fn json<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> GatewayResult<T> {
        response
            .json()
            .await
            .map_err(|err| GatewayError::InvalidResponse(format!("{operation}: {err}")))
    }
}

async fn check_status(
    operation: &'static str,
    resource: &'static str,
    response: reqwest::Response,
) -> GatewayResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(GatewayError::NotFound(resource.to_string())),
        StatusCode::CONFLICT => Err(GatewayError::Conflict(if body.is_empty() {
            format!("{resource} already exists")
        } else {
            body
        })),
        _ => Err(GatewayError::Status {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        }),
    }
}

fn realm_url(base_url: &str, segments: &[&str]) -> GatewayResult<reqwest::Url> {
    let invalid = || GatewayError::InvalidUrl(base_url.to_string());
    let mut url = reqwest::Url::parse(base_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn transport_error(operation: &'static str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(operation.to_string())
    } else {
        GatewayError::Http(err)
    }
}

/// Keycloak returns the new user's URL in `Location`; the id is its last segment.
fn id_from_location(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl IdentityGateway for KeycloakGateway {
    async fn create_account(&self, account: &NewAccount) -> GatewayResult<Option<String>> {
        let body = KcCreateUser {
            username: &account.username,
            email: &account.email,
            first_name: account.first_name.as_deref(),
            last_name: account.last_name.as_deref(),
            enabled: true,
            email_verified: false,
            credentials: vec![KcCredential {
                kind: "password",
                value: &account.initial_password,
                temporary: account.temporary_password,
            }],
        };
        let url = self.url("account", &["users"])?;
        let response = self
            .send("create account", "account", |client| {
                client.post(url.clone()).json(&body)
            })
            .await?;
        Ok(id_from_location(&response))
    }

    async fn find_account_by_username(&self, username: &str) -> GatewayResult<Option<Account>> {
        let url = self.url("account", &["users"])?;
        let response = self
            .send("find account", "account", |client| {
                client
                    .get(url.clone())
                    .query(&[("username", username), ("exact", "true")])
            })
            .await?;
        let users: Vec<KcUser> = Self::json("find account", response).await?;
        Ok(users
            .into_iter()
            .find(|user| user.username.eq_ignore_ascii_case(username))
            .map(Account::from))
    }

    async fn get_account(&self, account_id: &str) -> GatewayResult<Account> {
        let url = self.url("account", &["users", account_id])?;
        let response = self
            .send("get account", "account", |client| client.get(url.clone()))
            .await?;
        let user: KcUser = Self::json("get account", response).await?;
        Ok(user.into())
    }

    async fn list_accounts(&self, query: &AccountQuery) -> GatewayResult<AccountPage> {
        let search = query.search.clone().unwrap_or_default();
        let count_url = self.url("account", &["users", "count"])?;
        let response = self
            .send("count accounts", "account", |client| {
                client.get(count_url.clone()).query(&[("search", search.as_str())])
            })
            .await?;
        let total: u64 = Self::json("count accounts", response).await?;

        let url = self.url("account", &["users"])?;
        let first = query.first_index().to_string();
        let max = query.page_size.to_string();
        let response = self
            .send("list accounts", "account", |client| {
                client.get(url.clone()).query(&[
                    ("search", search.as_str()),
                    ("first", first.as_str()),
                    ("max", max.as_str()),
                ])
            })
            .await?;
        let users: Vec<KcUser> = Self::json("list accounts", response).await?;
        Ok(AccountPage {
            items: users.into_iter().map(Account::from).collect(),
            total,
        })
    }

    async fn update_account(&self, account_id: &str, update: &AccountUpdate) -> GatewayResult<()> {
        let body = KcUpdateUser {
            first_name: update.first_name.as_deref(),
            last_name: update.last_name.as_deref(),
            enabled: update.enabled,
        };
        let url = self.url("account", &["users", account_id])?;
        self.send("update account", "account", |client| {
            client.put(url.clone()).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn delete_account(&self, account_id: &str) -> GatewayResult<()> {
        let url = self.url("account", &["users", account_id])?;
        self.send("delete account", "account", |client| client.delete(url.clone()))
            .await?;
        Ok(())
    }

    async fn list_groups(&self, search: Option<&str>) -> GatewayResult<Vec<Group>> {
        let url = self.url("group", &["groups"])?;
        let response = self
            .send("list groups", "group", |client| {
                let request = client.get(url.clone());
                match search {
                    Some(term) => request.query(&[("search", term)]),
                    None => request,
                }
            })
            .await?;
        let groups: Vec<KcGroup> = Self::json("list groups", response).await?;
        Ok(groups.into_iter().map(Group::from).collect())
    }

    async fn account_groups(&self, account_id: &str) -> GatewayResult<Vec<Group>> {
        let url = self.url("account", &["users", account_id, "groups"])?;
        let response = self
            .send("get account groups", "account", |client| client.get(url.clone()))
            .await?;
        let groups: Vec<KcGroup> = Self::json("get account groups", response).await?;
        Ok(groups.into_iter().map(Group::from).collect())
    }

    async fn add_account_to_group(&self, account_id: &str, group_id: &str) -> GatewayResult<()> {
        let url = self.url("account or group", &["users", account_id, "groups", group_id])?;
        self.send("add account to group", "account or group", |client| {
            client.put(url.clone())
        })
        .await?;
        Ok(())
    }

    async fn remove_account_from_group(
        &self,
        account_id: &str,
        group_id: &str,
    ) -> GatewayResult<()> {
        let url = self.url("account or group", &["users", account_id, "groups", group_id])?;
        self.send("remove account from group", "account or group", |client| {
            client.delete(url.clone())
        })
        .await?;
        Ok(())
    }

    async fn list_realm_roles(&self) -> GatewayResult<Vec<Role>> {
        let url = self.url("role", &["roles"])?;
        let response = self
            .send("list realm roles", "role", |client| client.get(url.clone()))
            .await?;
        let roles: Vec<KcRole> = Self::json("list realm roles", response).await?;
        Ok(roles.into_iter().map(Role::from).collect())
    }

    async fn group_roles(&self, group_id: &str) -> GatewayResult<Vec<Role>> {
        let url = self.url("group", &["groups", group_id, "role-mappings", "realm"])?;
        let response = self
            .send("get group roles", "group", |client| client.get(url.clone()))
            .await?;
        let roles: Vec<KcRole> = Self::json("get group roles", response).await?;
        Ok(roles.into_iter().map(Role::from).collect())
    }

    async fn add_roles_to_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()> {
        let body: Vec<KcRole> = roles.iter().map(KcRole::from).collect();
        let url = self.url("group", &["groups", group_id, "role-mappings", "realm"])?;
        self.send("add roles to group", "group", |client| {
            client.post(url.clone()).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn remove_roles_from_group(&self, group_id: &str, roles: &[Role]) -> GatewayResult<()> {
        let body: Vec<KcRole> = roles.iter().map(KcRole::from).collect();
        let url = self.url("group", &["groups", group_id, "role-mappings", "realm"])?;
        self.send("remove roles from group", "group", |client| {
            client.delete(url.clone()).json(&body)
        })
        .await?;
        Ok(())
    }
}

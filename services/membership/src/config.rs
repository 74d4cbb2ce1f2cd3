use crate::membership::MembershipPolicy;
use crate::model::RoleGroups;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

// Membership service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    // HTTP API listener bind address.
    pub bind_addr: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    // Required when `storage` is postgres.
    pub postgres: Option<PostgresConfig>,
    pub identity_backend: IdentityBackend,
    pub keycloak: KeycloakConfig,
    // Provider group names backing each project role.
    pub role_groups: RoleGroups,
    pub policy: MembershipPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityBackend {
    // Process-local provider for development and tests.
    Memory,
    Keycloak,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pg_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_pg_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycloakConfig {
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    // Never logged.
    pub client_secret: String,
    pub grant_type: String,
    pub scopes: Vec<String>,
    // Per admin-API call timeout.
    pub request_timeout_ms: u64,
    // Bounded attempts for the token exchange.
    pub token_max_attempts: u32,
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            realm: "master".to_string(),
            client_id: "membership-service".to_string(),
            client_secret: String::new(),
            grant_type: "client_credentials".to_string(),
            scopes: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            token_max_attempts: DEFAULT_TOKEN_MAX_ATTEMPTS,
        }
    }
}

const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_PG_TIMEOUT_MS: u64 = 5000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TOKEN_MAX_ATTEMPTS: u32 = 3;

fn default_pg_max_connections() -> u32 {
    DEFAULT_PG_MAX_CONNECTIONS
}

fn default_pg_timeout_ms() -> u64 {
    DEFAULT_PG_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
struct MembershipConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    identity_backend: Option<IdentityBackend>,
    keycloak: Option<KeycloakOverride>,
    role_groups: Option<RoleGroups>,
    policy: Option<MembershipPolicy>,
}

#[derive(Debug, Deserialize)]
struct KeycloakOverride {
    base_url: Option<String>,
    realm: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    scopes: Option<Vec<String>>,
    request_timeout_ms: Option<u64>,
    token_max_attempts: Option<u32>,
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_storage(value: &str) -> Result<StorageBackend> {
    match value.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(StorageBackend::Memory),
        "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
        other => bail!("unknown storage backend '{other}'"),
    }
}

fn parse_identity_backend(value: &str) -> Result<IdentityBackend> {
    match value.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(IdentityBackend::Memory),
        "keycloak" => Ok(IdentityBackend::Keycloak),
        other => bail!("unknown identity backend '{other}'"),
    }
}

fn split_scopes(value: &str) -> Vec<String> {
    value
        .split([',', ' '])
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

impl MembershipConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("MEMBERSHIP_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse MEMBERSHIP_BIND")?;
        let metrics_bind = std::env::var("MEMBERSHIP_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse MEMBERSHIP_METRICS_BIND")?;
        let storage = match std::env::var("MEMBERSHIP_STORAGE") {
            Ok(value) => parse_storage(&value).with_context(|| "parse MEMBERSHIP_STORAGE")?,
            Err(_) => StorageBackend::Memory,
        };
        let postgres = std::env::var("MEMBERSHIP_PG_URL")
            .ok()
            .map(|url| PostgresConfig {
                url,
                max_connections: env_u64(
                    "MEMBERSHIP_PG_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS as u64,
                ) as u32,
                connect_timeout_ms: env_u64("MEMBERSHIP_PG_CONNECT_TIMEOUT_MS", DEFAULT_PG_TIMEOUT_MS),
                acquire_timeout_ms: env_u64("MEMBERSHIP_PG_ACQUIRE_TIMEOUT_MS", DEFAULT_PG_TIMEOUT_MS),
            });
        let identity_backend = match std::env::var("MEMBERSHIP_IDENTITY_BACKEND") {
            Ok(value) => parse_identity_backend(&value)
                .with_context(|| "parse MEMBERSHIP_IDENTITY_BACKEND")?,
            Err(_) => IdentityBackend::Memory,
        };

        let defaults = KeycloakConfig::default();
        let keycloak = KeycloakConfig {
            base_url: std::env::var("KEYCLOAK_BASE_URL").unwrap_or(defaults.base_url),
            realm: std::env::var("KEYCLOAK_REALM").unwrap_or(defaults.realm),
            client_id: std::env::var("KEYCLOAK_CLIENT_ID").unwrap_or(defaults.client_id),
            client_secret: std::env::var("KEYCLOAK_CLIENT_SECRET").unwrap_or_default(),
            grant_type: defaults.grant_type,
            scopes: std::env::var("KEYCLOAK_SCOPES")
                .map(|value| split_scopes(&value))
                .unwrap_or_default(),
            request_timeout_ms: env_u64("KEYCLOAK_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            token_max_attempts: env_u64(
                "KEYCLOAK_TOKEN_MAX_ATTEMPTS",
                DEFAULT_TOKEN_MAX_ATTEMPTS as u64,
            ) as u32,
        };

        let default_groups = RoleGroups::default();
        let role_groups = RoleGroups {
            manager: std::env::var("MEMBERSHIP_MANAGER_GROUP").unwrap_or(default_groups.manager),
            author: std::env::var("MEMBERSHIP_AUTHOR_GROUP").unwrap_or(default_groups.author),
            member: std::env::var("MEMBERSHIP_MEMBER_GROUP").unwrap_or(default_groups.member),
            system_admin: std::env::var("MEMBERSHIP_SYSTEM_ADMIN_GROUP")
                .unwrap_or(default_groups.system_admin),
        };
        let default_policy = MembershipPolicy::default();
        let policy = MembershipPolicy {
            resync_on_role_change: env_flag(
                "MEMBERSHIP_RESYNC_ON_ROLE_CHANGE",
                default_policy.resync_on_role_change,
            ),
            revoke_on_remove: env_flag(
                "MEMBERSHIP_REVOKE_ON_REMOVE",
                default_policy.revoke_on_remove,
            ),
        };

        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            identity_backend,
            keycloak,
            role_groups,
            policy,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("MEMBERSHIP_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read MEMBERSHIP_CONFIG: {path}"))?;
            let override_cfg: MembershipConfigOverride = serde_yaml::from_str(&contents)
                .with_context(|| "parse membership config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: MembershipConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.identity_backend {
            self.identity_backend = value;
        }
        if let Some(keycloak) = override_cfg.keycloak {
            if let Some(value) = keycloak.base_url {
                self.keycloak.base_url = value;
            }
            if let Some(value) = keycloak.realm {
                self.keycloak.realm = value;
            }
            if let Some(value) = keycloak.client_id {
                self.keycloak.client_id = value;
            }
            if let Some(value) = keycloak.client_secret {
                self.keycloak.client_secret = value;
            }
            if let Some(value) = keycloak.scopes {
                self.keycloak.scopes = value;
            }
            if let Some(value) = keycloak.request_timeout_ms
                && value > 0
            {
                self.keycloak.request_timeout_ms = value;
            }
            if let Some(value) = keycloak.token_max_attempts
                && value > 0
            {
                self.keycloak.token_max_attempts = value;
            }
        }
        if let Some(value) = override_cfg.role_groups {
            self.role_groups = value;
        }
        if let Some(value) = override_cfg.policy {
            self.policy = value;
        }
        Ok(())
    }
}

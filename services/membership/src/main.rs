//! Membership HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, storage, the identity-provider gateway, and the HTTP
//! router, then starts the API server and the metrics listener.
//!
//! # Notes
//! The `build_state` helper keeps wiring testable and minimizes main setup logic.
use anyhow::Context;
use membership::app::{AppState, build_router};
use membership::config::{self, IdentityBackend, MembershipConfig, StorageBackend};
use membership::identity::directory::AccountDirectory;
use membership::identity::gateway::IdentityGateway;
use membership::identity::keycloak::KeycloakGateway;
use membership::identity::memory::InMemoryGateway;
use membership::identity::provisioning::ProvisioningSaga;
use membership::membership::MembershipAuthority;
use membership::observability;
use membership::store::{MembershipStore, memory::InMemoryStore, postgres::PostgresStore};
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MembershipConfig::from_env_or_yaml().context("membership config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: MembershipConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("membership");
    let state = build_state(config.clone()).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state.clone());

    let addr = config.bind_addr;
    tracing::info!(
        %addr,
        storage = state.store.backend_name(),
        identity = ?config.identity_backend,
        "membership service listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

async fn build_state(config: MembershipConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn MembershipStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(PostgresStore::connect(pg).await?)
        }
    };

    let gateway: Arc<dyn IdentityGateway> = match config.identity_backend {
        IdentityBackend::Memory => {
            tracing::warn!("using in-memory identity backend; accounts are not persisted");
            Arc::new(seeded_memory_gateway(&config).await)
        }
        IdentityBackend::Keycloak => Arc::new(
            KeycloakGateway::new(&config.keycloak).context("keycloak gateway configuration")?,
        ),
    };

    Ok(AppState {
        authority: MembershipAuthority::new(
            store.clone(),
            gateway.clone(),
            config.role_groups.clone(),
            config.policy,
        ),
        saga: ProvisioningSaga::new(gateway.clone()),
        directory: AccountDirectory::new(gateway),
        store,
    })
}

/// Local-development gateway with the role groups already present.
async fn seeded_memory_gateway(config: &config::MembershipConfig) -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    let groups = &config.role_groups;
    for name in [
        &groups.manager,
        &groups.author,
        &groups.member,
        &groups.system_admin,
    ] {
        gateway.seed_group(name).await;
    }
    gateway
}

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use membership::api::CALLER_HEADER;
use membership::app::{AppState, build_router};
use membership::identity::directory::AccountDirectory;
use membership::identity::memory::InMemoryGateway;
use membership::identity::provisioning::ProvisioningSaga;
use membership::membership::{MembershipAuthority, MembershipPolicy};
use membership::model::RoleGroups;
use membership::store::memory::InMemoryStore;
use std::sync::Arc;

pub type TestService = axum::routing::RouterIntoService<Body, ()>;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn json_request(
    method: &str,
    uri: &str,
    caller: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(caller) = caller {
        builder = builder.header(CALLER_HEADER, caller);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn get_request(uri: &str, caller: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(caller) = caller {
        builder = builder.header(CALLER_HEADER, caller);
    }
    builder.body(Body::empty()).expect("request")
}

/// Router over in-memory backends with the role groups and one administrator
/// already present in the provider.
pub struct TestApp {
    pub service: TestService,
    pub gateway: InMemoryGateway,
    pub store: Arc<InMemoryStore>,
    pub admin: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_policy(MembershipPolicy::default()).await
    }

    pub async fn with_policy(policy: MembershipPolicy) -> Self {
        let role_groups = RoleGroups::default();
        let gateway = InMemoryGateway::new();
        for name in [
            &role_groups.manager,
            &role_groups.author,
            &role_groups.member,
            &role_groups.system_admin,
        ] {
            gateway.seed_group(name).await;
        }
        let admin = gateway.seed_account("admin", "admin@example.com").await;
        assert!(
            gateway
                .seed_membership(&admin, &role_groups.system_admin)
                .await
        );
        gateway.clear_calls().await;

        let store = Arc::new(InMemoryStore::new());
        let shared_gateway = Arc::new(gateway.clone());
        let state = AppState {
            authority: MembershipAuthority::new(
                store.clone(),
                shared_gateway.clone(),
                role_groups,
                policy,
            ),
            saga: ProvisioningSaga::new(shared_gateway.clone()),
            directory: AccountDirectory::new(shared_gateway),
            store: store.clone(),
        };
        Self {
            service: build_router(state).into_service(),
            gateway,
            store,
            admin,
        }
    }

    pub async fn account(&self, username: &str) -> String {
        self.gateway
            .seed_account(username, &format!("{username}@example.com"))
            .await
    }
}

//! Membership HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! Static path segments (`/v1/users/orphans`) take precedence over the
//! `:account_id` capture, so the orphan routes stay reachable.
use crate::api;
use crate::identity::directory::AccountDirectory;
use crate::identity::provisioning::ProvisioningSaga;
use crate::membership::MembershipAuthority;
use crate::observability;
use crate::store::MembershipStore;
use axum::Router;
use axum::routing::{delete, get, post, put};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Clone)]
pub struct AppState {
    pub authority: MembershipAuthority,
    pub saga: ProvisioningSaga,
    pub directory: AccountDirectory,
    pub store: Arc<dyn MembershipStore>,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route("/v1/system/info", get(api::system::system_info))
        .route("/v1/system/health", get(api::system::system_health))
        .route(
            "/v1/projects/:project_id",
            get(api::members::get_project).put(api::members::upsert_project),
        )
        .route(
            "/v1/projects/:project_id/managers",
            post(api::members::add_managers).delete(api::members::remove_managers),
        )
        .route(
            "/v1/projects/:project_id/members",
            get(api::members::list_members)
                .post(api::members::add_members)
                .delete(api::members::remove_members),
        )
        .route(
            "/v1/projects/:project_id/members/:membership_id/role",
            put(api::members::update_member_role),
        )
        .route(
            "/v1/projects/:project_id/my-role",
            get(api::members::my_role),
        )
        .route(
            "/v1/accounts/:account_id/reconcile",
            post(api::members::reconcile_account),
        )
        .route(
            "/v1/users",
            get(api::users::list_users).post(api::users::create_user),
        )
        .route("/v1/users/orphans", get(api::users::list_orphans))
        .route(
            "/v1/users/orphans/:username",
            delete(api::users::clear_orphan),
        )
        .route(
            "/v1/users/:account_id",
            get(api::users::get_user).put(api::users::update_user),
        )
        .route(
            "/v1/users/:account_id/deactivate",
            post(api::users::deactivate_user),
        )
        .route("/v1/groups", get(api::users::list_groups))
        .route("/v1/roles", get(api::users::list_roles))
        .route(
            "/v1/groups/:group_id/roles",
            get(api::users::group_roles)
                .post(api::users::add_group_roles)
                .delete(api::users::remove_group_roles),
        )
        .layer(trace_layer)
        .with_state(state)
}

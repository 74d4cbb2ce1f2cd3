//! Identity-provider integration.
//!
//! # Purpose
//! Everything that talks to the external identity provider: the gateway trait
//! and its Keycloak and in-memory bindings, bearer-token caching, the group diff
//! engine, the group synchronizer, the provisioning saga, and directory
//! administration.
pub mod diff;
pub mod directory;
pub mod gateway;
pub mod keycloak;
pub mod memory;
pub mod provisioning;
pub mod sync;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

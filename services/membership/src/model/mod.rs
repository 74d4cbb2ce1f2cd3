//! Membership data model module.
//!
//! # Purpose
//! Re-exports the project, membership, and role models shared by the store,
//! the membership authority, and the HTTP API.
mod membership;
mod project;
mod role;

pub use membership::{Membership, NO_ROLE};
pub use project::Project;
pub use role::{ProjectRole, RoleGroups, fold_name, same_name};

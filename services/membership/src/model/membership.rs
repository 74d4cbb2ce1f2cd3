//! Local membership projection.
//!
//! # Purpose
//! A `Membership` binds one identity-provider account to one project with one
//! role. The membership authority is the only writer; at most one row exists per
//! `(project_id, account_id)` pair.
use super::ProjectRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role label returned by role queries when the account holds no membership.
pub const NO_ROLE: &str = "None";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Membership {
    pub membership_id: Uuid,
    pub project_id: Uuid,
    pub account_id: String,
    pub project_role: ProjectRole,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(project_id: Uuid, account_id: impl Into<String>, project_role: ProjectRole) -> Self {
        Self {
            membership_id: Uuid::new_v4(),
            project_id,
            account_id: account_id.into(),
            project_role,
            joined_at: Utc::now(),
        }
    }
}

//! Project reference model.
//!
//! # Purpose
//! Projects are owned by the project catalog; the membership service only keeps
//! enough of each record to validate that a project exists before enrolling
//! members into it.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_project_id: Option<Uuid>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            project_id: Uuid::new_v4(),
            name: name.into(),
            parent_project_id: None,
        }
    }
}

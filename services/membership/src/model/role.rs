//! Project roles and their identity-provider group mapping.
//!
//! # Purpose
//! Project roles form a closed set. Each role maps to exactly one provider group
//! through [`RoleGroups`], which also names the restricted system-admin group
//! that can never be handed out through project membership calls.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison key for group and role names. Every case-insensitive name
/// comparison goes through this fold.
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

pub fn same_name(left: &str, right: &str) -> bool {
    fold_name(left) == fold_name(right)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Manager,
    Author,
    Member,
}

impl ProjectRole {
    pub const ALL: [ProjectRole; 3] = [
        ProjectRole::Manager,
        ProjectRole::Author,
        ProjectRole::Member,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::Manager => "manager",
            ProjectRole::Author => "author",
            ProjectRole::Member => "member",
        }
    }

    /// Parse a stored role label. Only the canonical lowercase names are accepted.
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "manager" => Some(ProjectRole::Manager),
            "author" => Some(ProjectRole::Author),
            "member" => Some(ProjectRole::Member),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider group names backing each project role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleGroups {
    pub manager: String,
    pub author: String,
    pub member: String,
    pub system_admin: String,
}

impl Default for RoleGroups {
    fn default() -> Self {
        Self {
            manager: "project:project-manager".to_string(),
            author: "project:author".to_string(),
            member: "project:member".to_string(),
            system_admin: "system:admin".to_string(),
        }
    }
}

impl RoleGroups {
    pub fn group_for(&self, role: ProjectRole) -> &str {
        match role {
            ProjectRole::Manager => &self.manager,
            ProjectRole::Author => &self.author,
            ProjectRole::Member => &self.member,
        }
    }

    /// Groups this service is allowed to grant or revoke.
    pub fn managed_groups(&self) -> Vec<&str> {
        ProjectRole::ALL
            .iter()
            .map(|role| self.group_for(*role))
            .collect()
    }

    /// True when a requested role value names the system-admin group in any spelling.
    pub fn is_restricted(&self, requested: &str) -> bool {
        let requested = fold_name(requested);
        requested.contains(&fold_name(&self.system_admin)) || requested.contains("system-admin")
    }

    /// Resolve a caller-supplied role value.
    ///
    /// Accepts the role label (`manager`, `author`, `member`), the legacy
    /// `project-manager` alias, or the backing group name, all case-insensitive.
    pub fn parse_role(&self, requested: &str) -> Option<ProjectRole> {
        let trimmed = requested.trim();
        if same_name(trimmed, "project-manager") {
            return Some(ProjectRole::Manager);
        }
        ProjectRole::ALL.into_iter().find(|role| {
            same_name(trimmed, role.as_str()) || same_name(trimmed, self.group_for(*role))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_role_accepts_labels_and_group_names() {
        let groups = RoleGroups::default();
        assert_eq!(groups.parse_role("Manager"), Some(ProjectRole::Manager));
        assert_eq!(
            groups.parse_role("project-manager"),
            Some(ProjectRole::Manager)
        );
        assert_eq!(
            groups.parse_role("PROJECT:AUTHOR"),
            Some(ProjectRole::Author)
        );
        assert_eq!(groups.parse_role(" member "), Some(ProjectRole::Member));
        assert_eq!(groups.parse_role("owner"), None);
    }

    #[test]
    fn restricted_detection_is_substring_and_case_insensitive() {
        let groups = RoleGroups::default();
        assert!(groups.is_restricted("System:Admin"));
        assert!(groups.is_restricted("my-system-admin-role"));
        assert!(!groups.is_restricted("manager"));
    }

    #[test]
    fn role_labels_round_trip() {
        for role in ProjectRole::ALL {
            assert_eq!(ProjectRole::from_label(role.as_str()), Some(role));
        }
        assert_eq!(ProjectRole::from_label("Manager"), None);
    }

    #[test]
    fn managed_groups_follow_configuration() {
        let groups = RoleGroups {
            manager: "mgr".into(),
            author: "auth".into(),
            member: "mem".into(),
            system_admin: "root".into(),
        };
        assert_eq!(groups.managed_groups(), vec!["mgr", "auth", "mem"]);
        assert!(groups.is_restricted("ROOT"));
    }

    #[test]
    fn names_fold_beyond_ascii() {
        assert!(same_name("ÉQUIPE:Auteur", "équipe:auteur"));
        assert!(!same_name("équipe:auteur", "equipe:auteur"));
        let groups = RoleGroups {
            author: "Équipe:Auteur".into(),
            system_admin: "Équipe:Admin".into(),
            ..RoleGroups::default()
        };
        assert_eq!(groups.parse_role("ÉQUIPE:AUTEUR"), Some(ProjectRole::Author));
        assert!(groups.is_restricted("équipe:admin"));
    }
}

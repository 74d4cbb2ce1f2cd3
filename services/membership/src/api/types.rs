//! Request and response bodies for the membership HTTP API.
use crate::identity::gateway::Account;
use crate::identity::provisioning::OrphanedAccount;
use crate::identity::sync::SyncReport;
use crate::membership::{EnrollmentReport, MemberRequest, RemovalReport, RoleChangeReport};
use crate::model::Membership;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub storage: String,
    pub durable: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectUpsertRequest {
    pub name: String,
    #[serde(default)]
    pub parent_project_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AddManagersRequest {
    pub account_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AddMembersRequest {
    pub members: Vec<MemberRequest>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoveMembersRequest {
    pub membership_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct EnrollmentResponse {
    pub membership_ids: Vec<Uuid>,
    #[serde(flatten)]
    pub report: EnrollmentReport,
}

impl From<EnrollmentReport> for EnrollmentResponse {
    fn from(report: EnrollmentReport) -> Self {
        Self {
            membership_ids: report.membership_ids(),
            report,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct RemovalResponse {
    pub membership_ids: Vec<Uuid>,
    #[serde(flatten)]
    pub report: RemovalReport,
}

impl From<RemovalReport> for RemovalResponse {
    fn from(report: RemovalReport) -> Self {
        Self {
            membership_ids: report.membership_ids(),
            report,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct RoleChangeResponse {
    pub membership_id: Uuid,
    #[serde(flatten)]
    pub report: RoleChangeReport,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoleResponse {
    pub project_id: Uuid,
    pub account_id: String,
    /// Role label, or `"None"` without a membership.
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemberListResponse {
    pub items: Vec<Membership>,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserListQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserListResponse {
    pub items: Vec<Account>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

fn default_temporary() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    pub password: String,
    #[serde(default = "default_temporary")]
    pub temporary_password: bool,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateUserResponse {
    pub account_id: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// When present, the account's groups converge to exactly this list.
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Clone)]
pub struct UpdateUserResponse {
    pub account: Account,
    pub group_sync: Option<SyncReport>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoleNamesRequest {
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct OrphanListResponse {
    pub items: Vec<OrphanedAccount>,
}

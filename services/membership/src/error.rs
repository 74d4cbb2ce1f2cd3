//! Membership error taxonomy.
//!
//! # Purpose
//! Every core operation fails with a [`MembershipError`]. Its [`ErrorKind`] is a
//! closed set the HTTP layer maps to status codes with an exhaustive match.
//!
//! # Key invariants
//! - `CompensationFailed` is never folded into `Infrastructure`. It marks an
//!   orphaned provider account that needs operator attention.
//! - `AllMembersAlreadyExist` and `MembersNotFound` are client-visible empty
//!   results, not server failures.
use crate::identity::gateway::GatewayError;
use crate::identity::sync::SyncError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AccessDenied,
    Conflict,
    AllAlreadyEnrolled,
    NoneMatched,
    Infrastructure,
    CompensationFailed,
    Cancelled,
}

impl ErrorKind {
    /// Infrastructure failures, including the escalated compensation case.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ErrorKind::Infrastructure | ErrorKind::CompensationFailed
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum MembershipError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("all requested members already exist in the project")]
    AllMembersAlreadyExist,
    #[error("none of the requested members belong to the project")]
    MembersNotFound,
    #[error("identity infrastructure failure: {0}")]
    Infrastructure(String),
    #[error("compensation failed for account '{username}'; orphaned account requires cleanup: {cause}")]
    CompensationFailed {
        username: String,
        account_id: Option<String>,
        cause: String,
    },
    #[error("operation cancelled")]
    Cancelled,
}

impl MembershipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MembershipError::Validation(_) => ErrorKind::Validation,
            MembershipError::NotFound(_) => ErrorKind::NotFound,
            MembershipError::AccessDenied(_) => ErrorKind::AccessDenied,
            MembershipError::Conflict(_) => ErrorKind::Conflict,
            MembershipError::AllMembersAlreadyExist => ErrorKind::AllAlreadyEnrolled,
            MembershipError::MembersNotFound => ErrorKind::NoneMatched,
            MembershipError::Infrastructure(_) => ErrorKind::Infrastructure,
            MembershipError::CompensationFailed { .. } => ErrorKind::CompensationFailed,
            MembershipError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<GatewayError> for MembershipError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(what) => MembershipError::NotFound(what),
            GatewayError::Conflict(message) => MembershipError::Conflict(message),
            other => MembershipError::Infrastructure(other.to_string()),
        }
    }
}

impl From<SyncError> for MembershipError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::GroupNotFound(names) => {
                MembershipError::NotFound(format!("group {}", names.join(", ")))
            }
            SyncError::AccountNotFound(account_id) => {
                MembershipError::NotFound(format!("account {account_id}"))
            }
            SyncError::Cancelled { .. } => MembershipError::Cancelled,
            other => MembershipError::Infrastructure(other.to_string()),
        }
    }
}

impl From<StoreError> for MembershipError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => MembershipError::NotFound(what),
            StoreError::Conflict(message) => MembershipError::Conflict(message),
            StoreError::PreconditionFailed(message) => MembershipError::AccessDenied(message),
            StoreError::Unexpected(err) => MembershipError::Infrastructure(format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compensation_failure_is_infrastructure_but_distinct() {
        let err = MembershipError::CompensationFailed {
            username: "erin".into(),
            account_id: Some("id-1".into()),
            cause: "delete failed".into(),
        };
        assert_eq!(err.kind(), ErrorKind::CompensationFailed);
        assert!(err.kind().is_infrastructure());
        assert_ne!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.to_string().contains("orphaned account"));
    }

    #[test]
    fn gateway_errors_map_onto_taxonomy() {
        let not_found: MembershipError = GatewayError::NotFound("account".into()).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        let conflict: MembershipError = GatewayError::Conflict("exists".into()).into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        let token: MembershipError = GatewayError::TokenUnavailable("down".into()).into();
        assert_eq!(token.kind(), ErrorKind::Infrastructure);
        let timeout: MembershipError = GatewayError::Timeout("create account".into()).into();
        assert_eq!(timeout.kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn store_precondition_failure_is_access_denied() {
        let err: MembershipError = StoreError::PreconditionFailed("demoted".into()).into();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn sync_errors_map_onto_taxonomy() {
        let err: MembershipError = SyncError::GroupNotFound(vec!["x".into()]).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err: MembershipError = SyncError::Cancelled {
            completed: vec![],
            pending: vec![],
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}

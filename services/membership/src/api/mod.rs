//! Membership HTTP API module.
//!
//! # Purpose
//! Exposes route handler modules plus the helpers every handler shares:
//! reading the caller identity forwarded by the fronting gateway and running
//! core operations so that a dropped request cancels them.
pub mod error;
pub mod members;
pub mod system;
pub mod types;
pub mod users;

use crate::api::error::{ApiError, api_internal_message, api_unauthorized};
use crate::error::MembershipError;
use crate::membership::Caller;
use axum::http::HeaderMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Header carrying the authenticated account id, set by the fronting gateway.
pub const CALLER_HEADER: &str = "x-user-id";

pub(crate) fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    headers
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(Caller::new)
        .ok_or_else(|| api_unauthorized("missing caller identity"))
}

/// Run a core operation on its own task.
///
/// The token is cancelled when the handler future is dropped (client gone), so
/// the operation stops before its next remote call. A call already in flight
/// completes.
pub(crate) async fn run_cancellable<T, F, Fut>(op: F) -> Result<T, ApiError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, MembershipError>> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    match tokio::spawn(op(cancel)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(err) => {
            tracing::error!(error = %err, "membership operation task failed");
            Err(api_internal_message("membership operation failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn caller_requires_non_empty_header() {
        let mut headers = HeaderMap::new();
        let err = caller_from_headers(&headers).expect_err("missing");
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        headers.insert(CALLER_HEADER, "  ".parse().unwrap());
        assert!(caller_from_headers(&headers).is_err());

        headers.insert(CALLER_HEADER, " acct-1 ".parse().unwrap());
        assert_eq!(caller_from_headers(&headers).unwrap(), Caller::new("acct-1"));
    }

    #[tokio::test]
    async fn dropped_request_cancels_operation() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let request = tokio::spawn(run_cancellable(move |cancel| async move {
            let _ = started_tx.send(());
            cancel.cancelled().await;
            let _ = seen_tx.send(());
            Err::<(), _>(MembershipError::Cancelled)
        }));
        started_rx.await.expect("operation started");
        request.abort();
        tokio::time::timeout(std::time::Duration::from_secs(1), seen_rx)
            .await
            .expect("cancellation observed")
            .expect("sender alive");
    }

    #[tokio::test]
    async fn errors_are_mapped_through_the_taxonomy() {
        let err = run_cancellable(|_| async { Err::<(), _>(MembershipError::MembersNotFound) })
            .await
            .expect_err("mapped");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body.code, "members_not_found");
    }
}

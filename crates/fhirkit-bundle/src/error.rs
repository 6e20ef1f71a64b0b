use fhirkit_api::{ApiError, IssueType, OperationOutcome};
use fhirkit_storage::StorageError;
use thiserror::Error;

/// Errors that fail a bundle as a whole. Per-entry failures of a batch are
/// reported inside the response bundle instead.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    /// A transaction entry failed; everything the transaction did was rolled back.
    #[error("Transaction failed at entry {index} with status {status}")]
    TransactionFailed {
        index: usize,
        status: u16,
        outcome: OperationOutcome,
    },

    #[error("Bundle processing was cancelled")]
    Cancelled,

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl BundleError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidBundle(message.into())
    }
}

impl From<BundleError> for ApiError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::InvalidBundle(msg) => ApiError::bad_request(msg),
            BundleError::TransactionFailed {
                status, outcome, ..
            } => ApiError::from_status(status, outcome),
            BundleError::Cancelled => ApiError::from_status(
                408,
                OperationOutcome::error(IssueType::Incomplete, "Bundle processing was cancelled."),
            ),
            BundleError::Storage(e) => ApiError::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_failure_surfaces_entry_outcome() {
        let outcome = OperationOutcome::error(IssueType::Forbidden, "Authorization failed.");
        let api: ApiError = BundleError::TransactionFailed {
            index: 2,
            status: 403,
            outcome: outcome.clone(),
        }
        .into();
        assert_eq!(api.status_code().as_u16(), 403);
        assert_eq!(api.to_operation_outcome(), outcome);
    }

    #[test]
    fn invalid_and_cancelled_statuses() {
        let api: ApiError = BundleError::invalid("no entries").into();
        assert_eq!(api.status_code().as_u16(), 400);
        assert_eq!(api.to_operation_outcome().issue[0].code, IssueType::Invalid);

        let api: ApiError = BundleError::Cancelled.into();
        assert_eq!(api.status_code().as_u16(), 408);
        assert_eq!(api.to_operation_outcome().issue[0].code, IssueType::Incomplete);
    }

    #[test]
    fn storage_errors_are_internal() {
        let api: ApiError = BundleError::from(StorageError::unavailable("down")).into();
        assert_eq!(api.status_code().as_u16(), 500);
    }
}

use fhirkit_api::ApiError;
use fhirkit_storage::StorageError;
use thiserror::Error;

use crate::deidentify::DeidentifyError;
use crate::parser::SearchValidationError;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    InvalidParameter(#[from] SearchValidationError),
    /// A result could not be redacted; nothing from it may be returned.
    #[error(transparent)]
    MalformedResource(#[from] DeidentifyError),
    #[error("Search backend failure: {0}")]
    Backend(#[from] StorageError),
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidParameter(e) => ApiError::bad_request(e.to_string()),
            SearchError::MalformedResource(e) => ApiError::unprocessable_entity(e.to_string()),
            SearchError::Backend(e) => ApiError::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_api::IssueType;

    #[test]
    fn malformed_resource_maps_to_422_processing() {
        let err = SearchError::from(DeidentifyError::MalformedResource {
            resource_type: "Patient".into(),
            reason: "'name' is not a list".into(),
        });
        let api: ApiError = err.into();
        assert_eq!(api.status_code().as_u16(), 422);
        assert_eq!(api.to_operation_outcome().issue[0].code, IssueType::Processing);
    }

    #[test]
    fn backend_failure_maps_to_500() {
        let api: ApiError = SearchError::from(StorageError::unavailable("down")).into();
        assert_eq!(api.status_code().as_u16(), 500);
    }
}

use crate::domain::DomainError;
use tonic::Status;
use tracing::error;

/// Convert domain error to gRPC Status.
///
/// Only validation failures carry their message to the caller; every other failure is
/// logged here and reported as a generic internal error.
pub fn domain_error_to_status(error: DomainError) -> Status {
    match error {
        DomainError::ValidationError(msg) => Status::invalid_argument(msg),
        DomainError::Cancelled => {
            error!(error = %error, "request cancelled before completion");
            Status::internal("internal error")
        }
        other => {
            error!(error = %other, "request failed");
            Status::internal("internal error")
        }
    }
}

//! Error tracing extensions
//!
//! Logs a [`ClientError`] together with its failure classification and
//! source chain, at a level matching how bad it is.

use std::error::Error as StdError;

use crate::types::{ClientError, FailureKind};

/// Extension trait for logging errors with their classification
pub trait ErrorTraceExt {
    /// Log the error with failure kind, retry hint and source chain
    fn trace_error(&self) -> &Self;
}

impl ErrorTraceExt for ClientError {
    fn trace_error(&self) -> &Self {
        let failure_kind = self.failure_kind();

        let mut error_chain = Vec::new();
        let mut current_source = self.source();
        while let Some(source) = current_source {
            error_chain.push(source.to_string());
            current_source = source.source();
        }

        if self.is_user_error() {
            tracing::warn!(
                error = %self,
                failure_kind = %failure_kind,
                "Rejected request"
            );
        } else {
            tracing::error!(
                error = %self,
                failure_kind = %failure_kind,
                fatal = matches!(failure_kind, FailureKind::NoSupport | FailureKind::Unavailable),
                is_retryable = self.is_retryable(),
                error_chain_len = error_chain.len(),
                error_chain = ?error_chain,
                "Error occurred with full context"
            );
        }

        self
    }
}

/// Extension trait for Result types
pub trait ResultTraceExt<T, E>: Sized {
    /// Convert the error to [`ClientError`] and log it
    fn trace_context(self) -> Result<T, ClientError>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultTraceExt<T, E> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
    ClientError: From<E>,
{
    fn trace_context(self) -> Result<T, ClientError> {
        self.map_err(|e| {
            let error = ClientError::from(e);
            error.trace_error();
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_error_returns_self() {
        let error = ClientError::unavailable("agent not installed");
        assert!(std::ptr::eq(error.trace_error(), &error));

        let error = ClientError::InvalidMode("plan".into());
        assert!(matches!(error.trace_error(), ClientError::InvalidMode(_)));
    }

    #[test]
    fn test_result_trace_context_converts_io() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "agent stdin closed",
        ));
        assert!(matches!(result.trace_context(), Err(ClientError::Io(_))));
    }
}

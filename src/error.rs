use thiserror::Error;

use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("percentage threshold {0} is outside 0..=100")]
    InvalidThreshold(u32),
    #[error("data source {0} is not part of the current case")]
    UnknownDataSource(i64),
    #[error("case {0} is not registered in the central repository")]
    CaseNotInRepository(String),
    #[error("central repository is not available")]
    CorrelationStoreUnavailable,
    #[error("search cancelled")]
    Cancelled,
}

impl SearchError {
    /// Failures that abort the search and warrant a single user notification.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SearchError::Store(_) | SearchError::CorrelationStoreUnavailable
        )
    }

    /// The caller asked for something this scope can never do.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, SearchError::Unsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_fatal() {
        let err: SearchError = StoreError::Unreachable("connection refused".into()).into();
        assert!(err.is_fatal());
        assert!(!err.is_contract_violation());
        assert_eq!(
            err.to_string(),
            "store error: store unreachable: connection refused"
        );
    }

    #[test]
    fn unsupported_is_contract_violation() {
        let err = SearchError::Unsupported("intra-case search grouped by case");
        assert!(err.is_contract_violation());
        assert!(!err.is_fatal());
    }

    #[test]
    fn cancellation_is_neither() {
        let err = SearchError::Cancelled;
        assert!(!err.is_fatal());
        assert!(!err.is_contract_violation());
    }
}

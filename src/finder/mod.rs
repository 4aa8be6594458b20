//! Finders turn search parameters into collated results.
//!
//! [`IntraCaseFinder`] reads the open case's file table only.
//! [`InterCaseFinder`] looks candidate values up in the central repository.

pub mod inter;
pub mod intra;

pub use inter::InterCaseFinder;
pub use intra::IntraCaseFinder;

use correlation_types::CorrelationType;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::SearchError;
use crate::query::MimeFilter;

/// Values per central repository lookup.
pub const DEFAULT_BATCH_SIZE: usize = 500;

pub const MAX_PERCENTAGE_THRESHOLD: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Scope {
    IntraCase {
        /// Pin the search to one data source of the open case.
        data_source: Option<i64>,
    },
    InterCase {
        correlation_type: CorrelationType,
        /// Restrict matches to one other case, by central repository id.
        target_case: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub scope: Scope,
    pub media_filter: bool,
    pub document_filter: bool,
    /// 0 disables prevalence filtering.
    pub percentage_threshold: u32,
    pub batch_size: usize,
}

impl SearchParams {
    pub fn intra_case(data_source: Option<i64>) -> Self {
        Self::with_scope(Scope::IntraCase { data_source })
    }

    pub fn inter_case(correlation_type: CorrelationType, target_case: Option<i64>) -> Self {
        Self::with_scope(Scope::InterCase {
            correlation_type,
            target_case,
        })
    }

    fn with_scope(scope: Scope) -> Self {
        Self {
            scope,
            media_filter: false,
            document_filter: false,
            percentage_threshold: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_filters(mut self, media: bool, documents: bool) -> Self {
        self.media_filter = media;
        self.document_filter = documents;
        self
    }

    pub fn with_threshold(mut self, percentage_threshold: u32) -> Self {
        self.percentage_threshold = percentage_threshold;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn mime_filter(&self) -> MimeFilter {
        MimeFilter::new(self.media_filter, self.document_filter)
    }

    /// Checks that need no store access.
    pub fn validate(&self) -> Result<(), SearchError> {
        validate_threshold(self.percentage_threshold)
    }
}

pub fn validate_threshold(percentage_threshold: u32) -> Result<(), SearchError> {
    if percentage_threshold > MAX_PERCENTAGE_THRESHOLD {
        return Err(SearchError::InvalidThreshold(percentage_threshold));
    }
    Ok(())
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), SearchError> {
    if cancel.is_cancelled() {
        return Err(SearchError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_range_is_checked() {
        assert!(SearchParams::intra_case(None).with_threshold(0).validate().is_ok());
        assert!(SearchParams::intra_case(None).with_threshold(100).validate().is_ok());
        assert!(matches!(
            SearchParams::intra_case(None).with_threshold(101).validate(),
            Err(SearchError::InvalidThreshold(101))
        ));
    }

    #[test]
    fn filters_map_to_mime_filter() {
        let params = SearchParams::inter_case(CorrelationType::files(), None).with_filters(true, false);
        assert_eq!(params.mime_filter(), MimeFilter::new(true, false));
        assert_eq!(params.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn cancelled_token_stops() {
        let token = CancellationToken::new();
        assert!(ensure_not_cancelled(&token).is_ok());
        token.cancel();
        assert!(matches!(ensure_not_cancelled(&token), Err(SearchError::Cancelled)));
    }
}

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::{CaseFileStore, CorrelationStore, StoreError};
use crate::error::SearchError;
use crate::finder::{InterCaseFinder, IntraCaseFinder, Scope, SearchParams, ensure_not_cancelled};
use crate::results::{CaseResults, CountResults};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultView {
    #[default]
    ByCount,
    ByCase,
}

#[derive(Debug)]
pub enum SearchResults {
    Count(CountResults),
    Case(CaseResults),
}

impl SearchResults {
    pub fn size(&self) -> usize {
        match self {
            SearchResults::Count(results) => results.size(),
            SearchResults::Case(results) => results.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SearchResults::Count(results) => results.is_empty(),
            SearchResults::Case(results) => results.is_empty(),
        }
    }
}

#[derive(Debug)]
pub struct SearchOutcome {
    pub tab_title: String,
    pub results: SearchResults,
}

/// Runs one search and applies the prevalence filter to its results.
///
/// The central repository is optional for intra-case searches, where it only
/// feeds the filter, and required for inter-case searches.
pub async fn run_search(
    params: &SearchParams,
    view: ResultView,
    case_store: &dyn CaseFileStore,
    correlation_store: Option<&dyn CorrelationStore>,
    cancel: &CancellationToken,
) -> Result<SearchOutcome, SearchError> {
    let started = Instant::now();
    let outcome = execute(params, view, case_store, correlation_store, cancel).await;

    match &outcome {
        Ok(outcome) => info!(
            stage = "search",
            event = "search.end",
            result = "ok",
            tab_title = %outcome.tab_title,
            instance_count = outcome.results.size(),
            duration_ms = started.elapsed().as_millis(),
            "search completed"
        ),
        Err(SearchError::Cancelled) => info!(
            stage = "search",
            event = "search.end",
            result = "cancelled",
            duration_ms = started.elapsed().as_millis(),
            "search cancelled"
        ),
        Err(err) => error!(
            stage = "search",
            event = "search.end",
            result = "fail",
            fatal = err.is_fatal(),
            duration_ms = started.elapsed().as_millis(),
            error = %err,
            "search failed"
        ),
    }
    outcome
}

async fn execute(
    params: &SearchParams,
    view: ResultView,
    case_store: &dyn CaseFileStore,
    correlation_store: Option<&dyn CorrelationStore>,
    cancel: &CancellationToken,
) -> Result<SearchOutcome, SearchError> {
    params.validate()?;
    let filter = params.mime_filter();

    match &params.scope {
        Scope::IntraCase { data_source } => {
            if view == ResultView::ByCase {
                return Err(SearchError::Unsupported("intra-case search grouped by case"));
            }
            ensure_not_cancelled(cancel)?;
            let data_sources = case_store.data_sources().await?;
            let finder = IntraCaseFinder::new(
                case_store,
                data_sources,
                *data_source,
                filter,
                params.percentage_threshold,
            )?;

            let mut results = finder.find_by_count(cancel).await?;
            results.filter_metadata(correlation_store).await;
            Ok(SearchOutcome {
                tab_title: finder.tab_title(),
                results: SearchResults::Count(results),
            })
        }
        Scope::InterCase {
            correlation_type,
            target_case,
        } => {
            let repo = correlation_store.ok_or(SearchError::CorrelationStoreUnavailable)?;
            ensure_not_cancelled(cancel)?;
            let finder = InterCaseFinder::new(
                case_store,
                repo,
                correlation_type.clone(),
                *target_case,
                filter,
                params.percentage_threshold,
            )
            .await?
            .with_batch_size(params.batch_size);

            let results = match view {
                ResultView::ByCount => {
                    let mut results = finder.find_by_count(cancel).await?;
                    results.filter_metadata(Some(repo)).await;
                    SearchResults::Count(results)
                }
                ResultView::ByCase => {
                    let mut results = finder.find_by_case(cancel).await?;
                    results.filter_metadata(Some(repo)).await;
                    SearchResults::Case(results)
                }
            };
            Ok(SearchOutcome {
                tab_title: finder.tab_title(),
                results,
            })
        }
    }
}

/// Registered cases other than the open one, by central repository id.
pub async fn available_target_cases(
    store: &dyn CorrelationStore,
    current_case_uuid: &str,
) -> Result<BTreeMap<i64, String>, StoreError> {
    Ok(store
        .cases()
        .await?
        .into_iter()
        .filter(|case| case.case_uuid != current_case_uuid)
        .map(|case| (case.id, case.display_name))
        .collect())
}

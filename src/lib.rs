pub mod collate;
pub mod db;
pub mod error;
pub mod finder;
pub mod frequency;
pub mod model;
pub mod normalize;
pub mod query;
pub mod results;
pub mod search;

pub use db::{CaseFileStore, CorrelationStore, StoreError};
pub use error::SearchError;
pub use finder::{Scope, SearchParams};
pub use model::{AttributeInstance, AttributeValue, ValueAggregateList};
pub use results::{CaseResults, CountResults};
pub use search::{ResultView, SearchOutcome, SearchResults, available_target_cases, run_search};

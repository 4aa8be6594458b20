//! Prevalence filter shared by both result views.
//!
//! A value's prevalence is the share of all data sources known to the central
//! repository that contain it, truncated to a whole percent. Values above the
//! threshold are dropped. Per-value lookup failures keep the value; failing to
//! read the global data source count disables the filter.

use std::collections::HashMap;

use correlation_types::CorrelationType;
use tracing::{error, warn};

use crate::db::CorrelationStore;
use crate::normalize::normalize;

/// Threshold 0 turns filtering off.
pub const FILTER_DISABLED: u32 = 0;

/// Whole-percent prevalence, truncated.
pub fn prevalence(unique_data_sources: i64, total_data_sources: i64) -> i64 {
    if total_data_sources <= 0 {
        return 0;
    }
    unique_data_sources * 100 / total_data_sources
}

pub struct FrequencyFilter<'a> {
    store: &'a dyn CorrelationStore,
    correlation_type: CorrelationType,
    threshold: u32,
    total_data_sources: i64,
    verdicts: HashMap<String, bool>,
}

impl<'a> FrequencyFilter<'a> {
    /// `None` when filtering is off: threshold 0, no store, or the store
    /// could not report how many data sources it knows.
    pub async fn prepare(
        store: Option<&'a dyn CorrelationStore>,
        correlation_type: &CorrelationType,
        threshold: u32,
    ) -> Option<FrequencyFilter<'a>> {
        if threshold == FILTER_DISABLED {
            return None;
        }
        let store = store?;

        let total_data_sources = match store.count_unique_data_sources().await {
            Ok(total) => total,
            Err(err) => {
                error!(
                    stage = "filter",
                    event = "filter.setup.end",
                    result = "fail",
                    threshold,
                    error = %err,
                    "cannot count data sources; results are left unfiltered"
                );
                return None;
            }
        };
        if total_data_sources <= 0 {
            error!(
                stage = "filter",
                event = "filter.setup.end",
                result = "fail",
                threshold,
                total_data_sources,
                "central repository has no data sources; results are left unfiltered"
            );
            return None;
        }

        Some(Self {
            store,
            correlation_type: correlation_type.clone(),
            threshold,
            total_data_sources,
            verdicts: HashMap::new(),
        })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn total_data_sources(&self) -> i64 {
        self.total_data_sources
    }

    /// Whether `value` is too common to show. Each value is looked up once.
    pub async fn should_drop(&mut self, value: &str) -> bool {
        if let Some(verdict) = self.verdicts.get(value) {
            return *verdict;
        }
        let verdict = self.evaluate(value).await;
        self.verdicts.insert(value.to_string(), verdict);
        verdict
    }

    async fn evaluate(&self, value: &str) -> bool {
        let normalized = match normalize(&self.correlation_type, value) {
            Ok(normalized) => normalized,
            Err(err) => {
                warn!(
                    stage = "filter",
                    event = "filter.value.skip",
                    value,
                    error = %err,
                    "cannot normalize value; keeping it unfiltered"
                );
                return false;
            }
        };

        let unique = match self
            .store
            .count_unique_case_data_sources_with_value(&self.correlation_type, &normalized)
            .await
        {
            Ok(unique) => unique,
            Err(err) => {
                warn!(
                    stage = "filter",
                    event = "filter.value.skip",
                    value,
                    error = %err,
                    "cannot count data sources for value; keeping it unfiltered"
                );
                return false;
            }
        };

        prevalence(unique, self.total_data_sources) > i64::from(self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryCorrelationStore;
    use correlation_types::FILES_TYPE_ID;

    const COMMON: &str = "5d41402abc4b2a76b9719d911017c592";
    const RARE: &str = "7d793037a0760186574b0282f2f435e7";

    /// Ten data sources over ten cases; COMMON is on three, RARE on two.
    fn store() -> MemoryCorrelationStore {
        let mut store = MemoryCorrelationStore::new();
        for id in 1..=10 {
            store.add_case(id, &format!("uuid-{id}"), &format!("Case {id}"));
            store.add_data_source(id, id, &format!("ds{id}"), Some(id));
        }
        for ds in 1..=3 {
            store.add_instance(FILES_TYPE_ID, ds, ds, COMMON, "/a/common.bin");
        }
        for ds in 1..=2 {
            store.add_instance(FILES_TYPE_ID, ds, ds, RARE, "/a/rare.bin");
        }
        store
    }

    #[test]
    fn prevalence_truncates() {
        assert_eq!(prevalence(3, 10), 30);
        assert_eq!(prevalence(2, 10), 20);
        assert_eq!(prevalence(1, 3), 33);
        assert_eq!(prevalence(2, 3), 66);
        assert_eq!(prevalence(1, 0), 0);
    }

    #[tokio::test]
    async fn threshold_boundary_is_inclusive() {
        let store = store();
        let mut filter = FrequencyFilter::prepare(Some(&store), &CorrelationType::files(), 20)
            .await
            .expect("filter enabled");

        assert_eq!(filter.total_data_sources(), 10);
        assert!(filter.should_drop(COMMON).await);
        assert!(!filter.should_drop(RARE).await);
    }

    #[tokio::test]
    async fn zero_threshold_disables() {
        let store = store();
        assert!(
            FrequencyFilter::prepare(Some(&store), &CorrelationType::files(), 0)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_store_disables() {
        assert!(
            FrequencyFilter::prepare(None, &CorrelationType::files(), 20)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn setup_failure_disables() {
        let store = store();
        store.set_unreachable(true);
        assert!(
            FrequencyFilter::prepare(Some(&store), &CorrelationType::files(), 20)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn per_value_failure_keeps_value() {
        let mut store = store();
        store.fail_count_for(COMMON);
        let mut filter = FrequencyFilter::prepare(Some(&store), &CorrelationType::files(), 20)
            .await
            .expect("filter enabled");

        assert!(!filter.should_drop(COMMON).await);
        assert!(!filter.should_drop("not-a-hash").await);
    }
}

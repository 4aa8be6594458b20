use std::collections::BTreeMap;

use correlation_types::CorrelationType;
use tracing::debug;

use crate::db::CorrelationStore;
use crate::frequency::FrequencyFilter;
use crate::model::ValueAggregateList;
use crate::results::{CountBucketSummary, CountSummary, instance_total, summarize_list};

/// Values grouped by how many distinct data sources they span.
#[derive(Debug, Clone)]
pub struct CountResults {
    buckets: BTreeMap<usize, ValueAggregateList>,
    percentage_threshold: u32,
    correlation_type: CorrelationType,
}

impl CountResults {
    pub fn new(
        buckets: BTreeMap<usize, ValueAggregateList>,
        percentage_threshold: u32,
        correlation_type: CorrelationType,
    ) -> Self {
        Self {
            buckets,
            percentage_threshold,
            correlation_type,
        }
    }

    /// Drops values above the prevalence threshold, then any bucket left
    /// empty. Runs once, before the results are shared.
    pub async fn filter_metadata(&mut self, store: Option<&dyn CorrelationStore>) {
        let Some(mut filter) =
            FrequencyFilter::prepare(store, &self.correlation_type, self.percentage_threshold).await
        else {
            return;
        };

        let mut dropped = 0usize;
        for list in self.buckets.values_mut() {
            let values: Vec<String> = list.value_names().into_iter().map(str::to_string).collect();
            for value in values {
                if filter.should_drop(&value).await && list.remove(&value) {
                    dropped += 1;
                }
            }
        }
        self.buckets.retain(|_, list| !list.is_empty());

        debug!(
            stage = "filter",
            event = "filter.count.end",
            threshold = filter.threshold(),
            dropped,
            remaining_buckets = self.buckets.len(),
            "count results filtered"
        );
    }

    pub fn buckets(&self) -> &BTreeMap<usize, ValueAggregateList> {
        &self.buckets
    }

    pub fn bucket(&self, data_source_count: usize) -> Option<&ValueAggregateList> {
        self.buckets.get(&data_source_count)
    }

    /// Mutable access for consumers that materialize a bucket on expansion.
    pub fn bucket_mut(&mut self, data_source_count: usize) -> Option<&mut ValueAggregateList> {
        self.buckets.get_mut(&data_source_count)
    }

    pub fn buckets_mut(&mut self) -> impl Iterator<Item = (&usize, &mut ValueAggregateList)> {
        self.buckets.iter_mut()
    }

    pub fn percentage_threshold(&self) -> u32 {
        self.percentage_threshold
    }

    pub fn correlation_type(&self) -> &CorrelationType {
        &self.correlation_type
    }

    /// Total instance count over every value.
    pub fn size(&self) -> usize {
        instance_total(self.buckets.values())
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn summary(&self) -> CountSummary {
        CountSummary {
            correlation_type: self.correlation_type.display_name.clone(),
            percentage_threshold: self.percentage_threshold,
            size: self.size(),
            buckets: self
                .buckets
                .iter()
                .map(|(count, list)| CountBucketSummary {
                    data_source_count: *count,
                    values: summarize_list(list),
                })
                .collect(),
        }
    }
}

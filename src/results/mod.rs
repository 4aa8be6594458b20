pub mod case;
pub mod count;

pub use case::CaseResults;
pub use count::CountResults;

use serde::Serialize;

use crate::model::{AttributeValue, ValueAggregateList};

/// Flat description of one value, for consumers that do not walk instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueSummary {
    pub value: String,
    pub display_name: String,
    pub instance_count: usize,
    pub data_source_count: usize,
    pub case_names: String,
    pub data_source_names: String,
}

impl From<&AttributeValue> for ValueSummary {
    fn from(value: &AttributeValue) -> Self {
        Self {
            value: value.value().to_string(),
            display_name: value.display_name().to_string(),
            instance_count: value.instance_count(),
            data_source_count: value.distinct_data_source_count(),
            case_names: value.case_names(),
            data_source_names: value.data_source_names(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountBucketSummary {
    pub data_source_count: usize,
    pub values: Vec<ValueSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountSummary {
    pub correlation_type: String,
    pub percentage_threshold: u32,
    pub size: usize,
    pub buckets: Vec<CountBucketSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSourceBranchSummary {
    pub data_source: String,
    pub values: Vec<ValueSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseBranchSummary {
    pub case_name: String,
    pub data_sources: Vec<DataSourceBranchSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseSummary {
    pub correlation_type: String,
    pub percentage_threshold: u32,
    pub size: usize,
    pub cases: Vec<CaseBranchSummary>,
}

pub(crate) fn summarize_list(list: &ValueAggregateList) -> Vec<ValueSummary> {
    list.backing_values().iter().map(ValueSummary::from).collect()
}

/// Leaf instance count across lists, without materializing any of them.
pub(crate) fn instance_total<'a>(lists: impl Iterator<Item = &'a ValueAggregateList>) -> usize {
    lists
        .flat_map(|list| list.backing_values())
        .map(AttributeValue::instance_count)
        .sum()
}

use std::collections::{BTreeMap, HashMap};

use correlation_types::CorrelationType;
use tracing::{debug, warn};

use crate::collate::CaseTree;
use crate::db::CorrelationStore;
use crate::frequency::FrequencyFilter;
use crate::model::{AttributeValue, ValueAggregateList};
use crate::results::{
    CaseBranchSummary, CaseSummary, DataSourceBranchSummary, instance_total, summarize_list,
};

/// Values grouped by case name and data source label.
///
/// The open case's own branch is split off at construction. It is the
/// reference the frequency filter is evaluated against and is never part of
/// [`CaseResults::buckets`].
#[derive(Debug, Clone)]
pub struct CaseResults {
    current_case_name: String,
    reference: Option<BTreeMap<String, ValueAggregateList>>,
    buckets: CaseTree,
    percentage_threshold: u32,
    correlation_type: CorrelationType,
}

impl CaseResults {
    pub fn new(
        mut tree: CaseTree,
        current_case_name: impl Into<String>,
        percentage_threshold: u32,
        correlation_type: CorrelationType,
    ) -> Self {
        let current_case_name = current_case_name.into();
        let reference = tree.remove(&current_case_name);
        Self {
            current_case_name,
            reference,
            buckets: tree,
            percentage_threshold,
            correlation_type,
        }
    }

    /// Evaluates the threshold once against the open case's values, then
    /// rebuilds every other case's branch from the survivors. A foreign entry
    /// is replaced by the open case's value of the same key, or removed when
    /// that value was dropped. Empty lists and cases are pruned.
    pub async fn filter_metadata(&mut self, store: Option<&dyn CorrelationStore>) {
        let Some(mut filter) =
            FrequencyFilter::prepare(store, &self.correlation_type, self.percentage_threshold).await
        else {
            return;
        };

        let mut keep: HashMap<String, AttributeValue> = HashMap::new();
        match &mut self.reference {
            Some(reference) => {
                for list in reference.values_mut() {
                    let values: Vec<String> =
                        list.value_names().into_iter().map(str::to_string).collect();
                    for value in values {
                        if filter.should_drop(&value).await {
                            list.remove(&value);
                        }
                    }
                    for value in list.backing_values() {
                        keep.entry(value.value().to_string())
                            .or_insert_with(|| value.clone());
                    }
                }
                reference.retain(|_, list| !list.is_empty());
            }
            None => {
                warn!(
                    stage = "filter",
                    event = "filter.case.no_reference",
                    case = %self.current_case_name,
                    "open case has no branch; nothing can be matched"
                );
            }
        }

        let mut filtered = CaseTree::new();
        for (case_name, data_sources) in std::mem::take(&mut self.buckets) {
            let mut branch = BTreeMap::new();
            for (data_source, list) in data_sources {
                let rebuilt: ValueAggregateList = list
                    .backing_values()
                    .iter()
                    .filter_map(|v| keep.get(v.value()).cloned())
                    .collect();
                if !rebuilt.is_empty() {
                    branch.insert(data_source, rebuilt);
                }
            }
            if !branch.is_empty() {
                filtered.insert(case_name, branch);
            }
        }
        self.buckets = filtered;

        debug!(
            stage = "filter",
            event = "filter.case.end",
            threshold = filter.threshold(),
            kept = keep.len(),
            remaining_cases = self.buckets.len(),
            "case results filtered"
        );
    }

    /// Other cases only.
    pub fn buckets(&self) -> &CaseTree {
        &self.buckets
    }

    pub fn case(&self, case_name: &str) -> Option<&BTreeMap<String, ValueAggregateList>> {
        self.buckets.get(case_name)
    }

    pub fn data_source_mut(
        &mut self,
        case_name: &str,
        data_source: &str,
    ) -> Option<&mut ValueAggregateList> {
        self.buckets.get_mut(case_name)?.get_mut(data_source)
    }

    pub fn current_case_name(&self) -> &str {
        &self.current_case_name
    }

    /// The open case's own branch, kept for filtering.
    pub fn current_case_reference(&self) -> Option<&BTreeMap<String, ValueAggregateList>> {
        self.reference.as_ref()
    }

    pub fn percentage_threshold(&self) -> u32 {
        self.percentage_threshold
    }

    pub fn correlation_type(&self) -> &CorrelationType {
        &self.correlation_type
    }

    pub fn size(&self) -> usize {
        instance_total(self.buckets.values().flat_map(|branch| branch.values()))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn summary(&self) -> CaseSummary {
        CaseSummary {
            correlation_type: self.correlation_type.display_name.clone(),
            percentage_threshold: self.percentage_threshold,
            size: self.size(),
            cases: self
                .buckets
                .iter()
                .map(|(case_name, branch)| CaseBranchSummary {
                    case_name: case_name.clone(),
                    data_sources: branch
                        .iter()
                        .map(|(data_source, list)| DataSourceBranchSummary {
                            data_source: data_source.clone(),
                            values: summarize_list(list),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collate::collate_by_case;
    use crate::db::memory::MemoryCorrelationStore;
    use crate::model::{AttributeInstance, CentralRepoInstance, NodeKind};
    use correlation_types::{
        CorrelationCase, CorrelationDataSource, CorrelationRow, FILES_TYPE_ID, KnownStatus,
    };
    use pretty_assertions::assert_eq;

    const COMMON: &str = "5d41402abc4b2a76b9719d911017c592";
    const RARE: &str = "7d793037a0760186574b0282f2f435e7";

    fn store() -> MemoryCorrelationStore {
        let mut store = MemoryCorrelationStore::new();
        for id in 1..=10 {
            store.add_case(id, &format!("uuid-{id}"), &format!("Case {id}"));
            store.add_data_source(id, id, &format!("ds{id}"), Some(id));
        }
        for ds in 1..=3 {
            store.add_instance(FILES_TYPE_ID, ds, ds, COMMON, "/common.bin");
        }
        for ds in 1..=2 {
            store.add_instance(FILES_TYPE_ID, ds, ds, RARE, "/rare.bin");
        }
        store
    }

    fn entry(hash: &str, case: i64) -> (String, String, AttributeValue) {
        let row = CorrelationRow {
            id: case,
            correlation_type_id: FILES_TYPE_ID,
            value: hash.into(),
            case: CorrelationCase {
                id: case,
                case_uuid: format!("uuid-{case}"),
                display_name: format!("Case {case}"),
            },
            data_source: CorrelationDataSource {
                id: case,
                case_id: case,
                device_id: String::new(),
                name: format!("ds{case}"),
                data_source_obj_id: Some(case),
            },
            file_path: "/f.bin".into(),
            known_status: KnownStatus::Unknown,
            file_obj_id: None,
        };
        let label = row.data_source.labelled_name();
        let name = row.case.display_name.clone();
        let value = AttributeValue::new(hash).with_instance(AttributeInstance::CentralRepo(
            CentralRepoInstance::new(row, "uuid-1", NodeKind::Case),
        ));
        (name, label, value)
    }

    fn tree() -> CaseTree {
        collate_by_case(vec![
            entry(COMMON, 1),
            entry(COMMON, 2),
            entry(COMMON, 3),
            entry(RARE, 1),
            entry(RARE, 2),
        ])
    }

    #[test]
    fn current_case_is_never_a_bucket() {
        let results = CaseResults::new(tree(), "Case 1", 0, CorrelationType::files());
        assert!(results.case("Case 1").is_none());
        assert!(results.current_case_reference().is_some());
        assert_eq!(
            results.buckets().keys().cloned().collect::<Vec<_>>(),
            vec!["Case 2".to_string(), "Case 3".to_string()]
        );
    }

    #[tokio::test]
    async fn zero_threshold_leaves_results_unchanged() {
        let store = store();
        let mut results = CaseResults::new(tree(), "Case 1", 0, CorrelationType::files());
        let before = results.summary();
        results.filter_metadata(Some(&store)).await;
        assert_eq!(results.summary(), before);
    }

    #[tokio::test]
    async fn foreign_branches_follow_the_reference() {
        let store = store();
        let mut results = CaseResults::new(tree(), "Case 1", 20, CorrelationType::files());
        results.filter_metadata(Some(&store)).await;

        assert_eq!(
            results.buckets().keys().cloned().collect::<Vec<_>>(),
            vec!["Case 2".to_string()]
        );
        let values = results
            .data_source_mut("Case 2", "ds2:2")
            .expect("ds2 branch")
            .materialize();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value(), RARE);
        // Substituted with the open case's own observation.
        assert_eq!(values[0].case_names(), "Case 1");
    }

    #[tokio::test]
    async fn missing_reference_empties_results() {
        let store = store();
        let mut results = CaseResults::new(tree(), "Case 9", 20, CorrelationType::files());
        results.filter_metadata(Some(&store)).await;
        assert!(results.is_empty());
    }
}

use std::collections::BTreeMap;

use crate::model::{AttributeValue, ValueAggregateList};

/// Case-view tree: case name, then data source label.
pub type CaseTree = BTreeMap<String, BTreeMap<String, ValueAggregateList>>;

/// Buckets values by the number of distinct data sources they span. Values
/// keep their input order inside a bucket.
pub fn collate_by_distinct_source_count(
    values: impl IntoIterator<Item = AttributeValue>,
) -> BTreeMap<usize, ValueAggregateList> {
    let mut buckets: BTreeMap<usize, ValueAggregateList> = BTreeMap::new();
    for value in values {
        buckets
            .entry(value.distinct_data_source_count())
            .or_default()
            .push(value);
    }
    buckets
}

/// Places each value under its case name and data source label.
pub fn collate_by_case(
    entries: impl IntoIterator<Item = (String, String, AttributeValue)>,
) -> CaseTree {
    let mut tree = CaseTree::new();
    for (case_name, data_source, value) in entries {
        tree.entry(case_name)
            .or_default()
            .entry(data_source)
            .or_default()
            .push(value);
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CaseInfo, FileRow};
    use crate::model::{AttributeInstance, CaseDbInstance, NodeKind};

    fn value(name: &str, data_sources: &[i64]) -> AttributeValue {
        let case = CaseInfo::new("uuid", "Case");
        let mut value = AttributeValue::new(name);
        for (idx, ds) in data_sources.iter().enumerate() {
            let row = FileRow {
                obj_id: idx as i64,
                name: "f".into(),
                md5: Some(name.into()),
                data_source_obj_id: *ds,
            };
            value.add_instance(AttributeInstance::CaseDb(CaseDbInstance::new(
                &row,
                name,
                &case,
                "ds",
                NodeKind::Count,
            )));
        }
        value
    }

    #[test]
    fn buckets_match_distinct_source_count() {
        let mut buckets = collate_by_distinct_source_count(vec![
            value("a", &[1, 2]),
            value("b", &[1, 2, 3]),
            value("c", &[3, 3, 4]),
        ]);

        assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        for (count, list) in buckets.iter_mut() {
            assert!(list.materialize().iter().all(|v| v.distinct_data_source_count() == *count));
        }
        assert_eq!(buckets[&2].value_names(), vec!["a", "c"]);
    }

    #[test]
    fn groups_by_case_then_source() {
        let tree = collate_by_case(vec![
            ("Case B".to_string(), "disk:1".to_string(), value("a", &[1])),
            ("Case A".to_string(), "phone:2".to_string(), value("a", &[2])),
            ("Case B".to_string(), "disk:1".to_string(), value("b", &[1])),
        ]);

        assert_eq!(tree.keys().collect::<Vec<_>>(), vec!["Case A", "Case B"]);
        assert_eq!(tree["Case B"]["disk:1"].len(), 2);
    }
}

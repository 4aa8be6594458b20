use std::collections::HashSet;

use crate::db::{CaseFileStore, StoreError};
use crate::model::value::AttributeValue;

#[derive(Debug, Clone)]
enum Buffer {
    Deferred(Vec<AttributeValue>),
    Materialized(Vec<AttributeValue>),
}

/// Values under one result node.
///
/// A list starts deferred: counting and membership checks read the backing
/// values without touching the case database. [`materialize`] flips it once,
/// and only a materialized list hands out values for per-instance work such
/// as file resolution.
///
/// [`materialize`]: ValueAggregateList::materialize
#[derive(Debug, Clone)]
pub struct ValueAggregateList {
    buffer: Buffer,
}

impl Default for ValueAggregateList {
    fn default() -> Self {
        Self::deferred(Vec::new())
    }
}

impl ValueAggregateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deferred(values: Vec<AttributeValue>) -> Self {
        Self {
            buffer: Buffer::Deferred(values),
        }
    }

    pub fn from_materialized(values: Vec<AttributeValue>) -> Self {
        Self {
            buffer: Buffer::Materialized(values),
        }
    }

    pub fn push(&mut self, value: AttributeValue) {
        self.backing_mut().push(value);
    }

    /// Deferred to materialized. Calling it again does nothing.
    pub fn materialize(&mut self) -> &[AttributeValue] {
        if let Buffer::Deferred(values) = &mut self.buffer {
            self.buffer = Buffer::Materialized(std::mem::take(values));
        }
        match &self.buffer {
            Buffer::Materialized(values) | Buffer::Deferred(values) => values,
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.buffer, Buffer::Materialized(_))
    }

    /// `None` until [`ValueAggregateList::materialize`] has run.
    pub fn materialized(&self) -> Option<&[AttributeValue]> {
        match &self.buffer {
            Buffer::Materialized(values) => Some(values),
            Buffer::Deferred(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.backing().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backing().is_empty()
    }

    /// Values in backing order, without materializing.
    pub fn value_names(&self) -> Vec<&str> {
        self.backing().iter().map(AttributeValue::value).collect()
    }

    /// Backing values for crate-internal bookkeeping (filtering, summaries)
    /// that never touches instance files.
    pub(crate) fn backing_values(&self) -> &[AttributeValue] {
        self.backing()
    }

    pub fn value_set(&self) -> HashSet<&str> {
        self.backing().iter().map(AttributeValue::value).collect()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.backing().iter().any(|v| v.value() == value)
    }

    /// Drops every entry for `value`. Returns whether anything was removed.
    pub fn remove(&mut self, value: &str) -> bool {
        let values = self.backing_mut();
        let before = values.len();
        values.retain(|v| v.value() != value);
        values.len() != before
    }

    /// Materializes, then resolves the backing file of every instance.
    /// Lookups are memoized per instance, so repeated calls are cheap.
    pub async fn resolve_files(&mut self, store: &dyn CaseFileStore) -> Result<usize, StoreError> {
        let mut resolved = 0;
        for value in self.materialize() {
            for instance in value.instances() {
                if instance.resolve_file(store).await?.is_some() {
                    resolved += 1;
                }
            }
        }
        Ok(resolved)
    }

    fn backing(&self) -> &Vec<AttributeValue> {
        match &self.buffer {
            Buffer::Deferred(values) | Buffer::Materialized(values) => values,
        }
    }

    fn backing_mut(&mut self) -> &mut Vec<AttributeValue> {
        match &mut self.buffer {
            Buffer::Deferred(values) | Buffer::Materialized(values) => values,
        }
    }
}

impl FromIterator<AttributeValue> for ValueAggregateList {
    fn from_iter<T: IntoIterator<Item = AttributeValue>>(iter: T) -> Self {
        Self::deferred(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryCaseStore;
    use crate::db::models::{CaseInfo, FileRow};
    use crate::model::instance::{AttributeInstance, CaseDbInstance, NodeKind};

    fn value(name: &str, obj_ids: &[i64]) -> AttributeValue {
        let case = CaseInfo::new("uuid", "Case");
        let mut value = AttributeValue::new(name);
        for obj_id in obj_ids {
            let row = FileRow {
                obj_id: *obj_id,
                name: format!("{name}.bin"),
                md5: Some(name.into()),
                data_source_obj_id: *obj_id,
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
    fn materialize_is_idempotent() {
        let mut list = ValueAggregateList::deferred(vec![value("a", &[1]), value("b", &[2])]);
        assert!(!list.is_materialized());
        assert!(list.materialized().is_none());

        let first: Vec<String> = list.materialize().iter().map(|v| v.value().to_string()).collect();
        let second: Vec<String> = list.materialize().iter().map(|v| v.value().to_string()).collect();

        assert!(list.is_materialized());
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn size_queries_do_not_materialize() {
        let list = ValueAggregateList::deferred(vec![value("a", &[1]), value("b", &[2])]);
        assert_eq!(list.len(), 2);
        assert!(list.value_set().contains("b"));
        assert!(list.contains("a"));
        assert!(!list.is_materialized());
    }

    #[test]
    fn remove_works_in_both_states() {
        let mut list: ValueAggregateList = vec![value("a", &[1]), value("b", &[2])]
            .into_iter()
            .collect();
        assert!(list.remove("a"));
        assert!(!list.remove("a"));
        list.materialize();
        assert!(list.remove("b"));
        assert!(list.is_empty());
        assert!(list.is_materialized());
    }

    #[test]
    fn deferred_list_hands_out_no_values() {
        let mut list = ValueAggregateList::deferred(vec![value("a", &[1])]);
        assert!(list.materialized().is_none());
        assert_eq!(list.value_names(), vec!["a"]);

        assert_eq!(list.materialize().len(), 1);
        assert_eq!(list.materialized().map(<[_]>::len), Some(1));
    }

    #[tokio::test]
    async fn resolve_files_materializes_first() {
        let mut store = MemoryCaseStore::new(CaseInfo::new("uuid", "Case"));
        store.add_data_source(1, "ds");
        store.add_file(1, "a.bin", "/", Some("a"), 1);

        let mut list = ValueAggregateList::deferred(vec![value("a", &[1, 2])]);
        let resolved = list.resolve_files(&store).await.expect("resolve");

        assert_eq!(resolved, 1);
        assert!(list.is_materialized());
        let values = list.materialized().expect("materialized");
        assert!(values[0].instances().iter().all(|i| i.is_resolved()));
    }
}

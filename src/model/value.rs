use std::collections::HashSet;
use std::sync::Arc;

use crate::db::{CaseFileStore, StoreError};
use crate::model::instance::AttributeInstance;

/// One distinct correlation value and every place it was seen.
///
/// Instances are shared behind `Arc`, so clones made while rebuilding result
/// trees keep the memoized file lookups of the original.
#[derive(Debug, Clone)]
pub struct AttributeValue {
    value: String,
    instances: Vec<Arc<AttributeInstance>>,
    /// File name tallies in first-seen order.
    file_name_frequency: Vec<(String, usize)>,
}

impl AttributeValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            instances: Vec::new(),
            file_name_frequency: Vec::new(),
        }
    }

    pub fn with_instance(mut self, instance: AttributeInstance) -> Self {
        self.add_instance(instance);
        self
    }

    pub fn add_instance(&mut self, instance: AttributeInstance) {
        let name = instance.file_name();
        if !name.is_empty() {
            match self
                .file_name_frequency
                .iter_mut()
                .find(|(seen, _)| seen == name)
            {
                Some((_, count)) => *count += 1,
                None => self.file_name_frequency.push((name.to_string(), 1)),
            }
        }
        self.instances.push(Arc::new(instance));
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn instances(&self) -> &[Arc<AttributeInstance>] {
        &self.instances
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Distinct data sources across every instance, in any case.
    pub fn distinct_data_source_count(&self) -> usize {
        self.instances
            .iter()
            .map(|i| i.data_source_key())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Most frequent file name; the earliest seen wins a tie. Falls back to
    /// the value itself when no instance carried a name.
    pub fn display_name(&self) -> &str {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.file_name_frequency {
            if best.is_none_or(|(_, count)| entry.1 > *count) {
                best = Some(entry);
            }
        }
        best.map(|(name, _)| name.as_str()).unwrap_or(&self.value)
    }

    pub fn case_names(&self) -> String {
        join_distinct(self.instances.iter().map(|i| i.case_name()))
    }

    pub fn data_source_names(&self) -> String {
        join_distinct(self.instances.iter().map(|i| i.data_source_name()))
    }

    /// Distinct data sources among instances whose file resolves in the open
    /// case. Instances from other cases, or with no resolvable file, do not
    /// count.
    pub async fn data_source_count_in_current_case(
        &self,
        store: &dyn CaseFileStore,
    ) -> Result<usize, StoreError> {
        let mut sources = HashSet::new();
        for instance in &self.instances {
            if let Some(file) = instance.resolve_file(store).await? {
                sources.insert(file.data_source_obj_id);
            }
        }
        Ok(sources.len())
    }
}

fn join_distinct<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen.join(", ")
}

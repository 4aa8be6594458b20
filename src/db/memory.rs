//! In-process stores with the same contracts as the Postgres ones.
//!
//! Both can be told to fail as if their database went away, which is how the
//! search tests exercise the fatal and fail-open paths.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use correlation_types::{
    CorrelationCase, CorrelationDataSource, CorrelationRow, CorrelationType, KnownStatus,
};

use crate::db::models::{CaseInfo, FileHandle, FileRow};
use crate::db::{CaseFileStore, CorrelationStore, StoreError};
use crate::query::FileQuery;

fn ensure_online(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unreachable(format!("{what} is offline")));
    }
    Ok(())
}

#[derive(Debug)]
pub struct MemoryCaseStore {
    case: CaseInfo,
    data_sources: BTreeMap<i64, String>,
    files: Vec<FileHandle>,
    offline: AtomicBool,
}

impl MemoryCaseStore {
    pub fn new(case: CaseInfo) -> Self {
        Self {
            case,
            data_sources: BTreeMap::new(),
            files: Vec::new(),
            offline: AtomicBool::new(false),
        }
    }

    pub fn add_data_source(&mut self, obj_id: i64, name: &str) {
        self.data_sources.insert(obj_id, name.to_string());
    }

    pub fn add_file(
        &mut self,
        obj_id: i64,
        name: &str,
        parent_path: &str,
        md5: Option<&str>,
        data_source_obj_id: i64,
    ) {
        self.insert_file(FileHandle {
            obj_id,
            name: name.to_string(),
            parent_path: parent_path.to_string(),
            md5: md5.map(str::to_string),
            mime_type: None,
            known: KnownStatus::Unknown,
            data_source_obj_id,
        });
    }

    pub fn insert_file(&mut self, file: FileHandle) {
        self.files.retain(|f| f.obj_id != file.obj_id);
        self.files.push(file);
        self.files.sort_by_key(|f| f.obj_id);
    }

    pub fn set_known(&mut self, obj_id: i64, known: KnownStatus) {
        if let Some(file) = self.files.iter_mut().find(|f| f.obj_id == obj_id) {
            file.known = known;
        }
    }

    pub fn set_mime_type(&mut self, obj_id: i64, mime_type: &str) {
        if let Some(file) = self.files.iter_mut().find(|f| f.obj_id == obj_id) {
            file.mime_type = Some(mime_type.to_string());
        }
    }

    pub fn set_unreachable(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Files passing the known-status, mime and data source restrictions
    /// that carry a hash.
    fn admitted<'a>(&'a self, query: &'a FileQuery) -> impl Iterator<Item = (&'a FileHandle, &'a str)> {
        self.files.iter().filter_map(move |file| {
            let md5 = file.md5.as_deref()?;
            query
                .admits(file.known, file.mime_type.as_deref())
                .then_some((file, md5))
        })
    }
}

#[async_trait]
impl CaseFileStore for MemoryCaseStore {
    fn case_info(&self) -> &CaseInfo {
        &self.case
    }

    async fn data_sources(&self) -> Result<BTreeMap<i64, String>, StoreError> {
        ensure_online(&self.offline, "case database")?;
        Ok(self.data_sources.clone())
    }

    async fn query_files(&self, query: &FileQuery) -> Result<Vec<FileRow>, StoreError> {
        ensure_online(&self.offline, "case database")?;

        let mut sources: HashMap<&str, HashSet<i64>> = HashMap::new();
        for (file, md5) in self.admitted(query) {
            sources.entry(md5).or_default().insert(file.data_source_obj_id);
        }
        let shared: HashSet<&str> = sources
            .into_iter()
            .filter(|(_, set)| {
                set.len() > 1 && query.data_source.is_none_or(|ds| set.contains(&ds))
            })
            .map(|(md5, _)| md5)
            .collect();

        let mut rows: Vec<FileRow> = self
            .admitted(query)
            .filter(|(_, md5)| shared.contains(md5))
            .map(|(file, md5)| FileRow {
                obj_id: file.obj_id,
                name: file.name.clone(),
                md5: Some(md5.to_string()),
                data_source_obj_id: file.data_source_obj_id,
            })
            .collect();
        rows.sort_by(|a, b| (&a.md5, a.obj_id).cmp(&(&b.md5, b.obj_id)));
        Ok(rows)
    }

    async fn candidate_hashes(&self, query: &FileQuery) -> Result<Vec<String>, StoreError> {
        ensure_online(&self.offline, "case database")?;
        let hashes: BTreeSet<&str> = self
            .admitted(query)
            .filter(|(file, _)| query.data_source.is_none_or(|ds| file.data_source_obj_id == ds))
            .map(|(_, md5)| md5)
            .collect();
        Ok(hashes.into_iter().map(str::to_string).collect())
    }

    async fn file_by_id(&self, obj_id: i64) -> Result<Option<FileHandle>, StoreError> {
        ensure_online(&self.offline, "case database")?;
        Ok(self.files.iter().find(|f| f.obj_id == obj_id).cloned())
    }

    async fn files_by_name_and_parent_path(
        &self,
        name: &str,
        parent_path: &str,
        data_source_obj_id: i64,
    ) -> Result<Vec<FileHandle>, StoreError> {
        ensure_online(&self.offline, "case database")?;
        Ok(self
            .files
            .iter()
            .filter(|f| {
                f.data_source_obj_id == data_source_obj_id
                    && f.name.eq_ignore_ascii_case(name)
                    && f.parent_path.eq_ignore_ascii_case(parent_path)
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
struct StoredInstance {
    id: i64,
    type_id: i32,
    case_id: i64,
    data_source_id: i64,
    value: String,
    file_path: String,
    known_status: KnownStatus,
    file_obj_id: Option<i64>,
}

#[derive(Debug)]
pub struct MemoryCorrelationStore {
    cases: BTreeMap<i64, CorrelationCase>,
    data_sources: BTreeMap<i64, CorrelationDataSource>,
    types: Vec<CorrelationType>,
    instances: Vec<StoredInstance>,
    failing_counts: HashSet<String>,
    offline: AtomicBool,
}

impl Default for MemoryCorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCorrelationStore {
    /// An empty repository with the default correlation types.
    pub fn new() -> Self {
        Self {
            cases: BTreeMap::new(),
            data_sources: BTreeMap::new(),
            types: CorrelationType::defaults(),
            instances: Vec::new(),
            failing_counts: HashSet::new(),
            offline: AtomicBool::new(false),
        }
    }

    pub fn add_case(&mut self, id: i64, case_uuid: &str, display_name: &str) -> CorrelationCase {
        let case = CorrelationCase {
            id,
            case_uuid: case_uuid.to_string(),
            display_name: display_name.to_string(),
        };
        self.cases.insert(id, case.clone());
        case
    }

    pub fn add_data_source(
        &mut self,
        id: i64,
        case_id: i64,
        name: &str,
        data_source_obj_id: Option<i64>,
    ) -> CorrelationDataSource {
        let data_source = CorrelationDataSource {
            id,
            case_id,
            device_id: format!("device-{id}"),
            name: name.to_string(),
            data_source_obj_id,
        };
        self.data_sources.insert(id, data_source.clone());
        data_source
    }

    pub fn add_instance(
        &mut self,
        type_id: i32,
        case_id: i64,
        data_source_id: i64,
        value: &str,
        file_path: &str,
    ) -> i64 {
        self.add_instance_with(
            type_id,
            case_id,
            data_source_id,
            value,
            file_path,
            KnownStatus::Unknown,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_instance_with(
        &mut self,
        type_id: i32,
        case_id: i64,
        data_source_id: i64,
        value: &str,
        file_path: &str,
        known_status: KnownStatus,
        file_obj_id: Option<i64>,
    ) -> i64 {
        let id = self.instances.len() as i64 + 1;
        self.instances.push(StoredInstance {
            id,
            type_id,
            case_id,
            data_source_id,
            value: value.to_string(),
            file_path: file_path.to_string(),
            known_status,
            file_obj_id,
        });
        id
    }

    /// Makes the per-value data source count fail for `value`.
    pub fn fail_count_for(&mut self, value: &str) {
        self.failing_counts.insert(value.to_string());
    }

    pub fn set_unreachable(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        ensure_online(&self.offline, "central repository")
    }

    fn row(&self, stored: &StoredInstance) -> Result<CorrelationRow, StoreError> {
        let case = self
            .cases
            .get(&stored.case_id)
            .ok_or_else(|| StoreError::NotFound(format!("case {}", stored.case_id)))?;
        let data_source = self
            .data_sources
            .get(&stored.data_source_id)
            .ok_or_else(|| StoreError::NotFound(format!("data source {}", stored.data_source_id)))?;
        Ok(CorrelationRow {
            id: stored.id,
            correlation_type_id: stored.type_id,
            value: stored.value.clone(),
            case: case.clone(),
            data_source: data_source.clone(),
            file_path: stored.file_path.clone(),
            known_status: stored.known_status,
            file_obj_id: stored.file_obj_id,
        })
    }

    fn of_type<'a>(
        &'a self,
        correlation_type: &'a CorrelationType,
    ) -> impl Iterator<Item = &'a StoredInstance> {
        self.instances
            .iter()
            .filter(move |i| i.type_id == correlation_type.id)
    }
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn cases(&self) -> Result<Vec<CorrelationCase>, StoreError> {
        self.check()?;
        Ok(self.cases.values().cloned().collect())
    }

    async fn case_by_uuid(&self, case_uuid: &str) -> Result<Option<CorrelationCase>, StoreError> {
        self.check()?;
        Ok(self
            .cases
            .values()
            .find(|case| case.case_uuid == case_uuid)
            .cloned())
    }

    async fn data_sources(&self) -> Result<Vec<CorrelationDataSource>, StoreError> {
        self.check()?;
        Ok(self.data_sources.values().cloned().collect())
    }

    async fn defined_types(&self) -> Result<Vec<CorrelationType>, StoreError> {
        self.check()?;
        Ok(self.types.clone())
    }

    async fn count_unique_data_sources(&self) -> Result<i64, StoreError> {
        self.check()?;
        Ok(self.data_sources.len() as i64)
    }

    async fn count_unique_case_data_sources_with_value(
        &self,
        correlation_type: &CorrelationType,
        value: &str,
    ) -> Result<i64, StoreError> {
        self.check()?;
        if self.failing_counts.contains(value) {
            return Err(StoreError::Query(format!("count failed for {value}")));
        }
        let pairs: HashSet<(i64, i64)> = self
            .of_type(correlation_type)
            .filter(|i| i.value == value)
            .map(|i| (i.case_id, i.data_source_id))
            .collect();
        Ok(pairs.len() as i64)
    }

    async fn instances_for_values(
        &self,
        correlation_type: &CorrelationType,
        values: &[String],
        case_ids: Option<&[i64]>,
    ) -> Result<Vec<CorrelationRow>, StoreError> {
        self.check()?;
        let wanted: HashSet<&str> = values.iter().map(String::as_str).collect();
        let mut rows = self
            .of_type(correlation_type)
            .filter(|i| wanted.contains(i.value.as_str()))
            .filter(|i| case_ids.is_none_or(|ids| ids.contains(&i.case_id)))
            .map(|i| self.row(i))
            .collect::<Result<Vec<_>, _>>()?;
        rows.sort_by(|a, b| (&a.value, a.id).cmp(&(&b.value, b.id)));
        Ok(rows)
    }

    async fn values_for_case(
        &self,
        correlation_type: &CorrelationType,
        case_id: i64,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let values: BTreeSet<&str> = self
            .of_type(correlation_type)
            .filter(|i| i.case_id == case_id && i.known_status != KnownStatus::Known)
            .map(|i| i.value.as_str())
            .collect();
        Ok(values.into_iter().map(str::to_string).collect())
    }

    async fn instance_by_id(
        &self,
        correlation_type: &CorrelationType,
        id: i64,
    ) -> Result<Option<CorrelationRow>, StoreError> {
        self.check()?;
        self.of_type(correlation_type)
            .find(|i| i.id == id)
            .map(|i| self.row(i))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use correlation_types::FILES_TYPE_ID;

    const A: &str = "5d41402abc4b2a76b9719d911017c592";
    const B: &str = "7d793037a0760186574b0282f2f435e7";

    #[tokio::test]
    async fn query_files_keeps_hashes_on_two_sources() {
        let mut store = MemoryCaseStore::new(CaseInfo::new("uuid", "Case"));
        store.add_file(1, "a", "/", Some(A), 1);
        store.add_file(2, "a", "/", Some(A), 1);
        store.add_file(3, "a", "/", Some(A), 2);
        store.add_file(4, "b", "/", Some(B), 1);
        store.add_file(5, "b", "/", Some(B), 1);
        store.add_file(6, "n", "/", None, 2);

        let rows = store.query_files(&FileQuery::default()).await.expect("query");
        assert_eq!(rows.iter().map(|r| r.obj_id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let hashes = store.candidate_hashes(&FileQuery::default()).await.expect("hashes");
        assert_eq!(hashes, vec![A.to_string(), B.to_string()]);
    }

    #[tokio::test]
    async fn instance_lookup_respects_case_restriction() {
        let mut repo = MemoryCorrelationStore::new();
        repo.add_case(1, "u1", "One");
        repo.add_case(2, "u2", "Two");
        repo.add_case(3, "u3", "Three");
        repo.add_data_source(1, 1, "d1", Some(1));
        repo.add_data_source(2, 2, "d2", Some(1));
        repo.add_data_source(3, 3, "d3", Some(1));
        repo.add_instance(FILES_TYPE_ID, 1, 1, A, "/a");
        repo.add_instance(FILES_TYPE_ID, 2, 2, A, "/a");
        let third = repo.add_instance(FILES_TYPE_ID, 3, 3, A, "/a");

        let files = CorrelationType::files();
        let all = repo
            .instances_for_values(&files, &[A.to_string()], None)
            .await
            .expect("rows");
        assert_eq!(all.len(), 3);

        let restricted = repo
            .instances_for_values(&files, &[A.to_string()], Some(&[1, 2]))
            .await
            .expect("rows");
        assert_eq!(restricted.iter().map(|r| r.case.id).collect::<Vec<_>>(), vec![1, 2]);

        let row = repo.instance_by_id(&files, third).await.expect("lookup");
        assert_eq!(row.map(|r| r.case.display_name), Some("Three".to_string()));
        assert_eq!(
            repo.count_unique_case_data_sources_with_value(&files, A)
                .await
                .expect("count"),
            3
        );
    }

    #[tokio::test]
    async fn offline_store_reports_unreachable() {
        let repo = MemoryCorrelationStore::new();
        repo.set_unreachable(true);
        let err = repo.count_unique_data_sources().await.expect_err("offline");
        assert!(err.is_unreachable());
    }
}

use correlation_types::{CorrelationRow, KnownStatus};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::db::models::{CaseInfo, FileHandle, FileRow};
use crate::db::{CaseFileStore, StoreError};

/// Which result view an instance was collated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Count,
    Case,
}

/// Identity of a data source across cases. Object ids are only unique inside
/// one case database, so the case uuid is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataSourceKey {
    pub case_uuid: String,
    pub data_source_id: i64,
}

/// Leaf handed to a result consumer for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayLeaf {
    pub value: String,
    pub case_name: String,
    pub data_source_name: String,
    pub path: String,
    pub known: KnownStatus,
    pub node_kind: NodeKind,
    pub obj_id: Option<i64>,
}

/// An occurrence found directly in the open case's file table.
#[derive(Debug)]
pub struct CaseDbInstance {
    obj_id: i64,
    value: String,
    file_name: String,
    case_uuid: String,
    case_name: String,
    data_source_obj_id: i64,
    data_source_name: String,
    node_kind: NodeKind,
    file: OnceCell<Option<FileHandle>>,
}

impl CaseDbInstance {
    pub fn new(
        row: &FileRow,
        value: impl Into<String>,
        case: &CaseInfo,
        data_source_name: impl Into<String>,
        node_kind: NodeKind,
    ) -> Self {
        Self {
            obj_id: row.obj_id,
            value: value.into(),
            file_name: row.name.clone(),
            case_uuid: case.uuid.clone(),
            case_name: case.display_name.clone(),
            data_source_obj_id: row.data_source_obj_id,
            data_source_name: data_source_name.into(),
            node_kind,
            file: OnceCell::new(),
        }
    }

    pub fn obj_id(&self) -> i64 {
        self.obj_id
    }
}

/// An occurrence recorded in the central repository. It may belong to any
/// case, so the backing file is only resolvable when the row's case is the
/// open one.
#[derive(Debug)]
pub struct CentralRepoInstance {
    row: CorrelationRow,
    current_case_uuid: String,
    node_kind: NodeKind,
    file: OnceCell<Option<FileHandle>>,
}

impl CentralRepoInstance {
    pub fn new(row: CorrelationRow, current_case_uuid: impl Into<String>, node_kind: NodeKind) -> Self {
        Self {
            row,
            current_case_uuid: current_case_uuid.into(),
            node_kind,
            file: OnceCell::new(),
        }
    }

    pub fn row(&self) -> &CorrelationRow {
        &self.row
    }

    fn in_current_case(&self) -> bool {
        self.row.case.case_uuid == self.current_case_uuid
    }

    async fn lookup_file(&self, store: &dyn CaseFileStore) -> Result<Option<FileHandle>, StoreError> {
        if !self.in_current_case() {
            return Ok(None);
        }

        if let Some(obj_id) = self.row.file_obj_id {
            if let Some(file) = store.file_by_id(obj_id).await? {
                return Ok(Some(file));
            }
        }

        let Some(data_source_obj_id) = self.row.data_source.data_source_obj_id else {
            return Ok(None);
        };

        let matches = store
            .files_by_name_and_parent_path(
                self.row.file_name(),
                self.row.parent_path(),
                data_source_obj_id,
            )
            .await?;

        if matches.len() > 1 {
            warn!(
                stage = "resolve",
                event = "resolve.ambiguous",
                instance_id = self.row.id,
                file_path = %self.row.file_path,
                match_count = matches.len(),
                "multiple files match name and parent path; using the first"
            );
        }

        Ok(matches.into_iter().next())
    }
}

#[derive(Debug)]
pub enum AttributeInstance {
    CaseDb(CaseDbInstance),
    CentralRepo(CentralRepoInstance),
}

impl AttributeInstance {
    pub fn value(&self) -> &str {
        match self {
            AttributeInstance::CaseDb(i) => &i.value,
            AttributeInstance::CentralRepo(i) => &i.row.value,
        }
    }

    pub fn case_name(&self) -> &str {
        match self {
            AttributeInstance::CaseDb(i) => &i.case_name,
            AttributeInstance::CentralRepo(i) => &i.row.case.display_name,
        }
    }

    pub fn data_source_name(&self) -> &str {
        match self {
            AttributeInstance::CaseDb(i) => &i.data_source_name,
            AttributeInstance::CentralRepo(i) => &i.row.data_source.name,
        }
    }

    pub fn data_source_key(&self) -> DataSourceKey {
        match self {
            AttributeInstance::CaseDb(i) => DataSourceKey {
                case_uuid: i.case_uuid.clone(),
                data_source_id: i.data_source_obj_id,
            },
            AttributeInstance::CentralRepo(i) => DataSourceKey {
                case_uuid: i.row.case.case_uuid.clone(),
                data_source_id: i.row.data_source.id,
            },
        }
    }

    /// File name as observed when the instance was collated.
    pub fn file_name(&self) -> &str {
        match self {
            AttributeInstance::CaseDb(i) => &i.file_name,
            AttributeInstance::CentralRepo(i) => i.row.file_name(),
        }
    }

    pub fn node_kind(&self) -> NodeKind {
        match self {
            AttributeInstance::CaseDb(i) => i.node_kind,
            AttributeInstance::CentralRepo(i) => i.node_kind,
        }
    }

    /// Backing file in the open case, looked up at most once. Store failures
    /// are not cached.
    pub async fn resolve_file(
        &self,
        store: &dyn CaseFileStore,
    ) -> Result<Option<&FileHandle>, StoreError> {
        let cached = match self {
            AttributeInstance::CaseDb(i) => {
                i.file
                    .get_or_try_init(|| async { store.file_by_id(i.obj_id).await })
                    .await?
            }
            AttributeInstance::CentralRepo(i) => {
                i.file.get_or_try_init(|| i.lookup_file(store)).await?
            }
        };
        Ok(cached.as_ref())
    }

    /// Whether a file lookup has already completed.
    pub fn is_resolved(&self) -> bool {
        match self {
            AttributeInstance::CaseDb(i) => i.file.initialized(),
            AttributeInstance::CentralRepo(i) => i.file.initialized(),
        }
    }

    /// Zero or one leaf for a consumer. Case database instances whose file is
    /// gone produce nothing; central repository rows always produce a leaf.
    pub async fn display_leaf(
        &self,
        store: &dyn CaseFileStore,
    ) -> Result<Option<DisplayLeaf>, StoreError> {
        let file = self.resolve_file(store).await?;
        let leaf = match (self, file) {
            (AttributeInstance::CaseDb(_), None) => None,
            (AttributeInstance::CaseDb(i), Some(file)) => Some(DisplayLeaf {
                value: i.value.clone(),
                case_name: i.case_name.clone(),
                data_source_name: i.data_source_name.clone(),
                path: file.unique_path(),
                known: file.known,
                node_kind: i.node_kind,
                obj_id: Some(file.obj_id),
            }),
            (AttributeInstance::CentralRepo(i), file) => Some(DisplayLeaf {
                value: i.row.value.clone(),
                case_name: i.row.case.display_name.clone(),
                data_source_name: i.row.data_source.name.clone(),
                path: file
                    .map(FileHandle::unique_path)
                    .unwrap_or_else(|| i.row.file_path.clone()),
                known: i.row.known_status,
                node_kind: i.node_kind,
                obj_id: file.map(|f| f.obj_id),
            }),
        };
        Ok(leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryCaseStore;
    use correlation_types::{CorrelationCase, CorrelationDataSource, FILES_TYPE_ID};

    const HASH: &str = "5d41402abc4b2a76b9719d911017c592";

    fn case_store() -> MemoryCaseStore {
        let mut store = MemoryCaseStore::new(CaseInfo::new("uuid-current", "Current"));
        store.add_data_source(10, "laptop.e01");
        store.add_file(100, "hello.txt", "/docs/", Some(HASH), 10);
        store.add_file(101, "dup.txt", "/docs/", Some(HASH), 10);
        store.add_file(102, "dup.txt", "/docs/", Some(HASH), 10);
        store
    }

    fn repo_row(case_uuid: &str, path: &str, file_obj_id: Option<i64>) -> CorrelationRow {
        CorrelationRow {
            id: 7,
            correlation_type_id: FILES_TYPE_ID,
            value: HASH.into(),
            case: CorrelationCase {
                id: 1,
                case_uuid: case_uuid.into(),
                display_name: "Some Case".into(),
            },
            data_source: CorrelationDataSource {
                id: 3,
                case_id: 1,
                device_id: "dev".into(),
                name: "laptop.e01".into(),
                data_source_obj_id: Some(10),
            },
            file_path: path.into(),
            known_status: KnownStatus::Unknown,
            file_obj_id,
        }
    }

    #[tokio::test]
    async fn case_db_instance_resolves_once() {
        let store = case_store();
        let row = FileRow {
            obj_id: 100,
            name: "hello.txt".into(),
            md5: Some(HASH.into()),
            data_source_obj_id: 10,
        };
        let instance = AttributeInstance::CaseDb(CaseDbInstance::new(
            &row,
            HASH,
            store.case_info(),
            "laptop.e01",
            NodeKind::Count,
        ));

        assert!(!instance.is_resolved());
        let file = instance.resolve_file(&store).await.expect("resolve");
        assert_eq!(file.map(|f| f.obj_id), Some(100));

        store.set_unreachable(true);
        let again = instance.resolve_file(&store).await.expect("memoized");
        assert_eq!(again.map(|f| f.obj_id), Some(100));
    }

    #[tokio::test]
    async fn foreign_case_rows_never_resolve() {
        let store = case_store();
        let instance = AttributeInstance::CentralRepo(CentralRepoInstance::new(
            repo_row("uuid-other", "/docs/hello.txt", Some(100)),
            "uuid-current",
            NodeKind::Case,
        ));

        assert_eq!(instance.resolve_file(&store).await.expect("resolve"), None);
        let leaf = instance
            .display_leaf(&store)
            .await
            .expect("leaf")
            .expect("central repository rows always have a leaf");
        assert_eq!(leaf.path, "/docs/hello.txt");
        assert_eq!(leaf.obj_id, None);
    }

    #[tokio::test]
    async fn falls_back_to_name_and_path() {
        let store = case_store();
        let instance = AttributeInstance::CentralRepo(CentralRepoInstance::new(
            repo_row("uuid-current", "/DOCS/Hello.txt", None),
            "uuid-current",
            NodeKind::Count,
        ));

        let file = instance.resolve_file(&store).await.expect("resolve");
        assert_eq!(file.map(|f| f.obj_id), Some(100));
    }

    #[tokio::test]
    async fn ambiguous_match_takes_first() {
        let store = case_store();
        let instance = AttributeInstance::CentralRepo(CentralRepoInstance::new(
            repo_row("uuid-current", "/docs/dup.txt", Some(999)),
            "uuid-current",
            NodeKind::Count,
        ));

        let file = instance.resolve_file(&store).await.expect("resolve");
        assert_eq!(file.map(|f| f.obj_id), Some(101));
    }

    #[tokio::test]
    async fn missing_case_file_has_no_leaf() {
        let store = case_store();
        let row = FileRow {
            obj_id: 555,
            name: "gone.txt".into(),
            md5: Some(HASH.into()),
            data_source_obj_id: 10,
        };
        let instance = AttributeInstance::CaseDb(CaseDbInstance::new(
            &row,
            HASH,
            store.case_info(),
            "laptop.e01",
            NodeKind::Count,
        ));

        assert_eq!(instance.display_leaf(&store).await.expect("leaf"), None);
    }

    #[tokio::test]
    async fn store_failure_is_not_memoized() {
        let store = case_store();
        let instance = AttributeInstance::CentralRepo(CentralRepoInstance::new(
            repo_row("uuid-current", "/docs/hello.txt", Some(100)),
            "uuid-current",
            NodeKind::Count,
        ));

        store.set_unreachable(true);
        assert!(instance.resolve_file(&store).await.is_err());
        assert!(!instance.is_resolved());

        store.set_unreachable(false);
        assert!(instance.resolve_file(&store).await.expect("resolve").is_some());
    }
}

use correlation_types::KnownStatus;
use serde::{Deserialize, Serialize};

/// Identity of the case whose database is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseInfo {
    pub uuid: String,
    pub display_name: String,
}

impl CaseInfo {
    pub fn new(uuid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            display_name: display_name.into(),
        }
    }
}

/// A row produced by the intra-case file query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct FileRow {
    pub obj_id: i64,
    pub name: String,
    pub md5: Option<String>,
    pub data_source_obj_id: i64,
}

/// A file resolved from the case database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    pub obj_id: i64,
    pub name: String,
    pub parent_path: String,
    pub md5: Option<String>,
    pub mime_type: Option<String>,
    pub known: KnownStatus,
    pub data_source_obj_id: i64,
}

impl FileHandle {
    pub fn unique_path(&self) -> String {
        format!("{}{}", self.parent_path, self.name)
    }
}

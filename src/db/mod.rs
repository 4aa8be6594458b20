pub mod memory;
pub mod models;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use correlation_types::{CorrelationCase, CorrelationDataSource, CorrelationRow, CorrelationType};
use thiserror::Error;

use crate::db::models::{CaseInfo, FileHandle, FileRow};
use crate::query::FileQuery;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, StoreError::Unreachable(_))
    }
}

/// Read-only view of the open case's database.
#[async_trait]
pub trait CaseFileStore: Send + Sync {
    fn case_info(&self) -> &CaseInfo;

    /// Data source object id to display name, for every data source in the case.
    async fn data_sources(&self) -> Result<BTreeMap<i64, String>, StoreError>;

    /// Files whose hash is shared by more than one data source, per `query`.
    /// Rows are ordered by hash, then object id.
    async fn query_files(&self, query: &FileQuery) -> Result<Vec<FileRow>, StoreError>;

    /// Distinct hashes of files passing `query`'s known-status and mime
    /// restrictions, ascending.
    async fn candidate_hashes(&self, query: &FileQuery) -> Result<Vec<String>, StoreError>;

    async fn file_by_id(&self, obj_id: i64) -> Result<Option<FileHandle>, StoreError>;

    /// Case-insensitive lookup by name and parent path inside one data
    /// source, ordered by object id.
    async fn files_by_name_and_parent_path(
        &self,
        name: &str,
        parent_path: &str,
        data_source_obj_id: i64,
    ) -> Result<Vec<FileHandle>, StoreError>;
}

/// Read-only view of the central repository aggregating observations across
/// cases.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn cases(&self) -> Result<Vec<CorrelationCase>, StoreError>;
    async fn case_by_uuid(&self, case_uuid: &str) -> Result<Option<CorrelationCase>, StoreError>;
    async fn data_sources(&self) -> Result<Vec<CorrelationDataSource>, StoreError>;
    async fn defined_types(&self) -> Result<Vec<CorrelationType>, StoreError>;

    async fn count_unique_data_sources(&self) -> Result<i64, StoreError>;

    /// Distinct (case, data source) pairs holding an already normalized value.
    async fn count_unique_case_data_sources_with_value(
        &self,
        correlation_type: &CorrelationType,
        value: &str,
    ) -> Result<i64, StoreError>;

    /// Every instance row matching one of `values`, optionally limited to
    /// `case_ids`. Rows are ordered by value, then row id.
    async fn instances_for_values(
        &self,
        correlation_type: &CorrelationType,
        values: &[String],
        case_ids: Option<&[i64]>,
    ) -> Result<Vec<CorrelationRow>, StoreError>;

    /// Distinct values of one type observed in a case, excluding rows marked
    /// known.
    async fn values_for_case(
        &self,
        correlation_type: &CorrelationType,
        case_id: i64,
    ) -> Result<Vec<String>, StoreError>;

    async fn instance_by_id(
        &self,
        correlation_type: &CorrelationType,
        id: i64,
    ) -> Result<Option<CorrelationRow>, StoreError>;
}

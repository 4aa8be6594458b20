use std::collections::BTreeMap;

use async_trait::async_trait;
use correlation_types::{
    CorrelationCase, CorrelationDataSource, CorrelationRow, CorrelationType, KnownStatus,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::db::models::{CaseInfo, FileHandle, FileRow};
use crate::db::{CaseFileStore, CorrelationStore, StoreError};
use crate::query::FileQuery;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unreachable(err.to_string()),
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

const FILE_COLUMNS: &str =
    "obj_id, name, parent_path, md5, mime_type, known, data_source_obj_id";

#[derive(sqlx::FromRow)]
struct FileRecord {
    obj_id: i64,
    name: String,
    parent_path: Option<String>,
    md5: Option<String>,
    mime_type: Option<String>,
    known: Option<i32>,
    data_source_obj_id: i64,
}

impl From<FileRecord> for FileHandle {
    fn from(record: FileRecord) -> Self {
        FileHandle {
            obj_id: record.obj_id,
            name: record.name,
            parent_path: record.parent_path.unwrap_or_default(),
            md5: record.md5,
            mime_type: record.mime_type,
            known: KnownStatus::from_db(record.known),
            data_source_obj_id: record.data_source_obj_id,
        }
    }
}

/// Hash present, not known-good, and inside the mime allow-list if any.
fn push_file_predicate(qb: &mut QueryBuilder<'_, Postgres>, query: &FileQuery) {
    qb.push(" WHERE md5 IS NOT NULL AND (known IS NULL OR known <> ");
    qb.push_bind(KnownStatus::Known.as_db());
    qb.push(")");
    if let Some(types) = &query.mime_types {
        qb.push(" AND mime_type = ANY(");
        qb.push_bind(types.iter().cloned().collect::<Vec<String>>());
        qb.push(")");
    }
}

/// Case database reader over `tsk_files` and `data_source_info`.
#[derive(Clone)]
pub struct PgCaseStore {
    pool: PgPool,
    case: CaseInfo,
}

impl PgCaseStore {
    pub fn new(pool: PgPool, case: CaseInfo) -> Self {
        Self { pool, case }
    }
}

#[async_trait]
impl CaseFileStore for PgCaseStore {
    fn case_info(&self) -> &CaseInfo {
        &self.case
    }

    async fn data_sources(&self) -> Result<BTreeMap<i64, String>, StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT obj_id, display_name FROM data_source_info ORDER BY obj_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn query_files(&self, query: &FileQuery) -> Result<Vec<FileRow>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT obj_id, name, md5, data_source_obj_id FROM tsk_files");
        push_file_predicate(&mut qb, query);
        qb.push(" AND md5 IN (SELECT md5 FROM tsk_files");
        push_file_predicate(&mut qb, query);
        qb.push(" GROUP BY md5 HAVING COUNT(DISTINCT data_source_obj_id) > 1");
        if let Some(data_source) = query.data_source {
            qb.push(" AND COUNT(*) FILTER (WHERE data_source_obj_id = ");
            qb.push_bind(data_source);
            qb.push(") > 0");
        }
        qb.push(") ORDER BY md5, obj_id");

        let rows = qb.build_query_as::<FileRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn candidate_hashes(&self, query: &FileQuery) -> Result<Vec<String>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT DISTINCT md5 FROM tsk_files");
        push_file_predicate(&mut qb, query);
        if let Some(data_source) = query.data_source {
            qb.push(" AND data_source_obj_id = ");
            qb.push_bind(data_source);
        }
        qb.push(" ORDER BY md5");

        let hashes = qb
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes)
    }

    async fn file_by_id(&self, obj_id: i64) -> Result<Option<FileHandle>, StoreError> {
        let record: Option<FileRecord> = sqlx::query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM tsk_files WHERE obj_id = $1"
        ))
        .bind(obj_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(FileHandle::from))
    }

    async fn files_by_name_and_parent_path(
        &self,
        name: &str,
        parent_path: &str,
        data_source_obj_id: i64,
    ) -> Result<Vec<FileHandle>, StoreError> {
        let records: Vec<FileRecord> = sqlx::query_as(&format!(
            "SELECT {FILE_COLUMNS} FROM tsk_files \
             WHERE LOWER(name) = LOWER($1) \
               AND LOWER(parent_path) = LOWER($2) \
               AND data_source_obj_id = $3 \
             ORDER BY obj_id"
        ))
        .bind(name)
        .bind(parent_path)
        .bind(data_source_obj_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(FileHandle::from).collect())
    }
}

#[derive(sqlx::FromRow)]
struct CaseRecord {
    id: i64,
    case_uid: String,
    case_name: String,
}

impl From<CaseRecord> for CorrelationCase {
    fn from(record: CaseRecord) -> Self {
        CorrelationCase {
            id: record.id,
            case_uuid: record.case_uid,
            display_name: record.case_name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DataSourceRecord {
    id: i64,
    case_id: i64,
    device_id: String,
    name: String,
    datasource_obj_id: Option<i64>,
}

impl From<DataSourceRecord> for CorrelationDataSource {
    fn from(record: DataSourceRecord) -> Self {
        CorrelationDataSource {
            id: record.id,
            case_id: record.case_id,
            device_id: record.device_id,
            name: record.name,
            data_source_obj_id: record.datasource_obj_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TypeRecord {
    id: i32,
    display_name: String,
    db_table_name: String,
    supported: bool,
    enabled: bool,
}

#[derive(sqlx::FromRow)]
struct InstanceRecord {
    id: i64,
    value: String,
    file_path: Option<String>,
    known_status: Option<i32>,
    file_obj_id: Option<i64>,
    case_id: i64,
    case_uid: String,
    case_name: String,
    data_source_id: i64,
    device_id: String,
    data_source_name: String,
    datasource_obj_id: Option<i64>,
}

impl InstanceRecord {
    fn into_row(self, correlation_type_id: i32) -> CorrelationRow {
        CorrelationRow {
            id: self.id,
            correlation_type_id,
            value: self.value,
            case: CorrelationCase {
                id: self.case_id,
                case_uuid: self.case_uid,
                display_name: self.case_name,
            },
            data_source: CorrelationDataSource {
                id: self.data_source_id,
                case_id: self.case_id,
                device_id: self.device_id,
                name: self.data_source_name,
                data_source_obj_id: self.datasource_obj_id,
            },
            file_path: self.file_path.unwrap_or_default(),
            known_status: KnownStatus::from_db(self.known_status),
            file_obj_id: self.file_obj_id,
        }
    }
}

/// Instance table for a registered type. Names are interpolated into SQL, so
/// anything outside `[a-z0-9_]` is refused.
fn instance_table(correlation_type: &CorrelationType) -> Result<String, StoreError> {
    let name = &correlation_type.db_table_name;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(StoreError::Query(format!(
            "invalid instance table name for type {}: {name:?}",
            correlation_type.display_name
        )));
    }
    Ok(correlation_type.instance_table())
}

fn instance_select(table: &str) -> String {
    format!(
        "SELECT i.id, i.value, i.file_path, i.known_status, i.file_obj_id, \
                c.id AS case_id, c.case_uid, c.case_name, \
                d.id AS data_source_id, d.device_id, d.name AS data_source_name, \
                d.datasource_obj_id \
         FROM {table} i \
         JOIN cases c ON c.id = i.case_id \
         JOIN data_sources d ON d.id = i.data_source_id"
    )
}

/// Central repository reader.
#[derive(Clone)]
pub struct PgCorrelationStore {
    pool: PgPool,
}

impl PgCorrelationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CorrelationStore for PgCorrelationStore {
    async fn cases(&self) -> Result<Vec<CorrelationCase>, StoreError> {
        let records: Vec<CaseRecord> =
            sqlx::query_as("SELECT id, case_uid, case_name FROM cases ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(records.into_iter().map(CorrelationCase::from).collect())
    }

    async fn case_by_uuid(&self, case_uuid: &str) -> Result<Option<CorrelationCase>, StoreError> {
        let record: Option<CaseRecord> =
            sqlx::query_as("SELECT id, case_uid, case_name FROM cases WHERE case_uid = $1")
                .bind(case_uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record.map(CorrelationCase::from))
    }

    async fn data_sources(&self) -> Result<Vec<CorrelationDataSource>, StoreError> {
        let records: Vec<DataSourceRecord> = sqlx::query_as(
            "SELECT id, case_id, device_id, name, datasource_obj_id FROM data_sources ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(CorrelationDataSource::from).collect())
    }

    async fn defined_types(&self) -> Result<Vec<CorrelationType>, StoreError> {
        let records: Vec<TypeRecord> = sqlx::query_as(
            "SELECT id, display_name, db_table_name, \
                    (supported::int <> 0) AS supported, (enabled::int <> 0) AS enabled \
             FROM correlation_types ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records
            .into_iter()
            .map(|record| CorrelationType {
                id: record.id,
                display_name: record.display_name,
                db_table_name: record.db_table_name,
                supported: record.supported,
                enabled: record.enabled,
            })
            .collect())
    }

    async fn count_unique_data_sources(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_sources")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_unique_case_data_sources_with_value(
        &self,
        correlation_type: &CorrelationType,
        value: &str,
    ) -> Result<i64, StoreError> {
        let table = instance_table(correlation_type)?;
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM \
             (SELECT DISTINCT case_id, data_source_id FROM {table} WHERE value = $1) pairs"
        ))
        .bind(value)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn instances_for_values(
        &self,
        correlation_type: &CorrelationType,
        values: &[String],
        case_ids: Option<&[i64]>,
    ) -> Result<Vec<CorrelationRow>, StoreError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let table = instance_table(correlation_type)?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(instance_select(&table));
        qb.push(" WHERE i.value = ANY(");
        qb.push_bind(values.to_vec());
        qb.push(")");
        if let Some(case_ids) = case_ids {
            qb.push(" AND i.case_id = ANY(");
            qb.push_bind(case_ids.to_vec());
            qb.push(")");
        }
        qb.push(" ORDER BY i.value, i.id");

        let records = qb
            .build_query_as::<InstanceRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records
            .into_iter()
            .map(|record| record.into_row(correlation_type.id))
            .collect())
    }

    async fn values_for_case(
        &self,
        correlation_type: &CorrelationType,
        case_id: i64,
    ) -> Result<Vec<String>, StoreError> {
        let table = instance_table(correlation_type)?;
        let values: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT DISTINCT value FROM {table} \
             WHERE case_id = $1 AND (known_status IS NULL OR known_status <> $2) \
             ORDER BY value"
        ))
        .bind(case_id)
        .bind(KnownStatus::Known.as_db())
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    async fn instance_by_id(
        &self,
        correlation_type: &CorrelationType,
        id: i64,
    ) -> Result<Option<CorrelationRow>, StoreError> {
        let table = instance_table(correlation_type)?;
        let record: Option<InstanceRecord> =
            sqlx::query_as(&format!("{} WHERE i.id = $1", instance_select(&table)))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record.map(|record| record.into_row(correlation_type.id)))
    }
}

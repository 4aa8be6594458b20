use std::collections::BTreeMap;
use std::time::Instant;

use correlation_types::CorrelationType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collate::collate_by_distinct_source_count;
use crate::db::CaseFileStore;
use crate::error::SearchError;
use crate::finder::ensure_not_cancelled;
use crate::model::{AttributeInstance, AttributeValue, CaseDbInstance, NodeKind};
use crate::query::{FileQuery, MimeFilter, is_no_data_md5};
use crate::results::{CaseResults, CountResults};

/// Rows collated between cancellation checks.
const ROW_BATCH: usize = 1000;

/// Finds file hashes shared by two or more data sources of the open case.
pub struct IntraCaseFinder<'a> {
    store: &'a dyn CaseFileStore,
    data_sources: BTreeMap<i64, String>,
    data_source: Option<i64>,
    filter: MimeFilter,
    percentage_threshold: u32,
}

impl<'a> IntraCaseFinder<'a> {
    /// `data_sources` maps every data source object id of the case to its
    /// name. A pinned `data_source` must be one of them.
    pub fn new(
        store: &'a dyn CaseFileStore,
        data_sources: BTreeMap<i64, String>,
        data_source: Option<i64>,
        filter: MimeFilter,
        percentage_threshold: u32,
    ) -> Result<Self, SearchError> {
        if let Some(id) = data_source {
            if !data_sources.contains_key(&id) {
                return Err(SearchError::UnknownDataSource(id));
            }
        }
        Ok(Self {
            store,
            data_sources,
            data_source,
            filter,
            percentage_threshold,
        })
    }

    pub fn query(&self) -> FileQuery {
        FileQuery::new(self.data_source, self.filter)
    }

    pub fn tab_title(&self) -> String {
        let scope = match self.data_source.and_then(|id| self.data_sources.get(&id)) {
            Some(name) => name.as_str(),
            None => "All Data Sources",
        };
        format!("Common Properties ({scope}, {})", self.filter.label())
    }

    pub async fn find_by_count(&self, cancel: &CancellationToken) -> Result<CountResults, SearchError> {
        let started = Instant::now();
        let query = self.query();
        debug!(
            stage = "search",
            event = "search.intra.begin",
            query = %query,
            "intra-case search starting"
        );

        ensure_not_cancelled(cancel)?;
        let rows = self.store.query_files(&query).await?;
        let case = self.store.case_info();

        let mut values: BTreeMap<String, AttributeValue> = BTreeMap::new();
        for batch in rows.chunks(ROW_BATCH) {
            ensure_not_cancelled(cancel)?;
            for row in batch {
                let Some(md5) = row.md5.as_deref() else {
                    continue;
                };
                if is_no_data_md5(md5) {
                    continue;
                }
                let data_source_name = match self.data_sources.get(&row.data_source_obj_id) {
                    Some(name) => name.clone(),
                    None => {
                        warn!(
                            stage = "search",
                            event = "search.intra.unknown_source",
                            obj_id = row.obj_id,
                            data_source_obj_id = row.data_source_obj_id,
                            "file belongs to an unlisted data source"
                        );
                        row.data_source_obj_id.to_string()
                    }
                };
                let instance = AttributeInstance::CaseDb(CaseDbInstance::new(
                    row,
                    md5,
                    case,
                    data_source_name,
                    NodeKind::Count,
                ));
                values
                    .entry(md5.to_string())
                    .or_insert_with(|| AttributeValue::new(md5))
                    .add_instance(instance);
            }
        }

        let shared = values
            .into_values()
            .filter(|value| value.distinct_data_source_count() > 1);
        let results = CountResults::new(
            collate_by_distinct_source_count(shared),
            self.percentage_threshold,
            CorrelationType::files(),
        );

        info!(
            stage = "search",
            event = "search.intra.end",
            result = "ok",
            row_count = rows.len(),
            bucket_count = results.buckets().len(),
            instance_count = results.size(),
            duration_ms = started.elapsed().as_millis(),
            "intra-case search completed"
        );
        Ok(results)
    }

    /// Grouping by case is meaningless inside a single case.
    pub fn find_by_case(&self) -> Result<CaseResults, SearchError> {
        Err(SearchError::Unsupported("intra-case search grouped by case"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryCaseStore;
    use crate::db::models::CaseInfo;
    use crate::query::NO_DATA_MD5;
    use correlation_types::KnownStatus;

    const SHARED: &str = "5d41402abc4b2a76b9719d911017c592";
    const LONELY: &str = "7d793037a0760186574b0282f2f435e7";

    fn store() -> MemoryCaseStore {
        let mut store = MemoryCaseStore::new(CaseInfo::new("uuid", "Case"));
        store.add_data_source(1, "laptop");
        store.add_data_source(2, "phone");
        store.add_data_source(3, "usb");
        store.add_file(10, "a.jpg", "/p/", Some(SHARED), 1);
        store.add_file(11, "a.jpg", "/p/", Some(SHARED), 2);
        store.add_file(12, "b.txt", "/p/", Some(LONELY), 1);
        store.add_file(13, "b.txt", "/q/", Some(LONELY), 1);
        for ds in 1..=3 {
            store.add_file(20 + ds, "empty", "/", Some(NO_DATA_MD5), ds);
        }
        store
    }

    fn finder(store: &MemoryCaseStore, data_source: Option<i64>) -> IntraCaseFinder<'_> {
        let sources = BTreeMap::from([
            (1, "laptop".to_string()),
            (2, "phone".to_string()),
            (3, "usb".to_string()),
        ]);
        IntraCaseFinder::new(store, sources, data_source, MimeFilter::default(), 0)
            .expect("finder")
    }

    #[tokio::test]
    async fn only_shared_hashes_surface() {
        let store = store();
        let results = finder(&store, None)
            .find_by_count(&CancellationToken::new())
            .await
            .expect("search");

        let summary = results.summary();
        assert_eq!(summary.buckets.len(), 1);
        assert_eq!(summary.buckets[0].data_source_count, 2);
        let values: Vec<&str> = summary.buckets[0].values.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, vec![SHARED]);
        assert_eq!(summary.buckets[0].values[0].data_source_names, "laptop, phone");
    }

    #[tokio::test]
    async fn known_files_do_not_count() {
        let mut store = store();
        store.set_known(11, KnownStatus::Known);
        let results = finder(&store, None)
            .find_by_count(&CancellationToken::new())
            .await
            .expect("search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn pinned_source_requires_presence() {
        let store = store();
        let results = finder(&store, Some(3))
            .find_by_count(&CancellationToken::new())
            .await
            .expect("search");
        assert!(results.is_empty());

        let results = finder(&store, Some(2))
            .find_by_count(&CancellationToken::new())
            .await
            .expect("search");
        assert_eq!(results.size(), 2);
    }

    #[test]
    fn unknown_pinned_source_rejected() {
        let store = store();
        let err = IntraCaseFinder::new(&store, BTreeMap::new(), Some(4), MimeFilter::default(), 0)
            .err()
            .expect("should fail");
        assert!(matches!(err, SearchError::UnknownDataSource(4)));
    }

    #[test]
    fn by_case_is_unsupported() {
        let store = store();
        let err = finder(&store, None).find_by_case().expect_err("unsupported");
        assert!(err.is_contract_violation());
    }

    #[test]
    fn tab_titles() {
        let store = store();
        assert_eq!(
            finder(&store, None).tab_title(),
            "Common Properties (All Data Sources, All File Types)"
        );
        assert_eq!(finder(&store, Some(2)).tab_title(), "Common Properties (phone, All File Types)");
    }

    #[tokio::test]
    async fn cancelled_search_stops() {
        let store = store();
        let token = CancellationToken::new();
        token.cancel();
        let err = finder(&store, None).find_by_count(&token).await.expect_err("cancelled");
        assert!(matches!(err, SearchError::Cancelled));
    }
}

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use correlation_types::{CorrelationCase, CorrelationRow, CorrelationType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collate::{collate_by_case, collate_by_distinct_source_count};
use crate::db::{CaseFileStore, CorrelationStore};
use crate::error::SearchError;
use crate::finder::{DEFAULT_BATCH_SIZE, ensure_not_cancelled};
use crate::model::{AttributeInstance, AttributeValue, CentralRepoInstance, NodeKind};
use crate::normalize::normalize;
use crate::query::{FileQuery, MimeFilter, is_no_data_md5};
use crate::results::{CaseResults, CountResults};

/// Receives the central repository rows of one value at a time.
trait RowCollator {
    fn accept(&mut self, value: String, rows: Vec<CorrelationRow>);
}

/// Keeps a value when it spans more than one data source and at least one
/// row lies outside the open case (and inside the target case, when one is
/// set).
struct CountCollator<'c> {
    current_case: &'c CorrelationCase,
    target_case_id: Option<i64>,
    values: Vec<AttributeValue>,
}

impl RowCollator for CountCollator<'_> {
    fn accept(&mut self, value: String, rows: Vec<CorrelationRow>) {
        if rows.len() < 2 {
            return;
        }
        let another_case = rows.iter().any(|row| {
            row.case.id != self.current_case.id
                && self.target_case_id.is_none_or(|target| row.case.id == target)
        });
        if !another_case {
            return;
        }

        let mut aggregate = AttributeValue::new(value);
        for row in rows {
            aggregate.add_instance(AttributeInstance::CentralRepo(CentralRepoInstance::new(
                row,
                self.current_case.case_uuid.as_str(),
                NodeKind::Count,
            )));
        }
        if aggregate.distinct_data_source_count() > 1 {
            self.values.push(aggregate);
        }
    }
}

/// One single-instance value per row, keyed by case label and data source
/// label.
struct CaseCollator<'c> {
    current_case: &'c CorrelationCase,
    case_labels: &'c HashMap<i64, String>,
    target_case_id: Option<i64>,
    entries: Vec<(String, String, AttributeValue)>,
}

impl RowCollator for CaseCollator<'_> {
    fn accept(&mut self, value: String, rows: Vec<CorrelationRow>) {
        if rows.len() < 2 {
            return;
        }
        if let Some(target) = self.target_case_id {
            if !rows.iter().any(|row| row.case.id == target) {
                return;
            }
        }

        for row in rows {
            let case_name = self
                .case_labels
                .get(&row.case.id)
                .cloned()
                .unwrap_or_else(|| row.case.display_name.clone());
            let data_source = row.data_source.labelled_name();
            let aggregate = AttributeValue::new(value.as_str()).with_instance(
                AttributeInstance::CentralRepo(CentralRepoInstance::new(
                    row,
                    self.current_case.case_uuid.as_str(),
                    NodeKind::Case,
                )),
            );
            self.entries.push((case_name, data_source, aggregate));
        }
    }
}

/// Finds values of one correlation type that the open case shares with
/// other cases in the central repository.
pub struct InterCaseFinder<'a> {
    case_store: &'a dyn CaseFileStore,
    repo: &'a dyn CorrelationStore,
    current_case: CorrelationCase,
    target_case: Option<CorrelationCase>,
    case_labels: HashMap<i64, String>,
    correlation_type: CorrelationType,
    filter: MimeFilter,
    percentage_threshold: u32,
    batch_size: usize,
}

impl<'a> InterCaseFinder<'a> {
    /// Fails when the open case, or the requested target case, is not
    /// registered in the central repository, and when the target is the open
    /// case itself.
    pub async fn new(
        case_store: &'a dyn CaseFileStore,
        repo: &'a dyn CorrelationStore,
        correlation_type: CorrelationType,
        target_case: Option<i64>,
        filter: MimeFilter,
        percentage_threshold: u32,
    ) -> Result<Self, SearchError> {
        let case_uuid = &case_store.case_info().uuid;
        let current_case = repo
            .case_by_uuid(case_uuid)
            .await?
            .ok_or_else(|| SearchError::CaseNotInRepository(case_uuid.clone()))?;

        let cases = repo.cases().await?;
        let target_case = match target_case {
            Some(id) if id == current_case.id => {
                return Err(SearchError::Unsupported("inter-case search targeting the open case"));
            }
            Some(id) => Some(
                cases
                    .iter()
                    .find(|case| case.id == id)
                    .cloned()
                    .ok_or_else(|| SearchError::CaseNotInRepository(id.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            case_store,
            repo,
            current_case,
            target_case,
            case_labels: case_labels(&cases),
            correlation_type,
            filter,
            percentage_threshold,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn current_case(&self) -> &CorrelationCase {
        &self.current_case
    }

    pub fn tab_title(&self) -> String {
        match &self.target_case {
            Some(case) => format!(
                "Common Properties (Central Repository Case: {}, {})",
                case.display_name, self.correlation_type.display_name
            ),
            None => format!(
                "Common Properties (All Central Repository Cases, {})",
                self.correlation_type.display_name
            ),
        }
    }

    pub async fn find_by_count(&self, cancel: &CancellationToken) -> Result<CountResults, SearchError> {
        let started = Instant::now();
        let mut collator = CountCollator {
            current_case: &self.current_case,
            target_case_id: self.target_case_id(),
            values: Vec::new(),
        };
        let scanned = self.scan(cancel, &mut collator).await?;

        let results = CountResults::new(
            collate_by_distinct_source_count(collator.values),
            self.percentage_threshold,
            self.correlation_type.clone(),
        );
        info!(
            stage = "search",
            event = "search.inter.end",
            result = "ok",
            view = "count",
            correlation_type = %self.correlation_type.display_name,
            candidate_count = scanned,
            bucket_count = results.buckets().len(),
            instance_count = results.size(),
            duration_ms = started.elapsed().as_millis(),
            "inter-case search completed"
        );
        Ok(results)
    }

    pub async fn find_by_case(&self, cancel: &CancellationToken) -> Result<CaseResults, SearchError> {
        let started = Instant::now();
        let mut collator = CaseCollator {
            current_case: &self.current_case,
            case_labels: &self.case_labels,
            target_case_id: self.target_case_id(),
            entries: Vec::new(),
        };
        let scanned = self.scan(cancel, &mut collator).await?;

        let results = CaseResults::new(
            collate_by_case(collator.entries),
            self.current_case_label(),
            self.percentage_threshold,
            self.correlation_type.clone(),
        );
        info!(
            stage = "search",
            event = "search.inter.end",
            result = "ok",
            view = "case",
            correlation_type = %self.correlation_type.display_name,
            candidate_count = scanned,
            case_count = results.buckets().len(),
            instance_count = results.size(),
            duration_ms = started.elapsed().as_millis(),
            "inter-case search completed"
        );
        Ok(results)
    }

    /// Key of the open case's branch in the case view.
    fn current_case_label(&self) -> &str {
        self.case_labels
            .get(&self.current_case.id)
            .map_or(self.current_case.display_name.as_str(), String::as_str)
    }

    fn target_case_id(&self) -> Option<i64> {
        self.target_case.as_ref().map(|case| case.id)
    }

    /// Normalized, de-duplicated values of interest observed in the open case.
    async fn candidate_values(&self) -> Result<BTreeSet<String>, SearchError> {
        let raw = if self.correlation_type.is_file_type() {
            self.case_store
                .candidate_hashes(&FileQuery::new(None, self.filter))
                .await?
        } else {
            self.repo
                .values_for_case(&self.correlation_type, self.current_case.id)
                .await?
        };

        let mut values = BTreeSet::new();
        for raw in raw {
            match normalize(&self.correlation_type, &raw) {
                Ok(value) if self.correlation_type.is_file_type() && is_no_data_md5(&value) => {}
                Ok(value) => {
                    values.insert(value);
                }
                Err(err) => {
                    warn!(
                        stage = "search",
                        event = "search.inter.value.skip",
                        correlation_type = %self.correlation_type.display_name,
                        error = %err,
                        "skipping malformed correlation value"
                    );
                }
            }
        }
        Ok(values)
    }

    async fn scan<C: RowCollator>(
        &self,
        cancel: &CancellationToken,
        collator: &mut C,
    ) -> Result<usize, SearchError> {
        ensure_not_cancelled(cancel)?;
        let values: Vec<String> = self.candidate_values().await?.into_iter().collect();
        let case_ids = self
            .target_case_id()
            .map(|target| vec![self.current_case.id, target]);

        debug!(
            stage = "search",
            event = "search.inter.begin",
            correlation_type = %self.correlation_type.display_name,
            candidate_count = values.len(),
            batch_size = self.batch_size,
            target_case = ?self.target_case_id(),
            "inter-case search starting"
        );

        for chunk in values.chunks(self.batch_size) {
            ensure_not_cancelled(cancel)?;
            let rows = self
                .repo
                .instances_for_values(&self.correlation_type, chunk, case_ids.as_deref())
                .await?;

            let mut by_value: BTreeMap<String, Vec<CorrelationRow>> = BTreeMap::new();
            for row in rows {
                by_value.entry(row.value.clone()).or_default().push(row);
            }
            for (value, rows) in by_value {
                collator.accept(value, rows);
            }
        }
        Ok(values.len())
    }
}

/// Display names, with the id appended to names several cases share, so
/// that no two cases collapse into one branch.
fn case_labels(cases: &[CorrelationCase]) -> HashMap<i64, String> {
    let mut uses: HashMap<&str, usize> = HashMap::new();
    for case in cases {
        *uses.entry(case.display_name.as_str()).or_default() += 1;
    }
    cases
        .iter()
        .map(|case| {
            let label = if uses[case.display_name.as_str()] > 1 {
                format!("{} ({})", case.display_name, case.id)
            } else {
                case.display_name.clone()
            };
            (case.id, label)
        })
        .collect()
}

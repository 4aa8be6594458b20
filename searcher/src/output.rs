use std::io::Write;

use anyhow::{Context, Result};
use common_properties::db::CaseFileStore;
use common_properties::model::{DisplayLeaf, ValueAggregateList};
use common_properties::results::ValueSummary;
use common_properties::{SearchOutcome, SearchResults};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ValueNode {
    #[serde(flatten)]
    pub summary: ValueSummary,
    pub data_sources_in_current_case: usize,
    pub leaves: Vec<DisplayLeaf>,
}

#[derive(Debug, Serialize)]
pub struct CountBucketNode {
    pub data_source_count: usize,
    pub values: Vec<ValueNode>,
}

#[derive(Debug, Serialize)]
pub struct DataSourceNode {
    pub data_source: String,
    pub values: Vec<ValueNode>,
}

#[derive(Debug, Serialize)]
pub struct CaseNode {
    pub case_name: String,
    pub data_sources: Vec<DataSourceNode>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ResultTree {
    Count {
        tab_title: String,
        correlation_type: String,
        percentage_threshold: u32,
        size: usize,
        buckets: Vec<CountBucketNode>,
    },
    Case {
        tab_title: String,
        correlation_type: String,
        percentage_threshold: u32,
        size: usize,
        cases: Vec<CaseNode>,
    },
}

/// Expands every node, the way a viewer would, and collects the leaves.
pub async fn build_tree(outcome: SearchOutcome, store: &dyn CaseFileStore) -> Result<ResultTree> {
    let SearchOutcome { tab_title, results } = outcome;

    match results {
        SearchResults::Count(mut results) => {
            let size = results.size();
            let mut buckets = Vec::with_capacity(results.buckets().len());
            for (count, list) in results.buckets_mut() {
                buckets.push(CountBucketNode {
                    data_source_count: *count,
                    values: expand(list, store).await?,
                });
            }
            Ok(ResultTree::Count {
                tab_title,
                correlation_type: results.correlation_type().display_name.clone(),
                percentage_threshold: results.percentage_threshold(),
                size,
                buckets,
            })
        }
        SearchResults::Case(mut results) => {
            let size = results.size();
            let layout: Vec<(String, Vec<String>)> = results
                .buckets()
                .iter()
                .map(|(case, branch)| (case.clone(), branch.keys().cloned().collect()))
                .collect();

            let mut cases = Vec::with_capacity(layout.len());
            for (case_name, data_sources) in layout {
                let mut nodes = Vec::with_capacity(data_sources.len());
                for data_source in data_sources {
                    let Some(list) = results.data_source_mut(&case_name, &data_source) else {
                        continue;
                    };
                    nodes.push(DataSourceNode {
                        values: expand(list, store).await?,
                        data_source,
                    });
                }
                cases.push(CaseNode {
                    case_name,
                    data_sources: nodes,
                });
            }
            Ok(ResultTree::Case {
                tab_title,
                correlation_type: results.correlation_type().display_name.clone(),
                percentage_threshold: results.percentage_threshold(),
                size,
                cases,
            })
        }
    }
}

async fn expand(list: &mut ValueAggregateList, store: &dyn CaseFileStore) -> Result<Vec<ValueNode>> {
    list.resolve_files(store)
        .await
        .context("failed to resolve files for result node")?;

    let values = list.materialize();
    let mut nodes = Vec::with_capacity(values.len());
    for value in values {
        let mut leaves = Vec::with_capacity(value.instance_count());
        for instance in value.instances() {
            if let Some(leaf) = instance.display_leaf(store).await? {
                leaves.push(leaf);
            }
        }
        nodes.push(ValueNode {
            summary: ValueSummary::from(value),
            data_sources_in_current_case: value.data_source_count_in_current_case(store).await?,
            leaves,
        });
    }
    Ok(nodes)
}

pub fn write_json(tree: &ResultTree, mut writer: impl Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, tree).context("failed to serialize result tree")?;
    writeln!(writer).context("failed to write result tree")?;
    Ok(())
}

//! Two-level consolidation of generated summaries.
//!
//! Level A merges duplicate summaries within a theme. Level B then merges
//! duplicate points within each resulting summary; those tasks are submitted
//! as soon as their theme's Level A result lands. Any scope whose merge fails
//! or comes back empty keeps its pre-merge content.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use buzzlens_common::{SummaryRecord, ThemeSummaryCollection};

use crate::dispatch::{Completion, CompletionQueue, DispatchReport, Dispatcher, TaskDescriptor};
use crate::infer::StructuredInference;

pub const SUMMARY_MERGE_DIRECTIVE: &str = r#"You consolidate summary records produced from customer feedback.

You receive a JSON array of records, each with a "summary" and a list of "points". Merge records whose summaries mean the same thing: keep one clear summary and combine their points. Records that are not duplicates must be returned unchanged. Never drop information and never invent new content.

Return a ```json fenced block containing the resulting array of {"summary": ..., "points": [...]} records."#;

pub const POINT_MERGE_DIRECTIVE: &str = r#"You consolidate bullet points taken from customer feedback.

You receive a JSON array of strings. Merge strings that make the same point into one clear sentence. Strings that are not duplicates must be returned unchanged. Never drop information and never invent new content.

Return a ```json fenced block containing the resulting array of strings."#;

/// What a merge task covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeScope {
    /// All records of one theme.
    Theme(String),
    /// Points of one record, by position after the theme's Level A merge.
    Points { theme: String, index: usize },
}

/// A list answer, given bare or as the only field of an object
/// (e.g. `{"summary_list": [...]}`). Any other shape fails to parse, so the
/// inference client retries it like any malformed block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ListReply<T> {
    Bare(Vec<T>),
    #[serde(deserialize_with = "single_field")]
    Wrapped(Vec<T>),
}

impl<T> ListReply<T> {
    /// The list, unless it is empty.
    pub fn into_list(self) -> Option<Vec<T>> {
        let (ListReply::Bare(list) | ListReply::Wrapped(list)) = self;
        (!list.is_empty()).then_some(list)
    }
}

fn single_field<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let fields = BTreeMap::<String, Vec<T>>::deserialize(deserializer)?;
    if fields.len() != 1 {
        return Err(D::Error::custom(format!(
            "expected an object with one list field, found {} fields",
            fields.len()
        )));
    }
    Ok(fields.into_values().next().unwrap_or_default())
}

enum MergeAnswer {
    Records(ListReply<SummaryRecord>),
    Points(ListReply<String>),
}

type MergeFuture = BoxFuture<'static, Completion<MergeScope, MergeAnswer>>;

#[derive(Debug, Default, Clone)]
pub struct MergeReport {
    pub themes: u64,
    pub records_in: u64,
    pub records_out: u64,
    pub points_in: u64,
    pub points_out: u64,
    /// Scopes that kept their pre-merge content after a failed or empty merge.
    pub fallbacks: u64,
    pub calls: DispatchReport,
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Summary Merge Complete ===")?;
        writeln!(f, "Themes:          {}", self.themes)?;
        writeln!(f, "Records:         {} -> {}", self.records_in, self.records_out)?;
        writeln!(f, "Points:          {} -> {}", self.points_in, self.points_out)?;
        writeln!(f, "Fallbacks:       {}", self.fallbacks)?;
        writeln!(
            f,
            "Generator calls: {} ({} failed)",
            self.calls.completed,
            self.calls.failed()
        )?;
        Ok(())
    }
}

pub struct MergeReducer {
    dispatcher: Dispatcher,
}

impl MergeReducer {
    pub fn new(inference: Arc<StructuredInference>, ceiling: usize) -> Self {
        Self {
            dispatcher: Dispatcher::new("merge", inference, ceiling),
        }
    }

    pub async fn merge(
        &self,
        collection: ThemeSummaryCollection,
    ) -> (ThemeSummaryCollection, MergeReport) {
        let mut report = MergeReport {
            themes: collection.len() as u64,
            records_in: count_records(&collection),
            points_in: count_points(&collection),
            ..Default::default()
        };

        let mut tasks = Vec::new();
        for (theme, records) in &collection {
            if records.len() >= 2 {
                tasks.extend(theme_task(theme, records));
            } else {
                tasks.extend(point_tasks(theme, records));
            }
        }

        let mut queue: CompletionQueue<MergeScope, MergeAnswer> = CompletionQueue::new();
        for task in tasks {
            queue.push(self.submit(task));
        }

        let mut merged = collection;
        while let Some(Completion { location, outcome }) = queue.next().await {
            report.calls.record(outcome.kind());
            let answer = outcome.structured();
            let follow_ups = match location {
                MergeScope::Theme(theme) => {
                    let Some(records) = merged.get_mut(&theme) else {
                        continue;
                    };
                    let list = match answer {
                        Some(MergeAnswer::Records(reply)) => reply.into_list(),
                        _ => None,
                    };
                    match list {
                        Some(list) => *records = list,
                        None => {
                            warn!(theme = theme.as_str(), "Summary merge failed, keeping input");
                            report.fallbacks += 1;
                        }
                    }
                    point_tasks(&theme, records)
                }
                MergeScope::Points { theme, index } => {
                    let Some(record) = merged.get_mut(&theme).and_then(|r| r.get_mut(index)) else {
                        continue;
                    };
                    let list = match answer {
                        Some(MergeAnswer::Points(reply)) => reply.into_list(),
                        _ => None,
                    };
                    match list {
                        Some(points) => record.points = points,
                        None => {
                            warn!(theme = theme.as_str(), index, "Point merge failed, keeping input");
                            report.fallbacks += 1;
                        }
                    }
                    Vec::new()
                }
            };
            for task in follow_ups {
                queue.push(self.submit(task));
            }
        }

        report.records_out = count_records(&merged);
        report.points_out = count_points(&merged);
        info!(
            themes = report.themes,
            records_in = report.records_in,
            records_out = report.records_out,
            fallbacks = report.fallbacks,
            "Summary merge finished"
        );
        (merged, report)
    }
}

impl MergeReducer {
    /// Records for a theme scope, strings for a points scope.
    fn submit(&self, task: TaskDescriptor<MergeScope>) -> MergeFuture {
        match task.location {
            MergeScope::Theme(_) => self
                .dispatcher
                .submit::<MergeScope, ListReply<SummaryRecord>>(task)
                .map(|c| Completion {
                    location: c.location,
                    outcome: c.outcome.map(MergeAnswer::Records),
                })
                .boxed(),
            MergeScope::Points { .. } => self
                .dispatcher
                .submit::<MergeScope, ListReply<String>>(task)
                .map(|c| Completion {
                    location: c.location,
                    outcome: c.outcome.map(MergeAnswer::Points),
                })
                .boxed(),
        }
    }
}

fn theme_task(theme: &str, records: &[SummaryRecord]) -> Option<TaskDescriptor<MergeScope>> {
    let payload = serde_json::to_string_pretty(records).ok()?;
    Some(TaskDescriptor::new(
        SUMMARY_MERGE_DIRECTIVE,
        payload,
        MergeScope::Theme(theme.to_string()),
    ))
}

fn point_tasks(theme: &str, records: &[SummaryRecord]) -> Vec<TaskDescriptor<MergeScope>> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.points.len() >= 2)
        .filter_map(|(index, r)| {
            let payload = serde_json::to_string_pretty(&r.points).ok()?;
            Some(TaskDescriptor::new(
                POINT_MERGE_DIRECTIVE,
                payload,
                MergeScope::Points {
                    theme: theme.to_string(),
                    index,
                },
            ))
        })
        .collect()
}

fn count_records(collection: &BTreeMap<String, Vec<SummaryRecord>>) -> u64 {
    collection.values().map(|r| r.len() as u64).sum()
}

fn count_points(collection: &BTreeMap<String, Vec<SummaryRecord>>) -> u64 {
    collection
        .values()
        .flat_map(|records| records.iter())
        .map(|r| r.points.len() as u64)
        .sum()
}

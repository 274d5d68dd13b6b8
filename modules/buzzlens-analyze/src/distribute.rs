//! Distribution of posts and replies over a fixed question set.
//!
//! Every post and every reply is asked, independently, which questions it
//! speaks to. Answers land on the item they came from; a failed call leaves
//! an empty list so the item is not asked again on the next run.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use buzzlens_common::{Corpus, QuestionSet};

use crate::dispatch::{DispatchReport, Dispatcher, TaskDescriptor};
use crate::infer::{InferenceOutcome, StructuredInference};
use crate::pipeline::classify::ItemAddress;
use crate::pipeline::progress::Progress;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ThemeAssignment {
    /// Ids of the questions the text answers. Empty when none apply.
    pub themes: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct DistributionReport {
    pub items: u64,
    /// Items left alone because an earlier run already distributed them.
    pub skipped: u64,
    pub assigned: u64,
    pub unassigned: u64,
    /// Ids the generator returned that are not in the question set.
    pub ids_dropped: u64,
    pub calls: DispatchReport,
}

impl std::fmt::Display for DistributionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Theme Distribution Complete ===")?;
        writeln!(f, "Items:           {} ({} already done)", self.items, self.skipped)?;
        writeln!(f, "With themes:     {}", self.assigned)?;
        writeln!(f, "Without themes:  {}", self.unassigned)?;
        writeln!(f, "Unknown ids:     {}", self.ids_dropped)?;
        writeln!(
            f,
            "Generator calls: {} ({} failed)",
            self.calls.completed,
            self.calls.failed()
        )?;
        Ok(())
    }
}

fn distribute_directive(questions: &QuestionSet) -> String {
    let base = format!(
        r#"You sort customer feedback into research questions.

The questions, one per line as "id: question":
{questions}

Read the text you are given and decide which of the questions it contains an answer to. A text may answer several questions or none. Use only the ids listed above."#,
        questions = questions.describe()
    );
    StructuredInference::with_schema_hint::<ThemeAssignment>(&base)
}

pub struct ThemeDistributor {
    dispatcher: Dispatcher,
    questions: Arc<QuestionSet>,
}

impl ThemeDistributor {
    pub fn new(inference: Arc<StructuredInference>, questions: Arc<QuestionSet>, ceiling: usize) -> Self {
        Self {
            dispatcher: Dispatcher::new("distribute", inference, ceiling),
            questions,
        }
    }

    /// Fill `annotations.themes` on every post and reply that has none yet.
    pub async fn distribute(&self, corpus: &mut Corpus) -> DistributionReport {
        let directive = distribute_directive(&self.questions);
        let mut report = DistributionReport::default();

        let mut tasks = Vec::new();
        for (g, group) in corpus.iter().enumerate() {
            for (p, post) in group.items.iter().enumerate() {
                let replies = post
                    .replies
                    .iter()
                    .enumerate()
                    .map(|(r, reply)| (ItemAddress::reply(g, p, r), reply));
                for (address, item) in std::iter::once((ItemAddress::post(g, p), post)).chain(replies) {
                    report.items += 1;
                    if item.annotations.themes.is_some() {
                        report.skipped += 1;
                        continue;
                    }
                    tasks.push(TaskDescriptor::new(directive.clone(), item.content.clone(), address));
                }
            }
        }

        let mut progress = Progress::new("distribute", tasks.len());
        info!(items = report.items, pending = tasks.len(), "Theme distribution started");

        let questions = &self.questions;
        let mut assigned = 0;
        let mut unassigned = 0;
        let mut ids_dropped = 0;
        report.calls = self
            .dispatcher
            .run(tasks, |address, outcome: InferenceOutcome<ThemeAssignment>| {
                progress.complete();
                let Some(item) = address.resolve_mut(corpus) else {
                    return Vec::new();
                };
                let themes = match outcome {
                    InferenceOutcome::Structured(assignment) => {
                        let mut themes = Vec::new();
                        for raw in &assignment.themes {
                            match questions.canonicalize(raw) {
                                Some(id) => themes.push(id.to_string()),
                                None => ids_dropped += 1,
                            }
                        }
                        themes
                    }
                    other => {
                        warn!(%address, kind = ?other.kind(), "Theme distribution failed, defaulting to none");
                        Vec::new()
                    }
                };
                if themes.is_empty() {
                    unassigned += 1;
                } else {
                    assigned += 1;
                }
                item.annotations.themes = Some(themes);
                Vec::new()
            })
            .await;

        report.assigned = assigned;
        report.unassigned = unassigned;
        report.ids_dropped = ids_dropped;
        info!(
            assigned = report.assigned,
            unassigned = report.unassigned,
            failed = report.calls.failed(),
            "Theme distribution finished"
        );
        report
    }
}

/// How often one question was answered, and by what.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThemeCount {
    pub count: u64,
    pub content: Vec<String>,
}

/// Question id → count and contents. Each post precedes its replies; an
/// item listed under an id twice is counted twice.
pub type ThemeCounts = BTreeMap<String, ThemeCount>;

pub fn count_themes(corpus: &Corpus) -> ThemeCounts {
    let mut counts = ThemeCounts::new();
    let items = corpus
        .iter()
        .flat_map(|g| g.items.iter())
        .flat_map(|post| std::iter::once(post).chain(post.replies.iter()));
    for item in items {
        for id in item.themes() {
            let entry = counts.entry(id.clone()).or_default();
            entry.count += 1;
            entry.content.push(item.content.clone());
        }
    }
    counts
}

/// Contents per question id, in the shape the theme summarizer takes.
pub fn question_contents(counts: &ThemeCounts) -> BTreeMap<String, Vec<String>> {
    counts
        .iter()
        .map(|(id, c)| (id.clone(), c.content.clone()))
        .collect()
}

//! Theme content collection and batched summarization.
//!
//! Produces the summary collections that [`crate::merge::MergeReducer`]
//! consolidates.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use buzzlens_common::{Corpus, KeywordLevel, SummaryRecord, Taxonomy, ThemeSummaryCollection};

use crate::dispatch::{DispatchReport, Dispatcher, TaskDescriptor};
use crate::infer::{InferenceOutcome, StructuredInference};
use crate::merge::ListReply;

pub const DEFAULT_BATCH_SIZE: usize = 200;

/// primary → secondary → contents of items tagged with that secondary.
pub type KeywordContents = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Contents of every post and reply in group `group_key`, filed under each
/// distinct secondary keyword the item is tagged with. Every taxonomy
/// secondary has an entry, possibly empty.
pub fn collect_by_keyword(corpus: &Corpus, group_key: &str, taxonomy: &Taxonomy) -> KeywordContents {
    let mut contents: KeywordContents = taxonomy
        .primaries()
        .map(|primary| {
            let secondaries = taxonomy
                .secondaries_of(primary)
                .map(|s| (s.to_string(), Vec::new()))
                .collect();
            (primary.to_string(), secondaries)
        })
        .collect();

    let items = corpus
        .iter()
        .filter(|g| g.key == group_key)
        .flat_map(|g| g.items.iter())
        .flat_map(|post| std::iter::once(post).chain(post.replies.iter()));

    for item in items {
        let mut filed: Vec<&str> = Vec::new();
        for tag in item.tags().iter().filter(|t| t.level == KeywordLevel::Secondary) {
            if filed.contains(&tag.keyword.as_str()) {
                continue;
            }
            let Some(primary) = taxonomy.primary_of(&tag.keyword) else {
                continue;
            };
            if let Some(list) = contents
                .get_mut(primary)
                .and_then(|m| m.get_mut(&tag.keyword))
            {
                list.push(item.content.clone());
                filed.push(tag.keyword.as_str());
            }
        }
    }
    contents
}

/// Flatten to `"primary / secondary"` themes, skipping keywords with no
/// content.
pub fn keyword_themes(contents: &KeywordContents) -> BTreeMap<String, Vec<String>> {
    contents
        .iter()
        .flat_map(|(primary, secondaries)| {
            secondaries
                .iter()
                .filter(|(_, texts)| !texts.is_empty())
                .map(move |(secondary, texts)| (format!("{primary} / {secondary}"), texts.clone()))
        })
        .collect()
}

fn summarize_directive(subject: &str) -> String {
    format!(
        r#"You summarize customer feedback about "{subject}".

You receive one piece of feedback per line. Group the feedback into distinct findings. For each finding write a one-sentence "summary" and a list of short "points" that support it, staying close to what customers actually said. Ignore lines that say nothing about it.

Return a ```json fenced block containing an array of {{"summary": ..., "points": [...]}} records."#
    )
}

/// Summarizes theme contents in fixed-size batches, one call per batch.
pub struct ThemeSummarizer {
    dispatcher: Dispatcher,
    batch_size: usize,
}

impl ThemeSummarizer {
    pub fn new(inference: Arc<StructuredInference>, ceiling: usize) -> Self {
        Self {
            dispatcher: Dispatcher::new("summarize", inference, ceiling),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Every input theme appears in the output. Batch results are joined in
    /// batch order; a failed batch contributes nothing.
    pub async fn summarize(
        &self,
        themes: &BTreeMap<String, Vec<String>>,
    ) -> (ThemeSummaryCollection, DispatchReport) {
        self.summarize_with(themes, |theme| theme.to_string()).await
    }

    /// Like [`summarize`](Self::summarize), but the prompt names each theme by
    /// `describe(theme)` (e.g. the text of a question) while results stay
    /// keyed by the theme itself.
    pub async fn summarize_with(
        &self,
        themes: &BTreeMap<String, Vec<String>>,
        describe: impl Fn(&str) -> String,
    ) -> (ThemeSummaryCollection, DispatchReport) {
        let mut tasks = Vec::new();
        for (theme, texts) in themes {
            let directive = summarize_directive(&describe(theme));
            for (batch, chunk) in texts.chunks(self.batch_size).enumerate() {
                tasks.push(TaskDescriptor::new(
                    directive.clone(),
                    chunk.join("\n"),
                    (theme.clone(), batch),
                ));
            }
        }

        let mut batches: BTreeMap<String, BTreeMap<usize, Vec<SummaryRecord>>> = themes
            .keys()
            .map(|t| (t.clone(), BTreeMap::new()))
            .collect();
        let report = self
            .dispatcher
            .run(tasks, |(theme, batch), outcome: InferenceOutcome<ListReply<SummaryRecord>>| {
                match outcome.structured().and_then(ListReply::into_list) {
                    Some(records) => {
                        if let Some(slots) = batches.get_mut(&theme) {
                            slots.insert(batch, records);
                        }
                    }
                    None => warn!(theme = theme.as_str(), batch, "Summarization batch failed"),
                }
                Vec::new()
            })
            .await;

        let collection: ThemeSummaryCollection = batches
            .into_iter()
            .map(|(theme, slots)| (theme, slots.into_values().flatten().collect()))
            .collect();
        info!(
            themes = collection.len(),
            calls = report.completed,
            failed = report.failed(),
            "Theme summarization finished"
        );
        (collection, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{group, json_block, post, reply, single_shot, ScriptedModel, Step};
    use buzzlens_common::{Item, KeywordTag, Relatedness, Sentiment};
    use serde_json::json;

    fn tag(mut item: Item, keywords: &[&str]) -> Item {
        item.annotations.relatedness = Some(Relatedness::related("on topic"));
        item.annotations.keywords = Some(
            keywords
                .iter()
                .map(|k| KeywordTag {
                    keyword: k.to_string(),
                    level: if *k == "Service" {
                        KeywordLevel::Primary
                    } else {
                        KeywordLevel::Secondary
                    },
                    sentiment: Sentiment::Neutral,
                })
                .collect(),
        );
        item
    }

    #[test]
    fn contents_are_filed_once_per_secondary() {
        let taxonomy = crate::testing::taxonomy_fixture();
        let corpus = vec![
            group(
                "Harbor Inn",
                vec![tag(
                    post(
                        "p1",
                        "bed was hard and the street loud",
                        vec![tag(reply("r1", "front desk fixed it"), &["Front Desk"])],
                    ),
                    &["Bed Quality", "Noise", "Noise", "Service"],
                )],
            ),
            group("Other", vec![tag(post("p2", "elsewhere", vec![]), &["Noise"])]),
        ];

        let contents = collect_by_keyword(&corpus, "Harbor Inn", &taxonomy);

        assert_eq!(contents["Room Comfort"]["Noise"], vec!["bed was hard and the street loud"]);
        assert_eq!(contents["Room Comfort"]["Bed Quality"].len(), 1);
        assert_eq!(contents["Service"]["Front Desk"], vec!["front desk fixed it"]);

        let themes = keyword_themes(&contents);
        assert_eq!(
            themes.keys().collect::<Vec<_>>(),
            vec!["Room Comfort / Bed Quality", "Room Comfort / Noise", "Service / Front Desk"]
        );
    }

    #[tokio::test]
    async fn batches_are_concatenated_in_order() {
        let model = ScriptedModel::new()
            .on(
                "",
                "a1\na2",
                vec![Step::text(json_block(&json!([{"summary": "first", "points": []}])))],
            )
            .on(
                "",
                "a3",
                vec![Step::text(json_block(
                    &json!({"summary_list": [{"summary": "second", "points": ["p"]}]}),
                ))],
            )
            .on("", "b1", vec![Step::transport("down")]);
        let model = Arc::new(model);
        let summarizer = ThemeSummarizer::new(single_shot(model.clone()), 8).with_batch_size(2);

        let mut themes = BTreeMap::new();
        themes.insert("A".to_string(), vec!["a1".into(), "a2".into(), "a3".into()]);
        themes.insert("B".to_string(), vec!["b1".into()]);

        let (collection, report) = summarizer.summarize(&themes).await;

        let summaries: Vec<_> = collection["A"].iter().map(|r| r.summary.as_str()).collect();
        assert_eq!(summaries, vec!["first", "second"]);
        assert!(collection["B"].is_empty());
        assert_eq!(report.completed, 3);
        assert_eq!(report.transport_failures, 1);
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn described_themes_prompt_with_the_description() {
        let model = Arc::new(ScriptedModel::new().on(
            "Why guests decided to book",
            "",
            vec![Step::text(json_block(&json!([{"summary": "Location", "points": ["near the beach"]}])))],
        ));
        let summarizer = ThemeSummarizer::new(single_shot(model.clone()), 2);
        let questions = crate::testing::question_fixture();

        let mut themes = BTreeMap::new();
        themes.insert("A".to_string(), vec!["right by the beach".to_string()]);

        let (collection, _) = summarizer
            .summarize_with(&themes, |id| questions.text(id).unwrap_or(id).to_string())
            .await;

        assert_eq!(collection["A"][0].summary, "Location");
        assert_eq!(model.call_count(), 1);
    }
}

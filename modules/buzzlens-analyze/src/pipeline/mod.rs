//! Two-stage classification of a corpus.
//!
//! Stage one asks whether each post is related to the topic. A related post
//! fans out relatedness tasks for its replies (short replies are settled
//! without a call); an unrelated post settles all of its replies on the spot.
//! Every item that ends up related is tagged against the taxonomy in stage
//! two. Both stages share one completion queue, so new tasks are submitted as
//! soon as the result that produces them arrives.

pub mod classify;
pub mod progress;
pub mod prompts;
pub mod stats;

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use buzzlens_common::{Config, Corpus, Group, Relatedness, Taxonomy};

use crate::dispatch::{Completion, CompletionQueue, Dispatcher, TaskDescriptor};
use crate::infer::{InferenceOutcome, StructuredInference};
use classify::{
    validate_tags, ItemAddress, RelatednessVerdict, StageResponse, StageTask, TaggingResponse,
    REASON_ANALYSIS_FAILED, REASON_PARENT_NOT_RELATED, REASON_REPLY_TOO_SHORT,
};
use progress::Progress;

pub use stats::ClassificationReport;

type StageFuture = BoxFuture<'static, Completion<StageTask, StageResponse>>;

#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineSettings {
    /// Domain relatedness is judged against.
    #[builder(default = "hotels".to_string(), setter(into))]
    pub topic: String,
    /// Replies with fewer characters are not related without asking.
    #[builder(default = 10)]
    pub min_reply_len: usize,
    #[builder(default = 200)]
    pub classify_concurrency: usize,
    #[builder(default = 500)]
    pub tagging_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self::builder()
            .topic(config.topic.clone())
            .min_reply_len(config.min_reply_len)
            .classify_concurrency(config.classify_concurrency)
            .tagging_concurrency(config.tagging_concurrency)
            .build()
    }
}

/// Per-group prompts, built once per run.
struct Directives {
    relatedness: String,
    tagging: String,
}

struct RunState {
    report: ClassificationReport,
    classify: Progress,
    tagging: Progress,
}

pub struct ClassificationPipeline {
    inference: Arc<StructuredInference>,
    taxonomy: Arc<Taxonomy>,
    settings: PipelineSettings,
}

impl ClassificationPipeline {
    pub fn new(
        inference: Arc<StructuredInference>,
        taxonomy: Arc<Taxonomy>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inference,
            taxonomy,
            settings,
        }
    }

    /// Annotate every post and reply in `corpus` in place. Each item ends with
    /// a relatedness verdict; related items also get a (possibly empty) tag
    /// list. Generator failures become defaults and never stop the run.
    pub async fn run(&self, corpus: &mut Corpus) -> ClassificationReport {
        let classify = Dispatcher::new(
            "classify",
            self.inference.clone(),
            self.settings.classify_concurrency,
        );
        let tagging = Dispatcher::new(
            "tagging",
            self.inference.clone(),
            self.settings.tagging_concurrency,
        );

        let directives: Vec<Directives> = corpus
            .iter()
            .map(|g| Directives {
                relatedness: prompts::relatedness_directive(&self.settings.topic, &g.key),
                tagging: prompts::tagging_directive(&self.settings.topic, &g.key, &self.taxonomy),
            })
            .collect();

        let items: usize = corpus.iter().map(Group::item_count).sum();
        let mut state = RunState {
            report: ClassificationReport::default(),
            classify: Progress::new("classify", items),
            tagging: Progress::new("tagging", items),
        };

        let mut queue: CompletionQueue<StageTask, StageResponse> = CompletionQueue::new();
        for (g, group) in corpus.iter().enumerate() {
            for p in 0..group.items.len() {
                state.report.posts += 1;
                let task = StageTask::Relatedness(ItemAddress::post(g, p));
                if let Some(fut) = self.submit(task, corpus, &directives, &classify, &tagging) {
                    queue.push(fut);
                }
            }
        }
        info!(
            groups = corpus.len(),
            posts = state.report.posts,
            items,
            "Classification started"
        );

        while let Some(Completion { location, outcome }) = queue.next().await {
            let follow_ups = match location {
                StageTask::Relatedness(address) => {
                    state.report.classify.record(outcome.kind());
                    state.classify.complete();
                    let verdict = match outcome {
                        InferenceOutcome::Structured(StageResponse::Relatedness(v)) => Some(v),
                        other => {
                            warn!(%address, kind = ?other.kind(), "Relatedness failed, defaulting to not related");
                            None
                        }
                    };
                    self.apply_relatedness(corpus, address, verdict, &mut state)
                }
                StageTask::Tagging(address) => {
                    state.report.tagging.record(outcome.kind());
                    state.tagging.complete();
                    let response = match outcome {
                        InferenceOutcome::Structured(StageResponse::Tagging(r)) => Some(r),
                        other => {
                            warn!(%address, kind = ?other.kind(), "Tagging failed, defaulting to no tags");
                            None
                        }
                    };
                    self.apply_tags(corpus, address, response, &mut state);
                    Vec::new()
                }
            };

            for task in follow_ups {
                if let Some(fut) = self.submit(task, corpus, &directives, &classify, &tagging) {
                    queue.push(fut);
                }
            }
        }

        info!(
            related_posts = state.report.related_posts,
            related_replies = state.report.related_replies,
            tagged = state.report.tagged_items,
            calls = state.report.calls_issued(),
            "Classification finished"
        );
        state.report
    }

    fn submit(
        &self,
        task: StageTask,
        corpus: &Corpus,
        directives: &[Directives],
        classify: &Dispatcher,
        tagging: &Dispatcher,
    ) -> Option<StageFuture> {
        let fut = match task {
            StageTask::Relatedness(address) => {
                let item = address.resolve(corpus)?;
                let payload = if address.is_reply() {
                    prompts::reply_relatedness_payload(item)
                } else {
                    prompts::post_relatedness_payload(item)
                };
                let directive = directives.get(address.group)?.relatedness.clone();
                classify
                    .submit::<StageTask, RelatednessVerdict>(TaskDescriptor::new(
                        directive, payload, task,
                    ))
                    .map(|c| Completion {
                        location: c.location,
                        outcome: c.outcome.map(StageResponse::Relatedness),
                    })
                    .boxed()
            }
            StageTask::Tagging(address) => {
                let item = address.resolve(corpus)?;
                let payload = if address.is_reply() {
                    let parent = address.parent().resolve(corpus)?;
                    prompts::reply_tagging_payload(item, parent)
                } else {
                    prompts::post_tagging_payload(item)
                };
                let directive = directives.get(address.group)?.tagging.clone();
                tagging
                    .submit::<StageTask, TaggingResponse>(TaskDescriptor::new(
                        directive, payload, task,
                    ))
                    .map(|c| Completion {
                        location: c.location,
                        outcome: c.outcome.map(StageResponse::Tagging),
                    })
                    .boxed()
            }
        };
        Some(fut)
    }

    /// Record a relatedness verdict and return the tasks it unlocks.
    fn apply_relatedness(
        &self,
        corpus: &mut Corpus,
        address: ItemAddress,
        verdict: Option<RelatednessVerdict>,
        state: &mut RunState,
    ) -> Vec<StageTask> {
        let Some(item) = address.resolve_mut(corpus) else {
            warn!(%address, "Completion for unknown item");
            return Vec::new();
        };

        let (relatedness, advertisement) = match verdict {
            Some(v) => {
                let (r, a) = v.into_annotations();
                (r, Some(a))
            }
            None => (Relatedness::not_related(REASON_ANALYSIS_FAILED), None),
        };
        let related = relatedness.related;
        let is_ad = advertisement.as_ref().map(|a| a.is_ad).unwrap_or(false);
        item.annotations.relatedness = Some(relatedness);
        item.annotations.advertisement = advertisement;
        if !related {
            item.annotations.keywords = None;
        }

        let mut follow_ups = Vec::new();
        if address.is_reply() {
            if related {
                state.report.related_replies += 1;
                follow_ups.push(StageTask::Tagging(address));
            } else {
                state.tagging.prune(1);
            }
            return follow_ups;
        }

        if is_ad {
            state.report.ad_posts += 1;
        }

        if related {
            state.report.related_posts += 1;
            follow_ups.push(StageTask::Tagging(address));
            for (r, reply) in item.replies.iter_mut().enumerate() {
                if reply.content.chars().count() < self.settings.min_reply_len {
                    reply.annotations.relatedness =
                        Some(Relatedness::not_related(REASON_REPLY_TOO_SHORT));
                    reply.annotations.keywords = None;
                    state.report.replies_short += 1;
                    state.classify.prune(1);
                    state.tagging.prune(1);
                } else {
                    state.report.replies_dispatched += 1;
                    follow_ups.push(StageTask::Relatedness(ItemAddress::reply(
                        address.group,
                        address.post,
                        r,
                    )));
                }
            }
        } else {
            let pruned = item.replies.len();
            for reply in &mut item.replies {
                reply.annotations.relatedness =
                    Some(Relatedness::not_related(REASON_PARENT_NOT_RELATED));
                reply.annotations.keywords = None;
            }
            state.report.replies_pruned += pruned as u64;
            state.classify.prune(pruned);
            state.tagging.prune(1 + pruned);
        }
        follow_ups
    }

    fn apply_tags(
        &self,
        corpus: &mut Corpus,
        address: ItemAddress,
        response: Option<TaggingResponse>,
        state: &mut RunState,
    ) {
        let Some(item) = address.resolve_mut(corpus) else {
            warn!(%address, "Completion for unknown item");
            return;
        };
        let validated = response
            .map(|r| validate_tags(r, &self.taxonomy))
            .unwrap_or_default();
        state.report.tagged_items += 1;
        state.report.tags_kept += validated.tags.len() as u64;
        state.report.tags_dropped += validated.dropped;
        item.annotations.keywords = Some(validated.tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        group, post, relatedness_reply, reply, single_shot, tags_reply, taxonomy_fixture,
        ScriptedModel, Step,
    };
    use buzzlens_common::Sentiment;

    fn pipeline(model: ScriptedModel) -> (ClassificationPipeline, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let pipeline = ClassificationPipeline::new(
            single_shot(model.clone()),
            taxonomy_fixture(),
            PipelineSettings::default(),
        );
        (pipeline, model)
    }

    #[tokio::test]
    async fn unrelated_post_prunes_replies_without_calls() {
        let model = ScriptedModel::new().on("is_related", "Post:", vec![relatedness_reply(false)]);
        let (pipeline, model) = pipeline(model);
        let mut corpus = vec![group(
            "Harbor Inn",
            vec![post(
                "p1",
                "selling concert tickets",
                vec![reply("r1", "interested, dm me"), reply("r2", "how much for two?")],
            )],
        )];

        let report = pipeline.run(&mut corpus).await;

        assert_eq!(model.call_count(), 1);
        assert_eq!(report.replies_pruned, 2);
        for r in &corpus[0].items[0].replies {
            let verdict = r.annotations.relatedness.as_ref().unwrap();
            assert!(!verdict.related);
            assert_eq!(verdict.reason, REASON_PARENT_NOT_RELATED);
        }
        assert!(corpus[0].items[0].annotations.keywords.is_none());
    }

    #[tokio::test]
    async fn short_reply_threshold_is_exclusive() {
        let model = ScriptedModel::new()
            .on("keywords_mentioned", "", vec![tags_reply(&[])])
            .on("is_related", "Reply:", vec![relatedness_reply(true)])
            .on("is_related", "Post:", vec![relatedness_reply(true)]);
        let (pipeline, model) = pipeline(model);
        let nine = "too short";
        let ten = "long reply";
        assert_eq!((nine.chars().count(), ten.chars().count()), (9, 10));
        let mut corpus = vec![group(
            "Harbor Inn",
            vec![post("p1", "stayed here last week", vec![reply("r9", nine), reply("r10", ten)])],
        )];

        let report = pipeline.run(&mut corpus).await;

        let replies = &corpus[0].items[0].replies;
        assert_eq!(
            replies[0].annotations.relatedness,
            Some(Relatedness::not_related(REASON_REPLY_TOO_SHORT))
        );
        assert!(replies[1].is_related());
        assert_eq!(model.calls_mentioning(&format!("Reply:\n{nine}")), 0);
        assert_eq!(model.calls_mentioning(&format!("Reply:\n{ten}")), 1);
        assert_eq!(report.replies_short, 1);
        assert_eq!(report.replies_dispatched, 1);
    }

    #[tokio::test]
    async fn related_items_are_tagged_with_canonical_keywords() {
        let model = ScriptedModel::new()
            .on(
                "keywords_mentioned",
                "Reply to analyze:\nthe front desk",
                vec![tags_reply(&[("front desk", "negative")])],
            )
            .on(
                "keywords_mentioned",
                "Post:",
                vec![tags_reply(&[("bedquality", "positive"), ("Pool", "positive")])],
            )
            .on("is_related", "", vec![relatedness_reply(true)]);
        let (pipeline, _) = pipeline(model);
        let mut corpus = vec![group(
            "Harbor Inn",
            vec![post(
                "p1",
                "slept like a baby",
                vec![reply("r1", "the front desk lost my booking")],
            )],
        )];

        let report = pipeline.run(&mut corpus).await;

        let p = &corpus[0].items[0];
        assert_eq!(p.tags().len(), 1);
        assert_eq!(p.tags()[0].keyword, "Bed Quality");
        assert_eq!(p.tags()[0].sentiment, Sentiment::Positive);
        assert_eq!(p.replies[0].tags()[0].keyword, "Front Desk");
        assert_eq!(report.tags_kept, 2);
        assert_eq!(report.tags_dropped, 1);
        assert_eq!(report.tagged_items, 2);
    }

    #[tokio::test]
    async fn failed_calls_become_defaults() {
        let model = ScriptedModel::new()
            .on("keywords_mentioned", "", vec![Step::transport("boom")])
            .on("is_related", "broken", vec![Step::text("not json at all")])
            .on("is_related", "", vec![relatedness_reply(true)]);
        let (pipeline, _) = pipeline(model);
        let mut corpus = vec![group(
            "Harbor Inn",
            vec![
                post("p1", "broken answer here", vec![reply("r1", "long enough reply")]),
                post("p2", "good answer here", vec![]),
            ],
        )];

        let report = pipeline.run(&mut corpus).await;

        let failed = &corpus[0].items[0];
        assert_eq!(
            failed.annotations.relatedness,
            Some(Relatedness::not_related(REASON_ANALYSIS_FAILED))
        );
        assert!(!failed.replies[0].is_related());

        let ok = &corpus[0].items[1];
        assert!(ok.is_related());
        assert_eq!(ok.annotations.keywords, Some(Vec::new()));
        assert_eq!(report.classify.no_structured_output, 1);
        assert_eq!(report.tagging.transport_failures, 1);
    }

    #[tokio::test]
    async fn empty_corpus_issues_no_calls() {
        let (pipeline, model) = pipeline(ScriptedModel::new());
        let mut corpus = Vec::new();
        let report = pipeline.run(&mut corpus).await;
        assert_eq!(report.calls_issued(), 0);
        assert_eq!(model.call_count(), 0);
    }
}

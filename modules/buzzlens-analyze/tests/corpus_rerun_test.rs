//! Integration test: persistence and re-run idempotence at the corpus level.

use std::sync::Arc;

use buzzlens_analyze::corpus::{
    merge_by_content, merge_corpus, select_unanalyzed, CorpusStore, JsonFileStore,
};
use buzzlens_analyze::pipeline::{ClassificationPipeline, PipelineSettings};
use buzzlens_analyze::testing::{
    group, post, relatedness_reply, reply, single_shot, tags_reply, taxonomy_fixture,
    MemoryStore, ScriptedModel,
};
use buzzlens_common::{Corpus, SummaryRecord, ThemeSummaryCollection};

fn raw_corpus() -> Corpus {
    vec![
        group(
            "Harbor Inn",
            vec![
                post("p1", "Front desk upgraded our room", vec![reply("r1", "lucky you, nice staff")]),
                post("p2", "Pool closed all week", vec![]),
            ],
        ),
        group("Seaside Lodge", vec![post("p3", "Noisy construction next door", vec![])]),
    ]
}

fn model() -> Arc<ScriptedModel> {
    Arc::new(
        ScriptedModel::new()
            .on("keywords_mentioned", "", vec![tags_reply(&[("Front Desk", "positive")])])
            .on("is_related", "", vec![relatedness_reply(true)]),
    )
}

async fn analyze(store: &MemoryStore, model: Arc<ScriptedModel>) -> usize {
    let raw = store.load("hotels.raw").await.unwrap();
    let mut analyzed = store.load("hotels").await.unwrap();
    let mut pending = select_unanalyzed(&raw, &analyzed);
    ClassificationPipeline::new(single_shot(model), taxonomy_fixture(), PipelineSettings::default())
        .run(&mut pending)
        .await;
    let added = merge_corpus(&mut analyzed, pending);
    store.save("hotels", &analyzed).await.unwrap();
    added
}

#[tokio::test]
async fn second_run_over_same_raw_data_is_a_no_op() {
    let store = MemoryStore::new().with("hotels.raw", raw_corpus());

    let first_model = model();
    assert_eq!(analyze(&store, first_model.clone()).await, 3);
    let after_first = store.get("hotels").unwrap();
    assert!(first_model.call_count() > 0);

    let second_model = model();
    assert_eq!(analyze(&store, second_model.clone()).await, 0);
    assert_eq!(second_model.call_count(), 0);
    assert_eq!(store.get("hotels").unwrap(), after_first);
    assert_eq!(store.save_count(), 2);
}

#[tokio::test]
async fn only_new_posts_are_sent_on_a_later_run() {
    let store = MemoryStore::new().with("hotels.raw", raw_corpus());
    analyze(&store, model()).await;

    let mut raw = raw_corpus();
    raw[0].items.push(post("p4", "Breakfast buffet was cold", vec![]));
    store.save("hotels.raw", &raw).await.unwrap();

    let later = model();
    assert_eq!(analyze(&store, later.clone()).await, 1);
    assert_eq!(later.calls_mentioning("Breakfast buffet"), later.call_count());
    let analyzed = store.get("hotels").unwrap();
    assert_eq!(analyzed[0].items.len(), 3);
}

#[test]
fn merging_an_item_with_existing_content_keeps_corpus_size() {
    let mut corpus = raw_corpus();
    let before: usize = corpus.iter().map(|g| g.items.len()).sum();

    merge_by_content(
        &mut corpus,
        group("Harbor Inn", vec![post("other-id", "Pool closed all week", vec![])]),
    );

    let after: usize = corpus.iter().map(|g| g.items.len()).sum();
    assert_eq!(before, after);
}

#[tokio::test]
async fn json_file_store_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("data"));

    assert!(store.load("missing").await.unwrap().is_empty());
    assert!(store.load_summaries("missing").await.unwrap().is_empty());

    let corpus = raw_corpus();
    store.save("hotels", &corpus).await.unwrap();
    assert!(store.corpus_path("hotels").exists());
    assert_eq!(store.load("hotels").await.unwrap(), corpus);

    let mut summaries = ThemeSummaryCollection::new();
    summaries.insert(
        "Service / Front Desk".into(),
        vec![SummaryRecord::new("Staff are helpful", vec!["free upgrade".into()])],
    );
    store.save_summaries("hotels.Harbor Inn", &summaries).await.unwrap();
    assert_eq!(store.load_summaries("hotels.Harbor Inn").await.unwrap(), summaries);
}

#[tokio::test]
async fn corrupt_file_is_an_error_not_an_empty_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    std::fs::write(store.corpus_path("broken"), "{ not json").unwrap();
    assert!(store.load("broken").await.is_err());
}

//! Integration test: tagged or distributed corpus → themes → summaries → merge.

use std::sync::Arc;

use serde_json::json;

use buzzlens_analyze::distribute::{count_themes, question_contents, ThemeDistributor};
use buzzlens_analyze::merge::MergeReducer;
use buzzlens_analyze::pipeline::{ClassificationPipeline, PipelineSettings};
use buzzlens_analyze::testing::{
    group, json_block, post, question_fixture, relatedness_reply, reply, single_shot, tags_reply,
    taxonomy_fixture, ScriptedModel, Step,
};
use buzzlens_analyze::themes::{collect_by_keyword, keyword_themes, ThemeSummarizer};
use buzzlens_common::{SummaryRecord, ThemeSummaryCollection};

#[tokio::test]
async fn tagged_feedback_becomes_merged_summaries() {
    let model = Arc::new(
        ScriptedModel::new()
            .on("keywords_mentioned", "", vec![tags_reply(&[("Front Desk", "negative")])])
            .on("is_related", "", vec![relatedness_reply(true)])
            .on(
                "You summarize customer feedback",
                "",
                vec![Step::text(json_block(&json!([
                    {"summary": "Check-in is slow", "points": ["long queue", "queue was long"]},
                    {"summary": "Slow check-in", "points": ["waited an hour"]}
                ])))],
            )
            .on(
                "summary records",
                "",
                vec![Step::text(json_block(&json!([
                    {"summary": "Check-in is slow", "points": ["long queue", "queue was long", "waited an hour"]}
                ])))],
            )
            .on(
                "bullet points",
                "",
                vec![Step::text(json_block(&json!(["long queue", "waited an hour"])))],
            ),
    );
    let inference = single_shot(model.clone());
    let taxonomy = taxonomy_fixture();

    let mut corpus = vec![group(
        "Harbor Inn",
        vec![post(
            "p1",
            "Check-in queue at the front desk was endless",
            vec![reply("r1", "we waited an hour at reception")],
        )],
    )];
    ClassificationPipeline::new(inference.clone(), taxonomy.clone(), PipelineSettings::default())
        .run(&mut corpus)
        .await;

    let themes = keyword_themes(&collect_by_keyword(&corpus, "Harbor Inn", &taxonomy));
    assert_eq!(themes.len(), 1);
    assert_eq!(themes["Service / Front Desk"].len(), 2);

    let (summaries, calls) = ThemeSummarizer::new(inference.clone(), 4)
        .summarize(&themes)
        .await;
    assert_eq!(calls.completed, 1);
    assert_eq!(summaries["Service / Front Desk"].len(), 2);

    let (merged, report) = MergeReducer::new(inference, 4).merge(summaries).await;
    assert_eq!(
        merged["Service / Front Desk"],
        vec![SummaryRecord::new(
            "Check-in is slow",
            vec!["long queue".into(), "waited an hour".into()]
        )]
    );
    assert_eq!(report.fallbacks, 0);
    assert_eq!((report.records_in, report.records_out), (2, 1));
}

#[tokio::test]
async fn merge_never_empties_a_non_empty_collection() {
    // Every merge call answers with an empty list or garbage.
    let model = Arc::new(
        ScriptedModel::new()
            .on("summary records", "", vec![Step::text(json_block(&json!([])))])
            .on("bullet points", "", vec![Step::text("no block at all")]),
    );
    let reducer = MergeReducer::new(single_shot(model), 2);

    let mut input = ThemeSummaryCollection::new();
    input.insert(
        "Room Comfort / Noise".into(),
        vec![
            SummaryRecord::new("Street noise at night", vec!["trams".into(), "bars".into()]),
            SummaryRecord::new("Thin walls", vec!["hear neighbours".into()]),
        ],
    );
    input.insert(
        "Service / Front Desk".into(),
        vec![SummaryRecord::new("Friendly staff", vec!["smiles".into(), "helpful".into()])],
    );

    let (merged, report) = reducer.merge(input.clone()).await;
    assert_eq!(merged, input);
    // One theme-level fallback, two point-level fallbacks.
    assert_eq!(report.fallbacks, 3);
}

#[tokio::test]
async fn distributed_feedback_is_summarized_per_question() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(
                "research questions",
                "picked it for the beach",
                vec![Step::text(json_block(&json!({"themes": ["A"]})))],
            )
            .on(
                "research questions",
                "almost went elsewhere",
                vec![Step::text(json_block(&json!({"themes": ["b", "A"]})))],
            )
            .on("research questions", "", vec![Step::text(json_block(&json!({"themes": []})))])
            .on(
                "Why guests decided to book",
                "",
                vec![Step::text(json_block(&json!([
                    {"summary": "Beach access drove bookings", "points": ["beach"]}
                ])))],
            )
            .on(
                "Why guests hesitated before booking",
                "",
                vec![Step::text(json_block(&json!([
                    {"summary": "Price made guests hesitate", "points": ["price"]}
                ])))],
            ),
    );
    let inference = single_shot(model.clone());

    let mut corpus = vec![group(
        "Harbor Inn",
        vec![post(
            "p1",
            "picked it for the beach",
            vec![reply("r1", "almost went elsewhere, the price"), reply("r2", "ok")],
        )],
    )];
    let report = ThemeDistributor::new(inference.clone(), question_fixture(), 4)
        .distribute(&mut corpus)
        .await;
    assert_eq!((report.assigned, report.unassigned), (2, 1));

    let counts = count_themes(&corpus);
    assert_eq!(counts["A"].count, 2);
    assert_eq!(counts["B"].content, vec!["almost went elsewhere, the price"]);
    assert!(!counts.contains_key("C"));

    let questions = question_fixture();
    let (summaries, calls) = ThemeSummarizer::new(inference.clone(), 4)
        .summarize_with(&question_contents(&counts), |id| {
            questions.text(id).unwrap_or(id).to_string()
        })
        .await;
    assert_eq!(calls.completed, 2);

    let (merged, _) = MergeReducer::new(inference, 4).merge(summaries).await;
    assert_eq!(merged["A"][0].summary, "Beach access drove bookings");
    assert_eq!(merged["B"][0].summary, "Price made guests hesitate");
    assert_eq!(model.call_count(), 5);
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::{ChatModel, OpenAi};
use buzzlens_analyze::aggregate::aggregate;
use buzzlens_analyze::corpus::{
    filter_by_window, merge_corpus, select_unanalyzed, CorpusStore, JsonFileStore,
};
use buzzlens_analyze::distribute::{count_themes, question_contents, ThemeDistributor};
use buzzlens_analyze::infer::{InferenceSettings, StructuredInference};
use buzzlens_analyze::merge::MergeReducer;
use buzzlens_analyze::pipeline::{ClassificationPipeline, PipelineSettings};
use buzzlens_analyze::themes::{collect_by_keyword, keyword_themes, ThemeSummarizer};
use buzzlens_common::{Config, QuestionSet, Taxonomy};

#[derive(Parser)]
#[command(name = "buzzlens", about = "Social media feedback analysis")]
struct Cli {
    /// Keyword taxonomy file.
    #[arg(long, global = true, default_value = "keywords.json")]
    keywords: PathBuf,

    /// Question set file, used by `distribute` and `summarize-questions`.
    #[arg(long, global = true, default_value = "questions.json")]
    questions: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify and tag posts in `<key>.raw` not yet in `<key>`, then merge them in.
    Analyze {
        key: String,
        /// Only posts and replies at or after this instant (RFC 3339).
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Only posts and replies at or before this instant (RFC 3339).
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
    /// Print the keyword sentiment table for `<key>` as JSON.
    Report {
        key: String,
        /// Flattened rows instead of the nested table.
        #[arg(long)]
        rows: bool,
    },
    /// Summarize one group's feedback per keyword and merge the summaries.
    Summarize { key: String, group: String },
    /// Re-run the merge over stored summaries.
    MergeSummaries { key: String, group: String },
    /// Assign every post and reply in `<key>` to the questions it answers.
    Distribute { key: String },
    /// Summarize the contents answering each question and merge the summaries.
    SummarizeQuestions { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("buzzlens=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let taxonomy = Arc::new(Taxonomy::load(&cli.keywords)?);
    if taxonomy.is_empty() {
        bail!("keyword taxonomy {} is empty", cli.keywords.display());
    }
    info!(keywords = taxonomy.len(), "Taxonomy loaded");

    let mut client = OpenAi::new(&config.openai_api_key);
    if let Some(base) = &config.openai_api_base {
        client = client.with_base_url(base);
    }
    let model: Arc<dyn ChatModel> = Arc::new(client);
    let inference = Arc::new(StructuredInference::new(
        model,
        InferenceSettings::from(&config),
    ));
    let store = JsonFileStore::new(&config.data_dir);

    match cli.command {
        Command::Analyze { key, since, until } => {
            let raw = store.load(&format!("{key}.raw")).await?;
            let mut analyzed = store.load(&key).await?;

            let mut pending = select_unanalyzed(&raw, &analyzed);
            if since.is_some() || until.is_some() {
                pending = filter_by_window(
                    pending,
                    since.unwrap_or(DateTime::<Utc>::MIN_UTC),
                    until.unwrap_or(DateTime::<Utc>::MAX_UTC),
                );
            }
            info!(key = key.as_str(), groups = pending.len(), "Analyzing new posts");

            let pipeline = ClassificationPipeline::new(
                inference,
                taxonomy,
                PipelineSettings::from(&config),
            );
            let report = pipeline.run(&mut pending).await;
            let added = merge_corpus(&mut analyzed, pending);
            store.save(&key, &analyzed).await?;

            println!("{report}");
            info!(key = key.as_str(), added, "Analyzed corpus saved");
        }
        Command::Report { key, rows } => {
            let analyzed = store.load(&key).await?;
            let table = aggregate(&analyzed, &taxonomy);
            let out = if rows {
                serde_json::to_string_pretty(&table.rows(&taxonomy))?
            } else {
                serde_json::to_string_pretty(&table)?
            };
            println!("{out}");
        }
        Command::Summarize { key, group } => {
            let analyzed = store.load(&key).await?;
            let themes = keyword_themes(&collect_by_keyword(&analyzed, &group, &taxonomy));
            info!(group = group.as_str(), themes = themes.len(), "Summarizing themes");

            let summarizer = ThemeSummarizer::new(inference.clone(), config.merge_concurrency);
            let (summaries, calls) = summarizer.summarize(&themes).await;
            info!(calls = calls.completed, failed = calls.failed(), "Summaries generated");

            let reducer = MergeReducer::new(inference, config.merge_concurrency);
            let (merged, report) = reducer.merge(summaries).await;
            store.save_summaries(&format!("{key}.{group}"), &merged).await?;
            println!("{report}");
        }
        Command::MergeSummaries { key, group } => {
            let summaries_key = format!("{key}.{group}");
            let summaries = store.load_summaries(&summaries_key).await?;
            let reducer = MergeReducer::new(inference, config.merge_concurrency);
            let (merged, report) = reducer.merge(summaries).await;
            store.save_summaries(&summaries_key, &merged).await?;
            println!("{report}");
        }
        Command::Distribute { key } => {
            let questions = load_questions(&cli.questions)?;
            let mut analyzed = store.load(&key).await?;
            let distributor =
                ThemeDistributor::new(inference, questions, config.distribute_concurrency);
            let report = distributor.distribute(&mut analyzed).await;
            store.save(&key, &analyzed).await?;

            println!("{report}");
            for (id, count) in count_themes(&analyzed) {
                info!(question = id.as_str(), count = count.count, "Question answered");
            }
        }
        Command::SummarizeQuestions { key } => {
            let questions = load_questions(&cli.questions)?;
            let analyzed = store.load(&key).await?;
            let contents = question_contents(&count_themes(&analyzed));
            info!(questions = contents.len(), "Summarizing questions");

            let summarizer = ThemeSummarizer::new(inference.clone(), config.merge_concurrency);
            let (summaries, calls) = summarizer
                .summarize_with(&contents, |id| questions.text(id).unwrap_or(id).to_string())
                .await;
            info!(calls = calls.completed, failed = calls.failed(), "Summaries generated");

            let reducer = MergeReducer::new(inference, config.merge_concurrency);
            let (merged, report) = reducer.merge(summaries).await;
            store.save_summaries(&format!("{key}.questions"), &merged).await?;
            println!("{report}");
        }
    }

    Ok(())
}

fn load_questions(path: &Path) -> Result<Arc<QuestionSet>> {
    let questions = QuestionSet::load(path)?;
    if questions.is_empty() {
        bail!("question set {} is empty", path.display());
    }
    info!(questions = questions.len(), "Question set loaded");
    Ok(Arc::new(questions))
}

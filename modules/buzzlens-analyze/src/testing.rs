// Test mocks for the analysis pipeline.
//
// Two mocks matching the two trait boundaries:
// - ScriptedModel (ChatModel): needle-matched scripted replies, call log
// - MemoryStore (CorpusStore): in-memory corpus map
//
// Plus fixture builders for items, groups, a small taxonomy and a small
// question set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_client::{AiError, ChatCompletion, ChatModel, MessageRole};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use buzzlens_common::{Corpus, Group, Item, QuestionSet, Taxonomy};

use crate::corpus::CorpusStore;
use crate::infer::{InferenceSettings, StructuredInference};

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// What the model does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Transport(String),
}

impl Step {
    pub fn text(text: impl Into<String>) -> Self {
        Step::Text(text.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Step::Transport(message.into())
    }
}

struct Rule {
    system_needle: String,
    user_needle: String,
    steps: Vec<Step>,
    cursor: usize,
    delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub user: String,
}

/// Rule-based `ChatModel`. The first rule whose needles are contained in the
/// system and user messages answers. Its steps are played in order and the
/// last one repeats. Calls matching no rule fail at the transport level.
pub struct ScriptedModel {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on(self, system_needle: &str, user_needle: &str, steps: Vec<Step>) -> Self {
        self.push_rule(system_needle, user_needle, steps, None)
    }

    pub fn on_delayed(
        self,
        system_needle: &str,
        user_needle: &str,
        delay: Duration,
        steps: Vec<Step>,
    ) -> Self {
        self.push_rule(system_needle, user_needle, steps, Some(delay))
    }

    /// Delay applied to every call that has no rule-specific delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push_rule(
        self,
        system_needle: &str,
        user_needle: &str,
        steps: Vec<Step>,
        delay: Option<Duration>,
    ) -> Self {
        self.rules.lock().unwrap().push(Rule {
            system_needle: system_needle.to_string(),
            user_needle: user_needle.to_string(),
            steps,
            cursor: 0,
            delay,
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of calls whose user message contains `needle`.
    pub fn calls_mentioning(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user.contains(needle))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, system: &str, user: &str) -> (Option<Step>, Option<Duration>) {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules
            .iter_mut()
            .find(|r| system.contains(&r.system_needle) && user.contains(&r.user_needle))
        else {
            return (None, self.delay);
        };
        let step = rule
            .steps
            .get(rule.cursor)
            .or_else(|| rule.steps.last())
            .cloned();
        rule.cursor += 1;
        (step, rule.delay.or(self.delay))
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ChatCompletion) -> Result<String, AiError> {
        let system = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let user = request.last_user_content().to_string();

        let (step, delay) = self.next_step(&system, &user);
        self.calls.lock().unwrap().push(RecordedCall {
            system,
            user,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Some(Step::Text(text)) => Ok(text),
            Some(Step::Transport(msg)) => Err(AiError::Network(msg)),
            None => Err(AiError::Network("no scripted response".to_string())),
        }
    }
}

/// Wrap a value the way a compliant generator would.
pub fn json_block(value: &Value) -> String {
    format!("Here is the result:\n```json\n{}\n```", serde_json::to_string_pretty(value).unwrap())
}

pub fn relatedness_reply(related: bool) -> Step {
    Step::text(json_block(&json!({
        "is_related": related,
        "is_related_reason": if related { "talks about the stay" } else { "off topic" },
        "is_ad": false,
        "is_ad_reason": "no promotion",
    })))
}

/// Tagging reply with `(keyword, sentiment)` pairs, all listed as secondary.
pub fn tags_reply(tags: &[(&str, &str)]) -> Step {
    let listed: Vec<Value> = tags
        .iter()
        .map(|(k, s)| json!({ "keyword": k, "sentiment": s }))
        .collect();
    Step::text(json_block(&json!({
        "keywords_mentioned": { "primary_keyword": [], "secondary_keyword": listed }
    })))
}

/// Inference over `model` with a single attempt per call.
pub fn single_shot(model: Arc<ScriptedModel>) -> Arc<StructuredInference> {
    Arc::new(StructuredInference::new(
        model,
        InferenceSettings::builder().retry_budget(1).build(),
    ))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    corpora: Mutex<HashMap<String, Corpus>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, corpus: Corpus) -> Self {
        self.corpora.lock().unwrap().insert(key.to_string(), corpus);
        self
    }

    pub fn get(&self, key: &str) -> Option<Corpus> {
        self.corpora.lock().unwrap().get(key).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CorpusStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Corpus> {
        Ok(self.get(key).unwrap_or_default())
    }

    async fn save(&self, key: &str, corpus: &Corpus) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.corpora
            .lock()
            .unwrap()
            .insert(key.to_string(), corpus.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Midnight UTC on the given day of March 2025.
pub fn march(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap()
}

pub fn post(identity: &str, content: &str, replies: Vec<Item>) -> Item {
    Item::new(identity, content, march(1)).with_replies(replies)
}

pub fn reply(identity: &str, content: &str) -> Item {
    Item::new(identity, content, march(2))
}

pub fn group(key: &str, items: Vec<Item>) -> Group {
    Group::new(key, items)
}

/// Two primaries, three secondaries.
pub fn taxonomy_fixture() -> Arc<Taxonomy> {
    let raw = r#"[
        {"primary_keyword": "Room Comfort",
         "secondary_keywords": [{"keyword": "Bed Quality"}, {"keyword": "Noise"}]},
        {"primary_keyword": "Service",
         "secondary_keywords": [{"keyword": "Front Desk"}]}
    ]"#;
    Arc::new(Taxonomy::from_json(raw).unwrap())
}

/// Three questions, ids `A` to `C`.
pub fn question_fixture() -> Arc<QuestionSet> {
    let raw = r#"{
        "A": "Why guests decided to book",
        "B": "Why guests hesitated before booking",
        "C": "Why guests chose another hotel"
    }"#;
    Arc::new(QuestionSet::from_json(raw).unwrap())
}

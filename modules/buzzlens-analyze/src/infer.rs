//! One fallible structured call to the text generator.
//!
//! The generator is asked for a ```` ```json ```` fenced block. Anything that
//! does not yield a parseable block (no block, bad JSON, wrong shape) is
//! retried with a corrective instruction appended to the payload. Transport
//! errors are retried against the same budget. Neither ever becomes an `Err`:
//! callers get an [`InferenceOutcome`] value and decide on a default.

use std::sync::Arc;
use std::time::Duration;

use ai_client::{extract_fenced_json, response_schema, AiError, ChatCompletion, ChatModel};
use buzzlens_common::Config;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

const CORRECTIVE_INSTRUCTION: &str = "\n\n**Return the result strictly in the required JSON format, \
inside a ```json fenced block. Make sure the JSON is valid and add no explanations or comments.**";

#[derive(Debug, Clone, TypedBuilder)]
pub struct InferenceSettings {
    #[builder(default = "gpt-4.1-mini".to_string(), setter(into))]
    pub model: String,
    #[builder(default = 0.8)]
    pub temperature: f32,
    /// Total attempts per call, shared by format and transport failures.
    #[builder(default = 3)]
    pub retry_budget: u32,
    #[builder(default = Duration::from_secs(300))]
    pub timeout: Duration,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&Config> for InferenceSettings {
    fn from(config: &Config) -> Self {
        Self::builder()
            .model(config.model.clone())
            .temperature(config.temperature)
            .retry_budget(config.retry_budget)
            .timeout(config.timeout)
            .build()
    }
}

/// Result of one structured call. Every variant is an ordinary value.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome<T> {
    Structured(T),
    /// The generator answered, but never with a usable block.
    NoStructuredOutput { attempts: u32, last_problem: String },
    /// The last attempt failed at the transport level (network, HTTP, timeout).
    TransportFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Structured,
    NoStructuredOutput,
    TransportFailure,
}

impl<T> InferenceOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            InferenceOutcome::Structured(_) => OutcomeKind::Structured,
            InferenceOutcome::NoStructuredOutput { .. } => OutcomeKind::NoStructuredOutput,
            InferenceOutcome::TransportFailure(_) => OutcomeKind::TransportFailure,
        }
    }

    pub fn structured(self) -> Option<T> {
        match self {
            InferenceOutcome::Structured(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> InferenceOutcome<U> {
        match self {
            InferenceOutcome::Structured(v) => InferenceOutcome::Structured(f(v)),
            InferenceOutcome::NoStructuredOutput {
                attempts,
                last_problem,
            } => InferenceOutcome::NoStructuredOutput {
                attempts,
                last_problem,
            },
            InferenceOutcome::TransportFailure(e) => InferenceOutcome::TransportFailure(e),
        }
    }
}

enum Attempt<T> {
    Parsed(T),
    Malformed(String),
    Transport(AiError),
}

/// Structured inference over any [`ChatModel`].
pub struct StructuredInference {
    model: Arc<dyn ChatModel>,
    settings: InferenceSettings,
}

impl StructuredInference {
    pub fn new(model: Arc<dyn ChatModel>, settings: InferenceSettings) -> Self {
        Self { model, settings }
    }

    pub fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    /// `directive` followed by the JSON schema the fenced block must match.
    pub fn with_schema_hint<T: JsonSchema>(directive: &str) -> String {
        let schema = serde_json::to_string_pretty(&response_schema::<T>()).unwrap_or_default();
        format!(
            "{directive}\n\nReply with a single ```json fenced block matching this schema:\n{schema}"
        )
    }

    /// `directive` goes out as the system message, `payload` as the user
    /// message. Only the payload is amended between attempts.
    pub async fn infer<T: DeserializeOwned>(
        &self,
        directive: &str,
        payload: &str,
    ) -> InferenceOutcome<T> {
        let budget = self.settings.retry_budget.max(1);
        let mut payload = payload.to_string();
        let mut last: Option<Attempt<()>> = None;

        for attempt in 1..=budget {
            match self.attempt::<T>(directive, &payload).await {
                Attempt::Parsed(value) => return InferenceOutcome::Structured(value),
                Attempt::Malformed(problem) => {
                    debug!(attempt, budget, problem = problem.as_str(), "Malformed structured output");
                    payload.push_str(&corrective_instruction(&problem));
                    last = Some(Attempt::Malformed(problem));
                }
                Attempt::Transport(e) => {
                    warn!(attempt, budget, error = %e, "Generator call failed");
                    let transient = e.is_transient();
                    last = Some(Attempt::Transport(e));
                    if !transient {
                        break;
                    }
                }
            }
        }

        match last {
            Some(Attempt::Transport(e)) => InferenceOutcome::TransportFailure(e.to_string()),
            Some(Attempt::Malformed(problem)) => InferenceOutcome::NoStructuredOutput {
                attempts: budget,
                last_problem: problem,
            },
            _ => InferenceOutcome::NoStructuredOutput {
                attempts: budget,
                last_problem: "no attempt made".to_string(),
            },
        }
    }

    async fn attempt<T: DeserializeOwned>(&self, directive: &str, payload: &str) -> Attempt<T> {
        let request = ChatCompletion::new(&self.settings.model)
            .system(directive)
            .user(payload)
            .temperature(self.settings.temperature)
            .timeout(self.settings.timeout);

        let response =
            match tokio::time::timeout(self.settings.timeout, self.model.complete(request)).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => return Attempt::Transport(e),
                Err(_) => return Attempt::Transport(AiError::Timeout(self.settings.timeout)),
            };

        let Some(block) = extract_fenced_json(&response) else {
            return Attempt::Malformed(String::new());
        };

        match serde_json::from_str::<T>(block) {
            Ok(value) => Attempt::Parsed(value),
            Err(e) => Attempt::Malformed(e.to_string()),
        }
    }
}

fn corrective_instruction(problem: &str) -> String {
    if problem.is_empty() {
        CORRECTIVE_INSTRUCTION.to_string()
    } else {
        format!("{CORRECTIVE_INSTRUCTION}\nAvoid the following error:\n```\n{problem}\n```")
    }
}

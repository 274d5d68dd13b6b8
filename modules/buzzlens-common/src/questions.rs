use std::collections::BTreeMap;
use std::path::Path;

use crate::error::BuzzError;

/// Fixed set of research questions items are distributed over, keyed by a
/// short id (e.g. `"A"`).
///
/// Read-only once built. Ids are unique under whitespace- and
/// case-insensitive comparison.
#[derive(Debug, Clone)]
pub struct QuestionSet {
    questions: BTreeMap<String, String>,
    by_normalized: BTreeMap<String, String>,
}

impl QuestionSet {
    pub fn new(questions: BTreeMap<String, String>) -> Result<Self, BuzzError> {
        let mut cleaned = BTreeMap::new();
        let mut by_normalized = BTreeMap::new();

        for (id, text) in questions {
            let id = id.trim().to_string();
            let normalized = normalize(&id);
            if normalized.is_empty() {
                return Err(BuzzError::Questions("empty question id".into()));
            }
            if text.trim().is_empty() {
                return Err(BuzzError::Questions(format!("question {id:?} has no text")));
            }
            if let Some(existing) = by_normalized.insert(normalized, id.clone()) {
                return Err(BuzzError::Questions(format!(
                    "question id {id:?} collides with {existing:?}"
                )));
            }
            cleaned.insert(id, text.trim().to_string());
        }

        Ok(Self {
            questions: cleaned,
            by_normalized,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, BuzzError> {
        let questions: BTreeMap<String, String> = serde_json::from_str(raw)?;
        Self::new(questions)
    }

    /// Load the questions file: a JSON object of id → question text.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BuzzError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BuzzError::Questions(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Canonical id for a model-produced one, if it names a question.
    pub fn canonicalize(&self, raw: &str) -> Option<&str> {
        self.by_normalized.get(&normalize(raw)).map(String::as_str)
    }

    pub fn text(&self, id: &str) -> Option<&str> {
        self.questions.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// `id: text` lines in id order, for inclusion in prompts.
    pub fn describe(&self) -> String {
        self.questions
            .iter()
            .map(|(id, text)| format!("{id}: {text}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn normalize(id: &str) -> String {
    id.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// --- Corpus ---

/// A post or a reply. Replies are items whose own `replies` list is empty.
///
/// `content`, `timestamp` and `identity` are set by ingestion and never
/// rewritten by analysis; analysis only fills `annotations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable platform- or content-derived key.
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub replies: Vec<Item>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Item {
    pub fn new(
        identity: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: identity.into(),
            title: None,
            content: content.into(),
            timestamp,
            replies: Vec::new(),
            annotations: Annotations::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_replies(mut self, replies: Vec<Item>) -> Self {
        self.replies = replies;
        self
    }

    /// Title and content joined the way classification sees a post. The
    /// separator is present even when there is no title.
    pub fn full_text(&self) -> String {
        format!("{}\n{}", self.title.as_deref().unwrap_or(""), self.content)
    }

    /// True only when classification concluded the item is on-topic.
    pub fn is_related(&self) -> bool {
        self.annotations
            .relatedness
            .as_ref()
            .map(|r| r.related)
            .unwrap_or(false)
    }

    pub fn tags(&self) -> &[KeywordTag] {
        self.annotations.keywords.as_deref().unwrap_or(&[])
    }

    pub fn themes(&self) -> &[String] {
        self.annotations.themes.as_deref().unwrap_or(&[])
    }
}

/// Items collected for one subject (e.g. one hotel brand), as supplied by
/// ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub key: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Group {
    pub fn new(key: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            key: key.into(),
            items,
        }
    }

    /// Posts plus all of their replies.
    pub fn item_count(&self) -> usize {
        self.items.iter().map(|p| 1 + p.replies.len()).sum()
    }
}

pub type Corpus = Vec<Group>;

// --- Annotations ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relatedness: Option<Relatedness>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertisement: Option<Advertisement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<KeywordTag>>,
    /// Question ids the item speaks to. `Some(vec![])` once distributed with
    /// no match or a failed call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relatedness {
    pub related: bool,
    pub reason: String,
}

impl Relatedness {
    pub fn related(reason: impl Into<String>) -> Self {
        Self {
            related: true,
            reason: reason.into(),
        }
    }

    pub fn not_related(reason: impl Into<String>) -> Self {
        Self {
            related: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub is_ad: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeywordLevel {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    /// Lenient parse of a model-produced label.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
        }
    }
}

/// A taxonomy keyword mentioned by an item, already canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTag {
    pub keyword: String,
    pub level: KeywordLevel,
    pub sentiment: Sentiment,
}

// --- Sentiment counts ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
}

impl SentimentDistribution {
    pub fn new(positive: u64, neutral: u64, negative: u64) -> Self {
        Self {
            positive,
            neutral,
            negative,
        }
    }

    pub fn add(&mut self, sentiment: Sentiment, weight: u64) {
        match sentiment {
            Sentiment::Positive => self.positive += weight,
            Sentiment::Neutral => self.neutral += weight,
            Sentiment::Negative => self.negative += weight,
        }
    }

    pub fn total(&self) -> u64 {
        self.positive + self.neutral + self.negative
    }

    /// `(positive - negative) / total * 100`, or 0 when there is no signal.
    pub fn score(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.positive as f64 - self.negative as f64) / total as f64 * 100.0
    }
}

// --- Summaries ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SummaryRecord {
    pub summary: String,
    #[serde(default)]
    pub points: Vec<String>,
}

impl SummaryRecord {
    pub fn new(summary: impl Into<String>, points: Vec<String>) -> Self {
        Self {
            summary: summary.into(),
            points,
        }
    }
}

/// Theme → summaries generated for it. Ordered so serialized output is stable.
pub type ThemeSummaryCollection = BTreeMap<String, Vec<SummaryRecord>>;

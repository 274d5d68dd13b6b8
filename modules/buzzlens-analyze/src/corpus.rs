//! Corpus persistence and the set operations re-runs rely on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use buzzlens_common::{Corpus, Group, ThemeSummaryCollection};

/// Keyed corpus storage.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// A key that was never saved loads as an empty corpus.
    async fn load(&self, key: &str) -> Result<Corpus>;
    async fn save(&self, key: &str, corpus: &Corpus) -> Result<()>;
}

/// One pretty-printed JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn corpus_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn summaries_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.summaries.json"))
    }

    pub async fn load_summaries(&self, key: &str) -> Result<ThemeSummaryCollection> {
        Ok(read_json(&self.summaries_path(key)).await?.unwrap_or_default())
    }

    pub async fn save_summaries(&self, key: &str, summaries: &ThemeSummaryCollection) -> Result<()> {
        write_json(&self.summaries_path(key), summaries).await
    }
}

#[async_trait]
impl CorpusStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Corpus> {
        Ok(read_json(&self.corpus_path(key)).await?.unwrap_or_default())
    }

    async fn save(&self, key: &str, corpus: &Corpus) -> Result<()> {
        write_json(&self.corpus_path(key), corpus).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No stored file, starting empty");
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

/// Write to a sibling temp file, then rename over the target.
async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, raw)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    debug!(path = %path.display(), "Saved");
    Ok(())
}

/// Add `incoming`'s posts to the group with the same key, skipping any post
/// whose content already exists there or earlier in `incoming`. An unseen key
/// becomes a new group when at least one post survives. Returns the number of
/// posts added.
pub fn merge_by_content(corpus: &mut Corpus, incoming: Group) -> usize {
    let Group { key, items } = incoming;
    let position = corpus.iter().position(|g| g.key == key);

    let mut seen: HashSet<String> = match position {
        Some(i) => corpus[i].items.iter().map(|p| p.content.clone()).collect(),
        None => HashSet::new(),
    };
    let fresh: Vec<_> = items
        .into_iter()
        .filter(|p| seen.insert(p.content.clone()))
        .collect();
    let added = fresh.len();

    match position {
        Some(i) => corpus[i].items.extend(fresh),
        None if !fresh.is_empty() => corpus.push(Group::new(key, fresh)),
        None => {}
    }
    added
}

/// [`merge_by_content`] for every group of `incoming`.
pub fn merge_corpus(corpus: &mut Corpus, incoming: Corpus) -> usize {
    incoming
        .into_iter()
        .map(|group| merge_by_content(corpus, group))
        .sum()
}

/// Posts of `raw` whose identity appears nowhere in `analyzed`. Groups left
/// with no posts are dropped.
pub fn select_unanalyzed(raw: &Corpus, analyzed: &Corpus) -> Corpus {
    let done: HashSet<&str> = analyzed
        .iter()
        .flat_map(|g| g.items.iter().map(|p| p.identity.as_str()))
        .collect();

    raw.iter()
        .filter_map(|group| {
            let items: Vec<_> = group
                .items
                .iter()
                .filter(|p| !done.contains(p.identity.as_str()))
                .cloned()
                .collect();
            (!items.is_empty()).then(|| Group::new(group.key.clone(), items))
        })
        .collect()
}

/// Keep posts timestamped within `[start, end]`, and only their replies that
/// fall inside the same window. Groups left with no posts are dropped.
pub fn filter_by_window(corpus: Corpus, start: DateTime<Utc>, end: DateTime<Utc>) -> Corpus {
    let within = |ts: &DateTime<Utc>| *ts >= start && *ts <= end;
    corpus
        .into_iter()
        .filter_map(|mut group| {
            group.items.retain(|p| within(&p.timestamp));
            for post in &mut group.items {
                post.replies.retain(|r| within(&r.timestamp));
            }
            (!group.items.is_empty()).then_some(group)
        })
        .collect()
}

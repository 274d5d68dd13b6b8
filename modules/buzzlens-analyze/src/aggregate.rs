//! Per-group keyword sentiment tables.
//!
//! Counting policy:
//! - only related posts count; each adds `1 + replies` to the group volume
//! - a tag on a post adds `1 + replies` to its keyword (bulk attribution)
//! - a tag on a reply of a related post adds 1
//! - every secondary increment is mirrored onto its primary
//!
//! Bulk attribution and reply tags are added independently, so a sentiment
//! expressed on both a post and its reply is counted on both. Tests pin the
//! resulting numbers.

use std::collections::BTreeMap;

use serde::Serialize;

use buzzlens_common::{Corpus, Item, KeywordLevel, SentimentDistribution, Taxonomy};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeywordScore {
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
    pub score: f64,
}

impl From<SentimentDistribution> for KeywordScore {
    fn from(d: SentimentDistribution) -> Self {
        Self {
            positive: d.positive,
            neutral: d.neutral,
            negative: d.negative,
            score: d.score(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupReport {
    pub total_volume: u64,
    /// Every taxonomy keyword, counted or not.
    pub keywords: BTreeMap<String, KeywordScore>,
}

/// One flattened line of the report: a primary keyword alone, or one of its
/// secondaries next to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub group: String,
    pub total_volume: u64,
    pub primary_keyword: String,
    pub primary: KeywordScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<KeywordScore>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateTable {
    pub groups: BTreeMap<String, GroupReport>,
}

impl AggregateTable {
    /// Rows grouped by primary keyword, each primary followed by its
    /// secondaries. Groups, primaries and secondaries are sorted by name.
    pub fn rows(&self, taxonomy: &Taxonomy) -> Vec<AggregateRow> {
        let mut rows = Vec::new();
        for (group, report) in &self.groups {
            let mut primaries: Vec<&str> = taxonomy.primaries().collect();
            primaries.sort_unstable();
            for primary in primaries {
                let Some(primary_score) = report.keywords.get(primary).copied() else {
                    continue;
                };
                let row = |secondary: Option<(&str, KeywordScore)>| AggregateRow {
                    group: group.clone(),
                    total_volume: report.total_volume,
                    primary_keyword: primary.to_string(),
                    primary: primary_score,
                    secondary_keyword: secondary.map(|(k, _)| k.to_string()),
                    secondary: secondary.map(|(_, s)| s),
                };
                rows.push(row(None));

                let mut secondaries: Vec<&str> = taxonomy.secondaries_of(primary).collect();
                secondaries.sort_unstable();
                for secondary in secondaries {
                    if let Some(score) = report.keywords.get(secondary).copied() {
                        rows.push(row(Some((secondary, score))));
                    }
                }
            }
        }
        rows
    }
}

#[derive(Default)]
struct GroupTally {
    volume: u64,
    keywords: BTreeMap<String, SentimentDistribution>,
}

impl GroupTally {
    fn seeded(taxonomy: &Taxonomy) -> Self {
        Self {
            volume: 0,
            keywords: taxonomy
                .keywords()
                .map(|k| (k.to_string(), SentimentDistribution::default()))
                .collect(),
        }
    }

    fn count_tags(&mut self, item: &Item, weight: u64, taxonomy: &Taxonomy) {
        for tag in item.tags() {
            let Some(dist) = self.keywords.get_mut(&tag.keyword) else {
                continue;
            };
            dist.add(tag.sentiment, weight);
            if tag.level == KeywordLevel::Secondary {
                if let Some(primary) = taxonomy.primary_of(&tag.keyword) {
                    if let Some(dist) = self.keywords.get_mut(primary) {
                        dist.add(tag.sentiment, weight);
                    }
                }
            }
        }
    }
}

/// Build the per-group table. Groups sharing a key are combined.
pub fn aggregate(corpus: &Corpus, taxonomy: &Taxonomy) -> AggregateTable {
    let mut tallies: BTreeMap<String, GroupTally> = BTreeMap::new();

    for group in corpus {
        let tally = tallies
            .entry(group.key.clone())
            .or_insert_with(|| GroupTally::seeded(taxonomy));

        for post in group.items.iter().filter(|p| p.is_related()) {
            let replies = post.replies.len() as u64;
            tally.volume += 1 + replies;
            tally.count_tags(post, 1 + replies, taxonomy);
            for reply in &post.replies {
                tally.count_tags(reply, 1, taxonomy);
            }
        }
    }

    AggregateTable {
        groups: tallies
            .into_iter()
            .map(|(key, tally)| {
                let report = GroupReport {
                    total_volume: tally.volume,
                    keywords: tally
                        .keywords
                        .into_iter()
                        .map(|(k, d)| (k, KeywordScore::from(d)))
                        .collect(),
                };
                (key, report)
            })
            .collect(),
    }
}

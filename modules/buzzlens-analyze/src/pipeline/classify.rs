//! Stage payload shapes, item addressing and tag validation.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;

use buzzlens_common::{
    Advertisement, Corpus, Item, KeywordTag, Relatedness, Sentiment, Taxonomy,
};

pub const REASON_PARENT_NOT_RELATED: &str = "parent post is not related";
pub const REASON_REPLY_TOO_SHORT: &str = "reply too short";
pub const REASON_ANALYSIS_FAILED: &str = "analysis failed or returned no result";

// --- Generator responses ---

/// Relatedness stage answer.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RelatednessVerdict {
    pub is_related: bool,
    #[serde(default)]
    pub is_related_reason: String,
    #[serde(default)]
    pub is_ad: bool,
    #[serde(default)]
    pub is_ad_reason: String,
}

impl RelatednessVerdict {
    pub fn into_annotations(self) -> (Relatedness, Advertisement) {
        (
            Relatedness {
                related: self.is_related,
                reason: self.is_related_reason,
            },
            Advertisement {
                is_ad: self.is_ad,
                reason: self.is_ad_reason,
            },
        )
    }
}

/// Tagging stage answer.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct TaggingResponse {
    #[serde(default)]
    pub keywords_mentioned: MentionedKeywords,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct MentionedKeywords {
    #[serde(default)]
    pub primary_keyword: Vec<MentionedKeyword>,
    #[serde(default)]
    pub secondary_keyword: Vec<MentionedKeyword>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MentionedKeyword {
    pub keyword: String,
    /// One of positive, neutral, negative.
    pub sentiment: String,
}

/// Tags that survived validation, and how many did not.
#[derive(Debug, Default, PartialEq)]
pub struct ValidatedTags {
    pub tags: Vec<KeywordTag>,
    pub dropped: u64,
}

/// Keep only tags whose keyword is in the taxonomy (whitespace and case
/// insensitive) and whose sentiment is recognized. The level comes from the
/// taxonomy, not from the list the generator put the keyword in. Repeated
/// mentions are each kept and each counted.
pub fn validate_tags(response: TaggingResponse, taxonomy: &Taxonomy) -> ValidatedTags {
    let MentionedKeywords {
        primary_keyword,
        secondary_keyword,
    } = response.keywords_mentioned;

    let mut validated = ValidatedTags::default();
    for mention in primary_keyword.into_iter().chain(secondary_keyword) {
        let canonical = taxonomy.canonicalize(&mention.keyword);
        let sentiment = Sentiment::parse(&mention.sentiment);
        let (Some((keyword, level)), Some(sentiment)) = (canonical, sentiment) else {
            validated.dropped += 1;
            continue;
        };
        validated.tags.push(KeywordTag {
            keyword: keyword.to_string(),
            level,
            sentiment,
        });
    }
    validated
}

// --- Addressing ---

/// Position of one post or reply in a corpus. Each address names exactly one
/// item, so tasks carrying distinct addresses never write the same place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemAddress {
    pub group: usize,
    pub post: usize,
    pub reply: Option<usize>,
}

impl ItemAddress {
    pub fn post(group: usize, post: usize) -> Self {
        Self {
            group,
            post,
            reply: None,
        }
    }

    pub fn reply(group: usize, post: usize, reply: usize) -> Self {
        Self {
            group,
            post,
            reply: Some(reply),
        }
    }

    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Address of the post this item belongs to (itself for posts).
    pub fn parent(&self) -> Self {
        Self::post(self.group, self.post)
    }

    pub fn resolve<'a>(&self, corpus: &'a Corpus) -> Option<&'a Item> {
        let post = corpus.get(self.group)?.items.get(self.post)?;
        match self.reply {
            Some(r) => post.replies.get(r),
            None => Some(post),
        }
    }

    pub fn resolve_mut<'a>(&self, corpus: &'a mut Corpus) -> Option<&'a mut Item> {
        let post = corpus.get_mut(self.group)?.items.get_mut(self.post)?;
        match self.reply {
            Some(r) => post.replies.get_mut(r),
            None => Some(post),
        }
    }
}

impl fmt::Display for ItemAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reply {
            Some(r) => write!(f, "{}/{}/{}", self.group, self.post, r),
            None => write!(f, "{}/{}", self.group, self.post),
        }
    }
}

/// Location carried through the dispatcher: which stage, which item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTask {
    Relatedness(ItemAddress),
    Tagging(ItemAddress),
}

#[derive(Debug)]
pub enum StageResponse {
    Relatedness(RelatednessVerdict),
    Tagging(TaggingResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{group, post, reply, taxonomy_fixture};
    use buzzlens_common::KeywordLevel;

    fn mention(keyword: &str, sentiment: &str) -> MentionedKeyword {
        MentionedKeyword {
            keyword: keyword.to_string(),
            sentiment: sentiment.to_string(),
        }
    }

    fn response(primary: Vec<MentionedKeyword>, secondary: Vec<MentionedKeyword>) -> TaggingResponse {
        TaggingResponse {
            keywords_mentioned: MentionedKeywords {
                primary_keyword: primary,
                secondary_keyword: secondary,
            },
        }
    }

    #[test]
    fn tags_are_canonicalized_against_the_taxonomy() {
        let taxonomy = taxonomy_fixture();
        let validated = validate_tags(
            response(
                vec![mention("service", "Positive")],
                vec![mention("bed  quality", "negative"), mention("FrontDesk", "neutral")],
            ),
            &taxonomy,
        );
        assert_eq!(validated.dropped, 0);
        assert_eq!(
            validated.tags,
            vec![
                KeywordTag {
                    keyword: "Service".into(),
                    level: KeywordLevel::Primary,
                    sentiment: Sentiment::Positive,
                },
                KeywordTag {
                    keyword: "Bed Quality".into(),
                    level: KeywordLevel::Secondary,
                    sentiment: Sentiment::Negative,
                },
                KeywordTag {
                    keyword: "Front Desk".into(),
                    level: KeywordLevel::Secondary,
                    sentiment: Sentiment::Neutral,
                },
            ]
        );
    }

    #[test]
    fn unknown_keywords_and_sentiments_are_dropped() {
        let taxonomy = taxonomy_fixture();
        let validated = validate_tags(
            response(
                vec![mention("Breakfast", "positive")],
                vec![mention("Noise", "furious"), mention("Noise", "negative")],
            ),
            &taxonomy,
        );
        assert_eq!(validated.dropped, 2);
        assert_eq!(validated.tags.len(), 1);
        assert_eq!(validated.tags[0].keyword, "Noise");
    }

    #[test]
    fn level_comes_from_taxonomy_and_repeats_are_kept() {
        let taxonomy = taxonomy_fixture();
        let validated = validate_tags(
            response(
                vec![mention("Noise", "negative")],
                vec![mention("noise", "negative")],
            ),
            &taxonomy,
        );
        assert_eq!(validated.dropped, 0);
        assert_eq!(validated.tags.len(), 2);
        assert!(validated
            .tags
            .iter()
            .all(|t| t.keyword == "Noise" && t.level == KeywordLevel::Secondary));
    }

    #[test]
    fn addresses_resolve_to_exactly_one_item() {
        let mut corpus = vec![group(
            "g",
            vec![post("p0", "first", vec![reply("r0", "a reply")])],
        )];
        assert_eq!(
            ItemAddress::post(0, 0).resolve(&corpus).map(|i| i.identity.as_str()),
            Some("p0")
        );
        assert_eq!(
            ItemAddress::reply(0, 0, 0).resolve(&corpus).map(|i| i.identity.as_str()),
            Some("r0")
        );
        assert!(ItemAddress::reply(0, 0, 1).resolve(&corpus).is_none());
        assert!(ItemAddress::post(1, 0).resolve_mut(&mut corpus).is_none());
        assert_eq!(ItemAddress::reply(0, 0, 0).parent(), ItemAddress::post(0, 0));
        assert_eq!(ItemAddress::reply(2, 1, 3).to_string(), "2/1/3");
    }
}

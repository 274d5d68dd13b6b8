use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BuzzError;
use crate::types::KeywordLevel;

/// One primary keyword with its secondaries, as stored in the keywords file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub primary_keyword: String,
    #[serde(default)]
    pub secondary_keywords: Vec<SecondaryKeyword>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryKeyword {
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
struct Canonical {
    keyword: String,
    level: KeywordLevel,
}

/// Fixed primary → secondary keyword hierarchy.
///
/// Read-only once built. Every keyword is unique under whitespace- and
/// case-insensitive comparison, so each secondary belongs to exactly one
/// primary and canonicalization is never ambiguous.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
    by_normalized: HashMap<String, Canonical>,
    parent: HashMap<String, String>,
}

impl Taxonomy {
    pub fn new(entries: Vec<TaxonomyEntry>) -> Result<Self, BuzzError> {
        let mut entries = entries;
        let mut by_normalized = HashMap::new();
        let mut parent = HashMap::new();

        for entry in &mut entries {
            entry.primary_keyword = entry.primary_keyword.trim().to_string();
            register(
                &mut by_normalized,
                &entry.primary_keyword,
                KeywordLevel::Primary,
            )?;
            for secondary in &mut entry.secondary_keywords {
                secondary.keyword = secondary.keyword.trim().to_string();
                register(&mut by_normalized, &secondary.keyword, KeywordLevel::Secondary)?;
                parent.insert(secondary.keyword.clone(), entry.primary_keyword.clone());
            }
        }

        Ok(Self {
            entries,
            by_normalized,
            parent,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, BuzzError> {
        let entries: Vec<TaxonomyEntry> = serde_json::from_str(raw)?;
        Self::new(entries)
    }

    /// Load the keywords file. Called once at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BuzzError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BuzzError::Taxonomy(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Comparison key: all whitespace removed, lowercased.
    pub fn normalize(keyword: &str) -> String {
        keyword
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    }

    /// Canonical spelling and level for a model-produced keyword, if it is in
    /// the taxonomy.
    pub fn canonicalize(&self, raw: &str) -> Option<(&str, KeywordLevel)> {
        self.by_normalized
            .get(&Self::normalize(raw))
            .map(|c| (c.keyword.as_str(), c.level))
    }

    /// Primary keyword a secondary rolls up to. `None` for primaries and
    /// unknown keywords.
    pub fn primary_of(&self, secondary: &str) -> Option<&str> {
        self.parent.get(secondary).map(String::as_str)
    }

    pub fn primaries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.primary_keyword.as_str())
    }

    pub fn secondaries_of<'a>(&'a self, primary: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.primary_keyword == primary)
            .flat_map(|e| e.secondary_keywords.iter().map(|s| s.keyword.as_str()))
    }

    /// Every canonical keyword, primaries and secondaries alike.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().flat_map(|e| {
            std::iter::once(e.primary_keyword.as_str())
                .chain(e.secondary_keywords.iter().map(|s| s.keyword.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.by_normalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_normalized.is_empty()
    }

    /// Pretty JSON of the hierarchy, for inclusion in prompts.
    pub fn describe(&self) -> String {
        serde_json::to_string_pretty(&self.entries).unwrap_or_default()
    }
}

fn register(
    index: &mut HashMap<String, Canonical>,
    keyword: &str,
    level: KeywordLevel,
) -> Result<(), BuzzError> {
    let normalized = Taxonomy::normalize(keyword);
    if normalized.is_empty() {
        return Err(BuzzError::Taxonomy("empty keyword".into()));
    }
    if let Some(existing) = index.get(&normalized) {
        return Err(BuzzError::Taxonomy(format!(
            "keyword {keyword:?} collides with {:?}",
            existing.keyword
        )));
    }
    index.insert(
        normalized,
        Canonical {
            keyword: keyword.to_string(),
            level,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYWORDS: &str = r#"[
        {"primary_keyword": "Room Comfort",
         "secondary_keywords": [{"keyword": "Bed Quality"}, {"keyword": "Noise"}]},
        {"primary_keyword": "Service",
         "secondary_keywords": [{"keyword": "Front Desk", "description": "check-in staff"}]}
    ]"#;

    #[test]
    fn canonicalize_ignores_whitespace_and_case() {
        let t = Taxonomy::from_json(KEYWORDS).unwrap();
        assert_eq!(
            t.canonicalize("bedquality"),
            Some(("Bed Quality", KeywordLevel::Secondary))
        );
        assert_eq!(
            t.canonicalize("  ROOM comfort "),
            Some(("Room Comfort", KeywordLevel::Primary))
        );
        assert_eq!(t.canonicalize("Breakfast"), None);
    }

    #[test]
    fn secondaries_roll_up_to_their_primary() {
        let t = Taxonomy::from_json(KEYWORDS).unwrap();
        assert_eq!(t.primary_of("Noise"), Some("Room Comfort"));
        assert_eq!(t.primary_of("Front Desk"), Some("Service"));
        assert_eq!(t.primary_of("Service"), None);
    }

    #[test]
    fn secondaries_of_accepts_a_borrowed_primary_name() {
        let t = Taxonomy::from_json(KEYWORDS).unwrap();
        let primary = String::from("Room Comfort");
        let secondaries: Vec<&str> = t.secondaries_of(&primary).collect();
        assert_eq!(secondaries, vec!["Bed Quality", "Noise"]);
        assert_eq!(t.secondaries_of("Breakfast").count(), 0);
    }

    #[test]
    fn secondary_under_two_primaries_is_rejected() {
        let raw = r#"[
            {"primary_keyword": "A", "secondary_keywords": [{"keyword": "x"}]},
            {"primary_keyword": "B", "secondary_keywords": [{"keyword": "X"}]}
        ]"#;
        assert!(matches!(
            Taxonomy::from_json(raw),
            Err(BuzzError::Taxonomy(_))
        ));
    }

    #[test]
    fn blank_keyword_is_rejected() {
        let raw = r#"[{"primary_keyword": "  ", "secondary_keywords": []}]"#;
        assert!(Taxonomy::from_json(raw).is_err());
    }

    #[test]
    fn keywords_lists_everything_in_file_order() {
        let t = Taxonomy::from_json(KEYWORDS).unwrap();
        let all: Vec<_> = t.keywords().collect();
        assert_eq!(
            all,
            vec!["Room Comfort", "Bed Quality", "Noise", "Service", "Front Desk"]
        );
        assert_eq!(t.len(), 5);
        assert_eq!(t.secondaries_of("Service").collect::<Vec<_>>(), vec!["Front Desk"]);
    }
}

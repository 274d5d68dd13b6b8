use std::sync::OnceLock;

use regex::Regex;

fn fenced_json_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("fenced json pattern is valid")
    })
}

/// Body of the first ```` ```json ```` fenced block in `response`, if any.
///
/// Text outside the fence is ignored, so prose around the block is fine.
/// Unfenced JSON does not count.
pub fn extract_fenced_json(response: &str) -> Option<&str> {
    fenced_json_pattern()
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_found_inside_prose() {
        let text = "Sure, here it is:\n```json\n{\"a\": 1}\n```\nAnything else?";
        assert_eq!(extract_fenced_json(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn first_fenced_block_wins() {
        let text = "```json\n[1]\n```\n```json\n[2]\n```";
        assert_eq!(extract_fenced_json(text), Some("[1]"));
    }

    #[test]
    fn bare_json_is_not_a_fenced_block() {
        assert_eq!(extract_fenced_json("{\"a\": 1}"), None);
        assert_eq!(extract_fenced_json("```\n{\"a\": 1}\n```"), None);
    }
}

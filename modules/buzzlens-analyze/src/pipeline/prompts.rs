use buzzlens_common::{Item, Taxonomy};

use super::classify::{RelatednessVerdict, TaggingResponse};
use crate::infer::StructuredInference;

pub fn relatedness_directive(topic: &str, group_key: &str) -> String {
    let base = format!(
        r#"You review social media posts and replies collected for "{group_key}" in the {topic} domain.

Decide two things about the text you are given:
1. Is it related to {topic}, meaning it discusses an experience with, opinion of, or question about {group_key} or a comparable place? Generic chatter, unrelated products and empty reactions are not related.
2. Is it an advertisement, meaning promotional copy, a sponsored post, a coupon, or a sales pitch?

Give a one-sentence reason for each decision."#
    );
    StructuredInference::with_schema_hint::<RelatednessVerdict>(&base)
}

pub fn post_relatedness_payload(post: &Item) -> String {
    format!("Post:\n{}", post.full_text())
}

pub fn reply_relatedness_payload(reply: &Item) -> String {
    format!("Reply:\n{}", reply.content)
}

pub fn tagging_directive(topic: &str, group_key: &str, taxonomy: &Taxonomy) -> String {
    let base = format!(
        r#"You analyze {topic} feedback about "{group_key}".

Find which of the following keywords the text talks about. Each entry has a primary keyword and the secondary keywords under it:

{keywords}

Rules:
- Use keywords exactly as written above. Do not invent new keywords.
- List primary keywords under "primary_keyword" and secondary keywords under "secondary_keyword".
- For each keyword give the sentiment the text expresses about it: positive, neutral or negative.
- If nothing matches, return empty lists."#,
        keywords = taxonomy.describe(),
    );
    StructuredInference::with_schema_hint::<TaggingResponse>(&base)
}

pub fn post_tagging_payload(post: &Item) -> String {
    format!("Post:\n{}", post.full_text())
}

/// Reply text, with the post it answers as context only.
pub fn reply_tagging_payload(reply: &Item, parent: &Item) -> String {
    format!(
        "Reply to analyze:\n{}\n\nIt answers this post (context only, do not tag it):\n{}",
        reply.content,
        parent.full_text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, reply, taxonomy_fixture};

    #[test]
    fn directives_carry_their_schema_fields() {
        let taxonomy = taxonomy_fixture();
        let relatedness = relatedness_directive("hotels", "Harbor Inn");
        let tagging = tagging_directive("hotels", "Harbor Inn", &taxonomy);

        assert!(relatedness.contains("is_related"));
        assert!(relatedness.contains("is_ad"));
        assert!(!relatedness.contains("keywords_mentioned"));

        assert!(tagging.contains("keywords_mentioned"));
        assert!(tagging.contains("Bed Quality"));
        assert!(!tagging.contains("is_related"));
    }

    #[test]
    fn post_payload_includes_title() {
        let p = post("p1", "the bed was great", vec![]).with_title("Weekend stay");
        assert_eq!(post_relatedness_payload(&p), "Post:\nWeekend stay\nthe bed was great");
    }

    #[test]
    fn untitled_post_payload_keeps_the_separator() {
        let p = post("p1", "the bed was great", vec![]);
        assert_eq!(post_relatedness_payload(&p), "Post:\n\nthe bed was great");
    }

    #[test]
    fn reply_tagging_payload_quotes_parent() {
        let p = post("p1", "how was the front desk?", vec![]);
        let r = reply("r1", "slow check-in, rude staff");
        let payload = reply_tagging_payload(&r, &p);
        assert!(payload.starts_with("Reply to analyze:\nslow check-in, rude staff"));
        assert!(payload.contains("how was the front desk?"));
    }
}

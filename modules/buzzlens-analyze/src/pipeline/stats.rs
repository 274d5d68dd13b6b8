use crate::dispatch::DispatchReport;

/// Counters from one classification run.
#[derive(Debug, Default, Clone)]
pub struct ClassificationReport {
    pub posts: u64,
    pub related_posts: u64,
    pub ad_posts: u64,
    pub replies_dispatched: u64,
    pub related_replies: u64,
    /// Replies marked not related because their post was.
    pub replies_pruned: u64,
    /// Replies under the length threshold, never sent.
    pub replies_short: u64,
    pub tagged_items: u64,
    pub tags_kept: u64,
    /// Tags whose keyword or sentiment is not in the taxonomy.
    pub tags_dropped: u64,
    pub classify: DispatchReport,
    pub tagging: DispatchReport,
}

impl ClassificationReport {
    pub fn calls_issued(&self) -> u64 {
        self.classify.completed + self.tagging.completed
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Classification Complete ===")?;
        writeln!(f, "Posts:              {}", self.posts)?;
        writeln!(f, "Related posts:      {}", self.related_posts)?;
        writeln!(f, "Advertisements:     {}", self.ad_posts)?;
        writeln!(f, "Replies classified: {}", self.replies_dispatched)?;
        writeln!(f, "Related replies:    {}", self.related_replies)?;
        writeln!(f, "Replies pruned:     {}", self.replies_pruned)?;
        writeln!(f, "Replies too short:  {}", self.replies_short)?;
        writeln!(f, "\nTagging:")?;
        writeln!(f, "  Items tagged:  {}", self.tagged_items)?;
        writeln!(f, "  Tags kept:     {}", self.tags_kept)?;
        writeln!(f, "  Tags dropped:  {}", self.tags_dropped)?;
        writeln!(f, "\nGenerator calls:")?;
        for (name, report) in [("classify", &self.classify), ("tagging", &self.tagging)] {
            writeln!(
                f,
                "  {name:<9} {} done, {} no structured output, {} transport failures",
                report.completed, report.no_structured_output, report.transport_failures
            )?;
        }
        Ok(())
    }
}

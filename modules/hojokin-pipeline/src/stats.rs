/// Stats from a full pipeline run.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub municipalities_searched: u32,
    pub urls_discovered: u32,
    pub urls_classified: u32,
    pub classification_failures: u32,
    pub list_pages: u32,
    pub individual_pages: u32,
    pub unrelated: u32,
    pub links_extracted: u32,
    pub extracted_classified: u32,
    pub merged_records: u32,
    pub merged_individual_pages: u32,
    pub duplicates_removed: u32,
    pub new_from_extraction: u32,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run Complete ===")?;
        writeln!(f, "Municipalities searched: {}", self.municipalities_searched)?;
        writeln!(f, "URLs discovered:         {}", self.urls_discovered)?;
        writeln!(f, "URLs classified:         {}", self.urls_classified)?;
        writeln!(f, "Classification failures: {}", self.classification_failures)?;
        writeln!(f, "\nBy category (initial pass):")?;
        writeln!(f, "  List pages:       {}", self.list_pages)?;
        writeln!(f, "  Individual pages: {}", self.individual_pages)?;
        writeln!(f, "  Unrelated:        {}", self.unrelated)?;
        writeln!(f, "\nList-page expansion:")?;
        writeln!(f, "  Links classified: {}", self.extracted_classified)?;
        writeln!(f, "  Links found:      {}", self.links_extracted)?;
        writeln!(f, "\nMerged registry:")?;
        writeln!(f, "  Records:            {}", self.merged_records)?;
        writeln!(f, "  Individual pages:   {}", self.merged_individual_pages)?;
        writeln!(f, "  Duplicates removed: {}", self.duplicates_removed)?;
        writeln!(f, "  New from extraction:{}", self.new_from_extraction)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_all_sections() {
        let stats = PipelineStats {
            municipalities_searched: 3,
            urls_discovered: 42,
            merged_records: 30,
            ..PipelineStats::default()
        };
        let rendered = stats.to_string();
        assert!(rendered.contains("Pipeline Run Complete"));
        assert!(rendered.contains("Municipalities searched: 3"));
        assert!(rendered.contains("Records:            30"));
    }
}

//! Dedup/merge engine: unions run stores into one region-wide registry.
//!
//! A single deterministic pass over the input stores, in order. The merge is
//! a pure function of its inputs — prior state enters only as another store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hojokin_common::{normalize_url, PageCategory, Provenance, RunStore, UrlRecord};
use serde::Serialize;
use tracing::warn;

/// Deduplicated union of run stores for one region.
#[derive(Debug, Clone)]
pub struct MergedStore {
    pub region: String,
    pub merged_at: DateTime<Utc>,
    pub records: Vec<UrlRecord>,
    pub stats: MergeStats,
}

impl MergedStore {
    pub fn individual_pages(&self) -> Vec<&UrlRecord> {
        self.records
            .iter()
            .filter(|r| r.category == PageCategory::IndividualPage)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeStats {
    pub input_stores: usize,
    pub skipped_stores: usize,
    pub input_records: usize,
    pub merged_count: usize,
    pub duplicates_removed: usize,
    /// URLs discovered only through list-page extraction.
    pub new_from_extraction: usize,
    pub list_pages: usize,
    pub individual_pages: usize,
    pub unrelated: usize,
    pub from_initial_search: usize,
    pub from_list_extraction: usize,
    pub from_manual: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceStats>,
}

/// Confidence aggregates over individual pages.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceStats {
    pub average: f32,
    pub max: f32,
    pub min: f32,
    /// Count of individual pages with confidence >= 0.8.
    pub high_confidence: usize,
}

impl std::fmt::Display for MergeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Merge Complete ===")?;
        writeln!(f, "Input stores:       {}", self.input_stores)?;
        if self.skipped_stores > 0 {
            writeln!(f, "Skipped stores:     {}", self.skipped_stores)?;
        }
        writeln!(f, "Input records:      {}", self.input_records)?;
        writeln!(f, "Merged records:     {}", self.merged_count)?;
        writeln!(f, "Duplicates removed: {}", self.duplicates_removed)?;
        writeln!(f, "New from extraction:{}", self.new_from_extraction)?;
        writeln!(f, "\nBy category:")?;
        writeln!(f, "  List pages:       {}", self.list_pages)?;
        writeln!(f, "  Individual pages: {}", self.individual_pages)?;
        writeln!(f, "  Unrelated:        {}", self.unrelated)?;
        writeln!(f, "\nBy provenance:")?;
        writeln!(f, "  Initial search:   {}", self.from_initial_search)?;
        writeln!(f, "  List extraction:  {}", self.from_list_extraction)?;
        writeln!(f, "  Manual:           {}", self.from_manual)?;
        if let Some(ref c) = self.confidence {
            writeln!(f, "\nConfidence (individual pages):")?;
            writeln!(f, "  Average: {:.3}", c.average)?;
            writeln!(f, "  Max:     {:.3}", c.max)?;
            writeln!(f, "  Min:     {:.3}", c.min)?;
            writeln!(f, "  >= 0.8:  {}", c.high_confidence)?;
        }
        Ok(())
    }
}

/// Merge stores for `region` into one deduplicated registry.
///
/// Records are visited in store order, then record order, so results are
/// deterministic. Per URL the higher-confidence record wins; on equal
/// confidence the later record (the more recent run — pass stores
/// oldest-first) wins. Provenance tags always union. A store whose region
/// does not match is skipped with a warning; an empty input yields an empty
/// store with zeroed statistics.
pub fn merge(stores: &[RunStore], region: &str) -> MergedStore {
    let mut records: Vec<UrlRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut stats = MergeStats {
        input_stores: stores.len(),
        ..MergeStats::default()
    };

    for store in stores {
        if store.region != region {
            warn!(
                expected = region,
                found = store.region.as_str(),
                stage = %store.stage,
                "Skipping store from a different region"
            );
            stats.skipped_stores += 1;
            continue;
        }

        for record in &store.records {
            let key = normalize_url(&record.url);
            if key.is_empty() {
                continue;
            }
            stats.input_records += 1;

            match index.get(&key) {
                None => {
                    let mut inserted = record.clone();
                    inserted.url = key.clone();
                    index.insert(key, records.len());
                    records.push(inserted);
                }
                Some(&at) => {
                    let existing = &mut records[at];
                    if record.confidence >= existing.confidence {
                        let mut replacement = record.clone();
                        replacement.url = key;
                        let kept_provenance = existing.provenance.clone();
                        replacement.union_provenance(&kept_provenance);
                        *existing = replacement;
                    } else {
                        existing.union_provenance(&record.provenance);
                    }
                }
            }
        }
    }

    stats.merged_count = records.len();
    stats.duplicates_removed = stats.input_records - stats.merged_count;

    for record in &records {
        match record.category {
            PageCategory::ListPage => stats.list_pages += 1,
            PageCategory::IndividualPage => stats.individual_pages += 1,
            PageCategory::Unrelated => stats.unrelated += 1,
        }
        if record.has_provenance(Provenance::InitialSearch) {
            stats.from_initial_search += 1;
        }
        if record.has_provenance(Provenance::ListExtraction) {
            stats.from_list_extraction += 1;
        }
        if record.has_provenance(Provenance::Manual) {
            stats.from_manual += 1;
        }
        if !record.has_provenance(Provenance::InitialSearch)
            && record.has_provenance(Provenance::ListExtraction)
        {
            stats.new_from_extraction += 1;
        }
    }

    let confidences: Vec<f32> = records
        .iter()
        .filter(|r| r.category == PageCategory::IndividualPage)
        .map(|r| r.confidence)
        .collect();
    if !confidences.is_empty() {
        stats.confidence = Some(ConfidenceStats {
            average: confidences.iter().sum::<f32>() / confidences.len() as f32,
            max: confidences.iter().cloned().fold(f32::MIN, f32::max),
            min: confidences.iter().cloned().fold(f32::MAX, f32::min),
            high_confidence: confidences.iter().filter(|c| **c >= 0.8).count(),
        });
    }

    MergedStore {
        region: region.to_string(),
        merged_at: Utc::now(),
        records,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hojokin_common::Stage;

    const REGION: &str = "千葉県";

    fn record(url: &str, category: PageCategory, confidence: f32, provenance: Provenance) -> UrlRecord {
        let mut r = UrlRecord::seed(url, REGION, "千葉市", provenance);
        r.category = category;
        r.confidence = confidence;
        r
    }

    fn store(records: Vec<UrlRecord>) -> RunStore {
        RunStore::with_records(REGION, Stage::Classification, records)
    }

    fn urls(merged: &MergedStore) -> Vec<&str> {
        merged.records.iter().map(|r| r.url.as_str()).collect()
    }

    // --- Core invariants ---

    #[test]
    fn empty_input_yields_empty_store_with_zero_stats() {
        let merged = merge(&[], REGION);
        assert!(merged.records.is_empty());
        assert_eq!(merged.stats.input_records, 0);
        assert_eq!(merged.stats.merged_count, 0);
        assert_eq!(merged.stats.duplicates_removed, 0);
        assert_eq!(merged.stats.new_from_extraction, 0);
        assert_eq!(merged.stats.individual_pages, 0);
        assert!(merged.stats.confidence.is_none());
    }

    #[test]
    fn disjoint_stores_merge_to_exact_sum() {
        let a = store(
            (0..3)
                .map(|i| {
                    record(
                        &format!("https://a.jp/{i}"),
                        PageCategory::IndividualPage,
                        0.7,
                        Provenance::InitialSearch,
                    )
                })
                .collect(),
        );
        let b = store(
            (0..4)
                .map(|i| {
                    record(
                        &format!("https://b.jp/{i}"),
                        PageCategory::IndividualPage,
                        0.7,
                        Provenance::ListExtraction,
                    )
                })
                .collect(),
        );
        let merged = merge(&[a, b], REGION);
        assert_eq!(merged.records.len(), 7);
        assert_eq!(merged.stats.duplicates_removed, 0);
    }

    #[test]
    fn higher_confidence_wins_and_provenance_unions() {
        let a = store(vec![record(
            "https://x.jp/1",
            PageCategory::IndividualPage,
            0.6,
            Provenance::InitialSearch,
        )]);
        let b = store(vec![record(
            "https://x.jp/1",
            PageCategory::IndividualPage,
            0.9,
            Provenance::ListExtraction,
        )]);
        let merged = merge(&[a, b], REGION);

        assert_eq!(merged.records.len(), 1);
        let winner = &merged.records[0];
        assert_eq!(winner.confidence, 0.9);
        assert!(winner.has_provenance(Provenance::InitialSearch));
        assert!(winner.has_provenance(Provenance::ListExtraction));
        assert_eq!(merged.stats.duplicates_removed, 1);
    }

    #[test]
    fn lower_confidence_does_not_replace_but_still_unions() {
        let a = store(vec![record(
            "https://x.jp/1",
            PageCategory::IndividualPage,
            0.9,
            Provenance::InitialSearch,
        )]);
        let b = store(vec![record(
            "https://x.jp/1",
            PageCategory::ListPage,
            0.4,
            Provenance::ListExtraction,
        )]);
        let merged = merge(&[a, b], REGION);

        let winner = &merged.records[0];
        assert_eq!(winner.confidence, 0.9);
        assert_eq!(winner.category, PageCategory::IndividualPage);
        assert!(winner.has_provenance(Provenance::ListExtraction));
    }

    #[test]
    fn equal_confidence_later_record_wins() {
        let mut early = record(
            "https://x.jp/1",
            PageCategory::IndividualPage,
            0.8,
            Provenance::InitialSearch,
        );
        early.rationale = "first run".to_string();
        let mut late = record(
            "https://x.jp/1",
            PageCategory::IndividualPage,
            0.8,
            Provenance::InitialSearch,
        );
        late.rationale = "second run".to_string();

        let merged = merge(&[store(vec![early]), store(vec![late])], REGION);
        assert_eq!(merged.records.len(), 1);
        assert_eq!(merged.records[0].rationale, "second run");
    }

    #[test]
    fn merge_is_idempotent() {
        let base = merge(
            &[store(vec![
                record("https://x.jp/1", PageCategory::IndividualPage, 0.9, Provenance::InitialSearch),
                record("https://x.jp/2", PageCategory::ListPage, 0.7, Provenance::InitialSearch),
            ])],
            REGION,
        );

        let as_store = RunStore::with_records(REGION, Stage::Merged, base.records.clone());
        let again = merge(&[as_store.clone(), as_store], REGION);

        assert_eq!(again.records.len(), base.records.len());
        for (a, b) in base.records.iter().zip(again.records.iter()) {
            assert_eq!(a.url, b.url);
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.category, b.category);
            assert_eq!(a.provenance, b.provenance);
        }
    }

    #[test]
    fn url_set_and_winning_confidence_are_order_independent() {
        let a = store(vec![
            record("https://x.jp/1", PageCategory::IndividualPage, 0.6, Provenance::InitialSearch),
            record("https://x.jp/2", PageCategory::ListPage, 0.5, Provenance::InitialSearch),
        ]);
        let b = store(vec![
            record("https://x.jp/1", PageCategory::IndividualPage, 0.9, Provenance::ListExtraction),
            record("https://x.jp/3", PageCategory::IndividualPage, 0.4, Provenance::ListExtraction),
        ]);

        let ab = merge(&[a.clone(), b.clone()], REGION);
        let ba = merge(&[b, a], REGION);

        let mut ab_pairs: Vec<(String, String)> = ab
            .records
            .iter()
            .map(|r| (r.url.clone(), format!("{:.3}", r.confidence)))
            .collect();
        let mut ba_pairs: Vec<(String, String)> = ba
            .records
            .iter()
            .map(|r| (r.url.clone(), format!("{:.3}", r.confidence)))
            .collect();
        ab_pairs.sort();
        ba_pairs.sort();
        assert_eq!(ab_pairs, ba_pairs);
    }

    #[test]
    fn record_count_never_exceeds_input_sum() {
        let a = store(vec![
            record("https://x.jp/1", PageCategory::IndividualPage, 0.6, Provenance::InitialSearch),
            record("https://x.jp/1", PageCategory::IndividualPage, 0.7, Provenance::InitialSearch),
        ]);
        let merged = merge(&[a], REGION);
        assert_eq!(merged.records.len(), 1);
        assert_eq!(merged.stats.input_records, 2);
    }

    // --- Ordering and identity ---

    #[test]
    fn first_seen_order_is_preserved() {
        let a = store(vec![
            record("https://x.jp/b", PageCategory::ListPage, 0.5, Provenance::InitialSearch),
            record("https://x.jp/a", PageCategory::ListPage, 0.5, Provenance::InitialSearch),
        ]);
        let b = store(vec![
            record("https://x.jp/c", PageCategory::ListPage, 0.5, Provenance::ListExtraction),
            // duplicate, must not move from slot 0
            record("https://x.jp/b", PageCategory::ListPage, 0.9, Provenance::ListExtraction),
        ]);
        let merged = merge(&[a, b], REGION);
        assert_eq!(urls(&merged), vec!["https://x.jp/b", "https://x.jp/a", "https://x.jp/c"]);
        assert_eq!(merged.records[0].confidence, 0.9);
    }

    #[test]
    fn urls_differing_only_by_fragment_collapse() {
        let a = store(vec![
            record("https://x.jp/page#top", PageCategory::ListPage, 0.5, Provenance::InitialSearch),
            record("https://x.jp/page#body", PageCategory::ListPage, 0.6, Provenance::InitialSearch),
        ]);
        let merged = merge(&[a], REGION);
        assert_eq!(merged.records.len(), 1);
    }

    // --- Region checks and statistics ---

    #[test]
    fn store_from_other_region_is_skipped() {
        let good = store(vec![record(
            "https://x.jp/1",
            PageCategory::IndividualPage,
            0.8,
            Provenance::InitialSearch,
        )]);
        let other = RunStore::with_records(
            "大阪府",
            Stage::Classification,
            vec![record("https://y.jp/1", PageCategory::IndividualPage, 0.8, Provenance::InitialSearch)],
        );
        let merged = merge(&[good, other], REGION);
        assert_eq!(merged.records.len(), 1);
        assert_eq!(merged.stats.skipped_stores, 1);
        assert_eq!(merged.records[0].url, "https://x.jp/1");
    }

    #[test]
    fn new_from_extraction_counts_only_extraction_discoveries() {
        let a = store(vec![
            record("https://x.jp/1", PageCategory::IndividualPage, 0.6, Provenance::InitialSearch),
            record("https://x.jp/2", PageCategory::IndividualPage, 0.7, Provenance::ListExtraction),
        ]);
        let b = store(vec![
            // also found by extraction, but known from search already
            record("https://x.jp/1", PageCategory::IndividualPage, 0.9, Provenance::ListExtraction),
        ]);
        let merged = merge(&[a, b], REGION);
        assert_eq!(merged.stats.new_from_extraction, 1);
        assert_eq!(merged.stats.from_initial_search, 1);
        assert_eq!(merged.stats.from_list_extraction, 2);
    }

    #[test]
    fn category_counts_reflect_winning_records() {
        let a = store(vec![
            record("https://x.jp/1", PageCategory::ListPage, 0.5, Provenance::InitialSearch),
            record("https://x.jp/2", PageCategory::IndividualPage, 0.9, Provenance::InitialSearch),
            record("https://x.jp/3", PageCategory::Unrelated, 0.9, Provenance::InitialSearch),
        ]);
        let b = store(vec![
            // re-classified with more confidence: list page -> individual page
            record("https://x.jp/1", PageCategory::IndividualPage, 0.8, Provenance::ListExtraction),
        ]);
        let merged = merge(&[a, b], REGION);
        assert_eq!(merged.stats.list_pages, 0);
        assert_eq!(merged.stats.individual_pages, 2);
        assert_eq!(merged.stats.unrelated, 1);
    }

    #[test]
    fn confidence_stats_cover_individual_pages_only() {
        let a = store(vec![
            record("https://x.jp/1", PageCategory::IndividualPage, 0.9, Provenance::InitialSearch),
            record("https://x.jp/2", PageCategory::IndividualPage, 0.7, Provenance::InitialSearch),
            record("https://x.jp/3", PageCategory::ListPage, 0.1, Provenance::InitialSearch),
        ]);
        let merged = merge(&[a], REGION);
        let c = merged.stats.confidence.expect("individual pages present");
        assert!((c.average - 0.8).abs() < 1e-6);
        assert_eq!(c.max, 0.9);
        assert_eq!(c.min, 0.7);
        assert_eq!(c.high_confidence, 1);
    }

    #[test]
    fn individual_pages_helper_filters() {
        let merged = merge(
            &[store(vec![
                record("https://x.jp/1", PageCategory::IndividualPage, 0.9, Provenance::InitialSearch),
                record("https://x.jp/2", PageCategory::ListPage, 0.9, Provenance::InitialSearch),
            ])],
            REGION,
        );
        let individual = merged.individual_pages();
        assert_eq!(individual.len(), 1);
        assert_eq!(individual[0].url, "https://x.jp/1");
    }

    #[test]
    fn records_with_empty_urls_are_dropped() {
        let mut bad = record("https://x.jp/1", PageCategory::IndividualPage, 0.9, Provenance::InitialSearch);
        bad.url = String::new();
        let merged = merge(&[store(vec![bad])], REGION);
        assert!(merged.records.is_empty());
        assert_eq!(merged.stats.input_records, 0);
    }
}

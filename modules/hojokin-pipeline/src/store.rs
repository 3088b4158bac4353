//! Run-store persistence: JSON and CSV files per region and stage.
//!
//! Reads are tolerant — a malformed store file is skipped with a warning,
//! never fatal. Merged outputs are written only after the full in-memory
//! merge has succeeded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hojokin_common::{HojokinError, PageCategory, Provenance, RunStore, UrlRecord};
use serde::Serialize;
use tracing::{info, warn};

use crate::merge::MergedStore;

/// Flattened record shape for the CSV surface.
#[derive(Debug, Serialize)]
struct CsvRow {
    url: String,
    prefecture: String,
    city: String,
    category: String,
    confidence: f32,
    rationale: String,
    page_title: String,
    summary: String,
    subsidy_titles: String,
    provenance: String,
    parent_url: String,
    classified_at: String,
}

impl CsvRow {
    fn from_record(record: &UrlRecord) -> Self {
        Self {
            url: record.url.clone(),
            prefecture: record.prefecture.clone(),
            city: record.city.clone(),
            category: record.category.to_string(),
            confidence: record.confidence,
            rationale: record.rationale.clone(),
            page_title: record.page_title.clone(),
            summary: record.summary.clone(),
            subsidy_titles: record.subsidy_titles.join("|"),
            provenance: record
                .provenance
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join("|"),
            parent_url: record.parent_url.clone().unwrap_or_default(),
            classified_at: record.classified_at.to_rfc3339(),
        }
    }
}

/// Per-municipality summary row for the merged summary CSV.
#[derive(Debug, Serialize, PartialEq)]
pub struct SummaryRow {
    pub prefecture: String,
    pub city: String,
    pub individual_pages: usize,
    pub from_initial_search: usize,
    pub from_list_extraction: usize,
    pub average_confidence: f32,
    pub subsidy_title_count: usize,
    pub sample_titles: String,
    pub example_url: String,
}

// --- Stage stores ---

/// Write a run store as pretty JSON plus a flattened CSV. Returns the JSON path.
pub fn write_store(dir: &Path, store: &RunStore) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let base = format!("{}_{}", store.region, store.stage);

    let json_path = dir.join(format!("{base}.json"));
    let json = serde_json::to_string_pretty(store)?;
    fs::write(&json_path, json)
        .map_err(|e| HojokinError::Store(format!("Failed to write {}: {e}", json_path.display())))?;

    let csv_path = dir.join(format!("{base}.csv"));
    write_records_csv(&csv_path, &store.records.iter().collect::<Vec<_>>())?;

    info!(
        path = %json_path.display(),
        records = store.records.len(),
        "Run store written"
    );
    Ok(json_path)
}

/// Load run stores from the given paths. A file that cannot be read or
/// parsed is skipped with a warning. Both the enveloped `RunStore` shape and
/// a bare JSON array of records (assigned `default_region`) are accepted.
pub fn load_stores(paths: &[PathBuf], default_region: &str) -> Vec<RunStore> {
    let mut stores = Vec::new();

    for path in paths {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable store file");
                continue;
            }
        };

        match serde_json::from_str::<RunStore>(&raw) {
            Ok(store) => stores.push(store),
            Err(_) => match serde_json::from_str::<Vec<UrlRecord>>(&raw) {
                Ok(records) => {
                    stores.push(RunStore::with_records(
                        default_region,
                        hojokin_common::Stage::Classification,
                        records,
                    ));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed store file");
                }
            },
        }
    }

    stores
}

// --- Merged outputs ---

/// Write all merged-store outputs. Called only after a completed merge, so
/// a crash mid-run never leaves a partially merged registry behind.
pub fn write_merged_outputs(dir: &Path, merged: &MergedStore) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let individual = merged.individual_pages();
    let mut written = Vec::new();

    // 1. Individual pages, detailed JSON.
    let detailed_path = dir.join(format!("{}_merged_individual_detailed.json", merged.region));
    fs::write(&detailed_path, serde_json::to_string_pretty(&individual)?)?;
    written.push(detailed_path);

    // 2. Individual pages, flattened CSV.
    let csv_path = dir.join(format!("{}_merged_individual.csv", merged.region));
    write_records_csv(&csv_path, &individual)?;
    written.push(csv_path);

    // 3. Plain URL list.
    let urls_path = dir.join(format!("{}_merged_individual_urls.txt", merged.region));
    let mut url_list = individual.iter().map(|r| r.url.as_str()).collect::<Vec<_>>().join("\n");
    if !url_list.is_empty() {
        url_list.push('\n');
    }
    fs::write(&urls_path, url_list)?;
    written.push(urls_path);

    // 4. Per-municipality summary CSV.
    let summary_path = dir.join(format!("{}_merged_summary.csv", merged.region));
    let mut writer = csv::Writer::from_path(&summary_path)
        .with_context(|| format!("Failed to open {}", summary_path.display()))?;
    for row in summary_rows(&individual) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    written.push(summary_path);

    // 5. Statistics JSON.
    let stats_path = dir.join(format!("{}_merged_stats.json", merged.region));
    let stats_doc = serde_json::json!({
        "region": merged.region,
        "merged_at": merged.merged_at.to_rfc3339(),
        "statistics": merged.stats,
    });
    fs::write(&stats_path, serde_json::to_string_pretty(&stats_doc)?)?;
    written.push(stats_path);

    info!(
        region = merged.region.as_str(),
        individual_pages = individual.len(),
        files = written.len(),
        "Merged outputs written"
    );
    Ok(written)
}

/// Group individual pages by municipality into summary rows, sorted by
/// prefecture then city.
pub fn summary_rows(individual: &[&UrlRecord]) -> Vec<SummaryRow> {
    let mut grouped: Vec<((String, String), Vec<&UrlRecord>)> = Vec::new();
    for &record in individual {
        let key = (record.prefecture.clone(), record.city.clone());
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, pages)) => pages.push(record),
            None => grouped.push((key, vec![record])),
        }
    }
    grouped.sort_by(|(a, _), (b, _)| a.cmp(b));

    grouped
        .into_iter()
        .map(|((prefecture, city), pages)| {
            let mut titles: Vec<&str> = Vec::new();
            for page in &pages {
                for title in &page.subsidy_titles {
                    if !titles.contains(&title.as_str()) {
                        titles.push(title.as_str());
                    }
                }
            }
            let average_confidence =
                pages.iter().map(|p| p.confidence).sum::<f32>() / pages.len() as f32;

            SummaryRow {
                prefecture,
                city,
                individual_pages: pages.len(),
                from_initial_search: pages
                    .iter()
                    .filter(|p| p.has_provenance(Provenance::InitialSearch))
                    .count(),
                from_list_extraction: pages
                    .iter()
                    .filter(|p| p.has_provenance(Provenance::ListExtraction))
                    .count(),
                average_confidence: (average_confidence * 1000.0).round() / 1000.0,
                subsidy_title_count: titles.len(),
                sample_titles: titles.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
                example_url: pages.first().map(|p| p.url.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

fn write_records_csv(path: &Path, records: &[&UrlRecord]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    for &record in records {
        writer.serialize(CsvRow::from_record(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Individual-page derivatives of a classification store, matching the
/// merged output shapes so single-stage runs are usable on their own.
pub fn write_individual_derivatives(dir: &Path, store: &RunStore) -> Result<()> {
    fs::create_dir_all(dir)?;

    let individual: Vec<&UrlRecord> = store
        .records
        .iter()
        .filter(|r| r.category == PageCategory::IndividualPage)
        .collect();
    if individual.is_empty() {
        info!(region = store.region.as_str(), "No individual pages found");
        return Ok(());
    }

    let base = format!("{}_{}", store.region, store.stage);

    let detailed_path = dir.join(format!("{base}_individual_detailed.json"));
    fs::write(&detailed_path, serde_json::to_string_pretty(&individual)?)?;

    let urls_path = dir.join(format!("{base}_individual_urls.txt"));
    let mut url_list = individual.iter().map(|r| r.url.as_str()).collect::<Vec<_>>().join("\n");
    url_list.push('\n');
    fs::write(&urls_path, url_list)?;

    info!(
        region = store.region.as_str(),
        count = individual.len(),
        "Individual-page derivatives written"
    );
    Ok(())
}

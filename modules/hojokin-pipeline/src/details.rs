//! Per-program detail extraction for merged individual pages.
//!
//! Rows accumulate in one cumulative CSV across runs; per-page problems
//! reported by the model mark the page skipped instead of emitting a row.

use std::fs::OpenOptions;
use std::path::Path;

use ai_client::OpenAi;
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DETAIL_PROMPT: &str = "\
You are an analyst extracting structured facts about one Japanese municipal
subsidy program from its official page.

Rules:
- fiscal_year: convert era years to the western April 1 date
  (令和6年度 -> 2024-04-01). Empty when no year is stated.
- program_name: the program name only, with any year prefix removed.
- application_start / application_end: YYYY-MM-DD, empty when not stated;
  put conditional or supplementary wording into application_notes.
- amount_type: flat for a single fixed amount, conditional when the amount
  varies by conditions, per_equipment when set per installed equipment,
  conditional_uncapped when it varies without a stated ceiling.
- amount_yen: the representative amount as an integer in yen (万 converted);
  0 when no amount is stated, with the details in amount_notes.
- eligibility and eligible_expenses keep the page's wording, newline
  separated.
- extraction_problem: a short Japanese message when the page does not
  describe a subsidy program or facts cannot be extracted; empty otherwise.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AmountType {
    Flat,
    Conditional,
    PerEquipment,
    ConditionalUncapped,
}

/// Structured facts about one subsidy program.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubsidyDetail {
    pub fiscal_year: String,
    pub prefecture: String,
    pub city: String,
    pub program_name: String,
    pub overview: String,
    pub application_start: String,
    pub application_end: String,
    pub application_notes: String,
    pub amount_type: AmountType,
    pub amount_yen: i64,
    pub amount_notes: String,
    pub eligibility: String,
    pub eligible_expenses: String,
    pub official_url: String,
    /// Non-empty when the model could not extract program facts.
    pub extraction_problem: String,
}

impl SubsidyDetail {
    pub fn is_usable(&self) -> bool {
        self.extraction_problem.trim().is_empty()
    }
}

pub struct DetailExtractor {
    ai: OpenAi,
}

impl DetailExtractor {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            ai: OpenAi::new(api_key, model).with_temperature(0.1),
        }
    }

    pub async fn extract(&self, url: &str, content: &str) -> Result<SubsidyDetail> {
        debug!(url, "Extracting program details");
        let user = format!("URL: {url}\n\nPage content:\n\n{content}");
        self.ai
            .extract::<SubsidyDetail>(DETAIL_PROMPT, &user)
            .await
            .with_context(|| format!("Detail extraction failed for {url}"))
    }
}

/// Append detail rows to the cumulative CSV, writing the header only when
/// the file is new.
pub fn append_details_csv(path: &Path, details: &[SubsidyDetail]) -> Result<()> {
    if details.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
    for detail in details {
        writer.serialize(detail)?;
    }
    writer.flush()?;
    Ok(())
}

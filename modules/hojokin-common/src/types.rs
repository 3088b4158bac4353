use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Page classification ---

/// What kind of page a URL was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageCategory {
    /// A page listing multiple subsidy programs.
    ListPage,
    /// A page detailing one specific subsidy program.
    IndividualPage,
    /// Not related to subsidy programs.
    #[default]
    Unrelated,
}

impl std::fmt::Display for PageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageCategory::ListPage => write!(f, "list_page"),
            PageCategory::IndividualPage => write!(f, "individual_page"),
            PageCategory::Unrelated => write!(f, "unrelated"),
        }
    }
}

impl PageCategory {
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "list_page" | "list" => Self::ListPage,
            "individual_page" | "individual" => Self::IndividualPage,
            _ => Self::Unrelated,
        }
    }
}

// --- Provenance ---

/// Which pipeline stage discovered a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Surfaced by the initial search-API pass.
    InitialSearch,
    /// Extracted from a classified list page.
    ListExtraction,
    /// Submitted by a human.
    Manual,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::InitialSearch => write!(f, "initial_search"),
            Provenance::ListExtraction => write!(f, "list_extraction"),
            Provenance::Manual => write!(f, "manual"),
        }
    }
}

// --- Pipeline stages ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Classification,
    Extraction,
    Merged,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Search => write!(f, "search"),
            Stage::Classification => write!(f, "classification"),
            Stage::Extraction => write!(f, "extraction"),
            Stage::Merged => write!(f, "merged"),
        }
    }
}

// --- URL Record ---

/// One URL's classification outcome. Unknown or partial JSON coerces to
/// defaults at the boundary rather than failing the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    #[serde(default)]
    pub prefecture: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub category: PageCategory,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub page_title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub subsidy_titles: Vec<String>,
    /// Every stage that discovered this URL. Order of first discovery is kept.
    #[serde(default)]
    pub provenance: Vec<Provenance>,
    /// The list page this URL was extracted from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub classified_at: DateTime<Utc>,
}

impl UrlRecord {
    /// A seed record for a discovered but not-yet-classified URL.
    pub fn seed(url: &str, prefecture: &str, city: &str, provenance: Provenance) -> Self {
        Self {
            url: normalize_url(url),
            prefecture: prefecture.to_string(),
            city: city.to_string(),
            category: PageCategory::Unrelated,
            confidence: 0.0,
            rationale: String::new(),
            page_title: String::new(),
            summary: String::new(),
            subsidy_titles: Vec::new(),
            provenance: vec![provenance],
            parent_url: None,
            classified_at: Utc::now(),
        }
    }

    pub fn has_provenance(&self, p: Provenance) -> bool {
        self.provenance.contains(&p)
    }

    /// Union another record's provenance tags into this one, keeping order.
    pub fn union_provenance(&mut self, other: &[Provenance]) {
        for p in other {
            if !self.provenance.contains(p) {
                self.provenance.push(*p);
            }
        }
    }
}

// --- Run Store ---

/// Output of one pipeline stage for one region. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStore {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub region: String,
    pub stage: Stage,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<UrlRecord>,
}

impl RunStore {
    pub fn new(region: &str, stage: Stage) -> Self {
        Self {
            id: Uuid::new_v4(),
            region: region.to_string(),
            stage,
            generated_at: Utc::now(),
            records: Vec::new(),
        }
    }

    pub fn with_records(region: &str, stage: Stage, records: Vec<UrlRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            region: region.to_string(),
            stage,
            generated_at: Utc::now(),
            records,
        }
    }
}

// --- Search results ---

/// One hit from a web search API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

// --- URL helpers ---

/// Normalize a URL for identity comparison: parse, strip the fragment, and
/// re-serialize. Unparseable input is returned trimmed, unchanged otherwise.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Extract the host from a URL (e.g. "https://www.city.chiba.jp/x" -> "www.city.chiba.jp").
pub fn extract_host(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

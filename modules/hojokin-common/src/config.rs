use std::env;

/// Which search API backs the initial discovery stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchEngine {
    #[default]
    Tavily,
    GoogleCse,
}

impl SearchEngine {
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "google" | "google_cse" | "cse" => Self::GoogleCse,
            _ => Self::Tavily,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // AI provider
    pub openai_api_key: String,
    pub openai_model: String,

    // Search
    pub search_engine: SearchEngine,
    pub tavily_api_key: String,
    pub google_cse_key: Option<String>,
    pub google_cse_cx: Option<String>,

    // Rendered fetching (optional; plain HTTP is used when unset)
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,

    // Local data
    pub city_csv_path: String,
    pub site_csv_path: String,
    pub output_dir: String,

    // Politeness delays between external calls
    pub search_delay_ms: u64,
    pub classify_delay_ms: u64,
}

impl Config {
    /// Load configuration for the full pipeline.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        let search_engine = SearchEngine::from_str_loose(
            &env::var("SEARCH_ENGINE").unwrap_or_else(|_| "tavily".to_string()),
        );

        let (tavily_api_key, google_cse_key, google_cse_cx) = match search_engine {
            SearchEngine::Tavily => (required_env("TAVILY_API_KEY"), env_opt("GOOGLE_CSE_KEY"), env_opt("GOOGLE_CSE_CX")),
            SearchEngine::GoogleCse => (
                env::var("TAVILY_API_KEY").unwrap_or_default(),
                Some(required_env("GOOGLE_CSE_KEY")),
                Some(required_env("GOOGLE_CSE_CX")),
            ),
        };

        Self {
            openai_api_key: required_env("OPENAI_API_KEY"),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            search_engine,
            tavily_api_key,
            google_cse_key,
            google_cse_cx,
            browserless_url: env_opt("BROWSERLESS_URL"),
            browserless_token: env_opt("BROWSERLESS_TOKEN"),
            city_csv_path: env::var("CITY_CSV_PATH")
                .unwrap_or_else(|_| "data/address/city.csv".to_string()),
            site_csv_path: env::var("SITE_CSV_PATH")
                .unwrap_or_else(|_| "data/address/site.csv".to_string()),
            output_dir: env::var("OUTPUT_DIR").unwrap_or_else(|_| "data/output".to_string()),
            search_delay_ms: env_u64("SEARCH_DELAY_MS", 1_000),
            classify_delay_ms: env_u64("CLASSIFY_DELAY_MS", 2_000),
        }
    }

    /// Minimal config for merge-only invocations (no API keys needed).
    pub fn merge_from_env() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_model: String::new(),
            search_engine: SearchEngine::default(),
            tavily_api_key: String::new(),
            google_cse_key: None,
            google_cse_cx: None,
            browserless_url: None,
            browserless_token: None,
            city_csv_path: env::var("CITY_CSV_PATH")
                .unwrap_or_else(|_| "data/address/city.csv".to_string()),
            site_csv_path: env::var("SITE_CSV_PATH")
                .unwrap_or_else(|_| "data/address/site.csv".to_string()),
            output_dir: env::var("OUTPUT_DIR").unwrap_or_else(|_| "data/output".to_string()),
            search_delay_ms: 0,
            classify_delay_ms: 0,
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

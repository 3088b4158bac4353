//! Municipality registry: prefecture/city tables and official-domain lookup.
//!
//! Loaded once from the two address CSVs at startup; lookups are pure
//! functions over the in-memory tables.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// prefecture_id -> prefecture name, JIS X 0401 order.
pub const PREFECTURES: [&str; 47] = [
    "北海道", "青森県", "岩手県", "宮城県", "秋田県", "山形県", "福島県",
    "茨城県", "栃木県", "群馬県", "埼玉県", "千葉県", "東京都", "神奈川県",
    "新潟県", "富山県", "石川県", "福井県", "山梨県", "長野県", "岐阜県",
    "静岡県", "愛知県", "三重県", "滋賀県", "京都府", "大阪府", "兵庫県",
    "奈良県", "和歌山県", "鳥取県", "島根県", "岡山県", "広島県", "山口県",
    "徳島県", "香川県", "愛媛県", "高知県", "福岡県", "佐賀県", "長崎県",
    "熊本県", "大分県", "宮崎県", "鹿児島県", "沖縄県",
];

/// Resolve a prefecture name to its 1-based id.
pub fn prefecture_id(name: &str) -> Option<u8> {
    PREFECTURES
        .iter()
        .position(|p| *p == name.trim())
        .map(|i| (i + 1) as u8)
}

#[derive(Debug, Clone, Deserialize)]
struct CityRow {
    prefecture_id: u8,
    city_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SiteRow {
    pref: String,
    city: String,
    #[serde(default)]
    url: Option<String>,
}

/// In-memory view of the municipality address tables.
pub struct MunicipalityRegistry {
    cities: Vec<CityRow>,
    sites: Vec<SiteRow>,
}

impl MunicipalityRegistry {
    /// Load both tables. Rows that fail to parse are skipped with a warning.
    pub fn load(city_csv: &Path, site_csv: &Path) -> Result<Self> {
        let cities = read_rows::<CityRow>(city_csv)
            .with_context(|| format!("Failed to read city table {}", city_csv.display()))?;
        let sites = read_rows::<SiteRow>(site_csv)
            .with_context(|| format!("Failed to read site table {}", site_csv.display()))?;
        Ok(Self { cities, sites })
    }

    #[cfg(test)]
    fn from_raw(cities: Vec<(u8, &str)>, sites: Vec<(&str, &str, Option<&str>)>) -> Self {
        Self {
            cities: cities
                .into_iter()
                .map(|(prefecture_id, city_name)| CityRow {
                    prefecture_id,
                    city_name: city_name.to_string(),
                })
                .collect(),
            sites: sites
                .into_iter()
                .map(|(pref, city, url)| SiteRow {
                    pref: pref.to_string(),
                    city: city.to_string(),
                    url: url.map(String::from),
                })
                .collect(),
        }
    }

    /// All municipalities of a prefecture, deduplicated, table order preserved.
    pub fn cities_in(&self, prefecture: &str) -> Vec<String> {
        let Some(id) = prefecture_id(prefecture) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        self.cities
            .iter()
            .filter(|row| row.prefecture_id == id)
            .filter(|row| seen.insert(row.city_name.clone()))
            .map(|row| row.city_name.clone())
            .collect()
    }

    /// Resolve an input city name to the registered formal name.
    /// Exact match first, then suffix match ("川越町" -> "三重郡川越町"),
    /// falling back to the input unchanged.
    pub fn formal_city_name(&self, input: &str, prefecture: &str) -> String {
        let Some(id) = prefecture_id(prefecture) else {
            return input.to_string();
        };
        let in_prefecture: Vec<&str> = self
            .cities
            .iter()
            .filter(|row| row.prefecture_id == id)
            .map(|row| row.city_name.as_str())
            .collect();

        if in_prefecture.contains(&input) {
            return input.to_string();
        }
        for city in &in_prefecture {
            if city.ends_with(input) {
                return city.to_string();
            }
        }
        input.to_string()
    }

    /// Official site host for a municipality, if the site table has one.
    /// Exact city match first, then suffix match ("越智郡上島町" vs "上島町").
    pub fn official_domain(&self, city: &str, prefecture: &str) -> Option<String> {
        let in_prefecture: Vec<&SiteRow> =
            self.sites.iter().filter(|row| row.pref == prefecture).collect();

        for row in &in_prefecture {
            if row.city == city {
                if let Some(url) = row.url.as_deref() {
                    return host_of(url);
                }
            }
        }
        for row in &in_prefecture {
            if city.ends_with(row.city.as_str()) {
                if let Some(url) = row.url.as_deref() {
                    return host_of(url);
                }
            }
        }
        None
    }
}

/// Strip scheme and path from a site URL, leaving the bare host.
fn host_of(url: &str) -> Option<String> {
    let host = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for (i, result) in reader.deserialize().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!(path = %path.display(), row = i + 1, error = %e, "Skipping malformed row"),
        }
    }
    Ok(rows)
}

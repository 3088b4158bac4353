//! Stage orchestration: search → classify → extract → merge, sequentially.
//!
//! Each stage reads the previous stage's store and writes its own; the
//! merged registry is written only after the in-memory merge completes.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use hojokin_common::{Config, HojokinError, PageCategory, Provenance, RunStore, Stage, UrlRecord};
use tracing::{info, warn};

use crate::classify::{record_from_response, PageClassifier, UrlClassifier};
use crate::content::{prepare_for_model, MAX_CLASSIFY_CHARS, MAX_DETAIL_CHARS};
use crate::details::{append_details_csv, DetailExtractor, SubsidyDetail};
use crate::extract::{extract_from_list_pages, ExtractionOutcome};
use crate::fetch::{FallbackFetcher, PageFetcher};
use crate::merge::merge;
use crate::regions::MunicipalityRegistry;
use crate::search::{search_municipality, searcher_from_config, WebSearcher};
use crate::stats::PipelineStats;
use crate::store;

#[derive(Debug, Clone)]
pub struct StageLimits {
    pub max_cities: Option<usize>,
    pub max_results_per_query: usize,
    pub max_links_per_page: usize,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_cities: None,
            max_results_per_query: 10,
            max_links_per_page: crate::extract::DEFAULT_MAX_LINKS_PER_PAGE,
        }
    }
}

pub struct SearchOutcome {
    pub store: RunStore,
    pub municipalities: u32,
}

pub struct ClassifyOutcome {
    pub store: RunStore,
    pub failures: u32,
}

pub struct Pipeline {
    config: Config,
    registry: MunicipalityRegistry,
    searcher: Box<dyn WebSearcher>,
    fetcher: Box<dyn PageFetcher>,
    classifier: Box<dyn UrlClassifier>,
}

impl Pipeline {
    pub fn from_config(config: Config) -> Result<Self> {
        let registry = MunicipalityRegistry::load(
            Path::new(&config.city_csv_path),
            Path::new(&config.site_csv_path),
        )
        .map_err(|e| HojokinError::Config(format!("Address tables unavailable: {e}")))?;
        let searcher = searcher_from_config(&config);
        let fetcher: Box<dyn PageFetcher> = Box::new(FallbackFetcher::from_config(&config));
        let classifier: Box<dyn UrlClassifier> = Box::new(PageClassifier::new(
            &config.openai_api_key,
            &config.openai_model,
        ));
        Ok(Self {
            config,
            registry,
            searcher,
            fetcher,
            classifier,
        })
    }

    pub fn output_dir(&self) -> &Path {
        Path::new(&self.config.output_dir)
    }

    fn search_delay(&self) -> Duration {
        Duration::from_millis(self.config.search_delay_ms)
    }

    fn classify_delay(&self) -> Duration {
        Duration::from_millis(self.config.classify_delay_ms)
    }

    /// Stage 1: search the configured engine for every municipality of a
    /// prefecture and seed a run store with the discovered URLs.
    pub async fn search_stage(
        &self,
        prefecture: &str,
        limits: &StageLimits,
    ) -> Result<SearchOutcome> {
        let mut cities = self.registry.cities_in(prefecture);
        if cities.is_empty() {
            bail!("No municipalities found for {prefecture} (unknown prefecture or empty city table)");
        }
        if let Some(max) = limits.max_cities {
            cities.truncate(max);
        }

        info!(prefecture, municipalities = cities.len(), "Search stage starting");

        let mut run = RunStore::new(prefecture, Stage::Search);
        for (i, city) in cities.iter().enumerate() {
            let formal = self.registry.formal_city_name(city, prefecture);
            let domain = self.registry.official_domain(&formal, prefecture);
            info!(
                city = formal.as_str(),
                index = i + 1,
                total = cities.len(),
                official_domain = domain.as_deref().unwrap_or("-"),
                "Searching municipality"
            );

            let hits = search_municipality(
                self.searcher.as_ref(),
                prefecture,
                &formal,
                domain.as_deref(),
                limits.max_results_per_query,
                self.search_delay(),
            )
            .await;

            for hit in hits {
                let mut record =
                    UrlRecord::seed(&hit.url, prefecture, &formal, Provenance::InitialSearch);
                record.page_title = hit.title;
                run.records.push(record);
            }
        }

        Ok(SearchOutcome {
            municipalities: cities.len() as u32,
            store: run,
        })
    }

    /// Stage 2: fetch and classify every seeded URL. Per-URL failures are
    /// logged and skipped.
    pub async fn classify_stage(&self, seeds: &RunStore) -> Result<ClassifyOutcome> {
        info!(
            region = seeds.region.as_str(),
            urls = seeds.records.len(),
            "Classification stage starting"
        );

        let mut run = RunStore::new(&seeds.region, Stage::Classification);
        let mut failures = 0u32;

        for (i, seed) in seeds.records.iter().enumerate() {
            info!(
                url = seed.url.as_str(),
                index = i + 1,
                total = seeds.records.len(),
                "Classifying URL"
            );

            match self.classify_one(seed).await {
                Ok(record) => run.records.push(record),
                Err(e) => {
                    warn!(url = seed.url.as_str(), error = %e, "Classification failed, skipping");
                    failures += 1;
                }
            }

            if !self.classify_delay().is_zero() {
                tokio::time::sleep(self.classify_delay()).await;
            }
        }

        Ok(ClassifyOutcome { store: run, failures })
    }

    async fn classify_one(&self, seed: &UrlRecord) -> Result<UrlRecord> {
        let html = self.fetcher.fetch(&seed.url).await?;
        let content = prepare_for_model(&html, &seed.url, MAX_CLASSIFY_CHARS);
        if content.is_empty() {
            return Err(HojokinError::Classification("empty page".to_string()).into());
        }
        let response = self.classifier.classify(&seed.url, &content).await?;
        Ok(record_from_response(
            &seed.url,
            &seed.prefecture,
            &seed.city,
            seed.provenance.first().copied().unwrap_or(Provenance::InitialSearch),
            seed.parent_url.as_deref(),
            response,
        ))
    }

    /// Stage 3: expand classified list pages into their linked pages.
    pub async fn extract_stage(
        &self,
        classified: &RunStore,
        limits: &StageLimits,
    ) -> ExtractionOutcome {
        extract_from_list_pages(
            &classified.records,
            self.fetcher.as_ref(),
            self.classifier.as_ref(),
            limits.max_links_per_page,
            self.classify_delay(),
        )
        .await
    }

    /// Stage 4: extract program details for merged individual pages into the
    /// cumulative details CSV. Returns the number of rows appended.
    pub async fn details_stage(&self, records: &[UrlRecord]) -> Result<usize> {
        let extractor = DetailExtractor::new(&self.config.openai_api_key, &self.config.openai_model);
        let individual: Vec<&UrlRecord> = records
            .iter()
            .filter(|r| r.category == PageCategory::IndividualPage)
            .collect();

        info!(pages = individual.len(), "Detail extraction starting");

        let mut details: Vec<SubsidyDetail> = Vec::new();
        for record in individual {
            let detail = match self.detail_one(&extractor, record).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(url = record.url.as_str(), error = %e, "Detail extraction failed, skipping");
                    continue;
                }
            };
            if !detail.is_usable() {
                warn!(
                    url = record.url.as_str(),
                    problem = detail.extraction_problem.as_str(),
                    "Page reported unusable, skipping"
                );
                continue;
            }
            details.push(detail);

            if !self.classify_delay().is_zero() {
                tokio::time::sleep(self.classify_delay()).await;
            }
        }

        let csv_path = self.output_dir().join("subsidy_details.csv");
        append_details_csv(&csv_path, &details)?;
        info!(rows = details.len(), path = %csv_path.display(), "Details appended");
        Ok(details.len())
    }

    async fn detail_one(
        &self,
        extractor: &DetailExtractor,
        record: &UrlRecord,
    ) -> Result<SubsidyDetail> {
        let html = self.fetcher.fetch(&record.url).await?;
        let content = prepare_for_model(&html, &record.url, MAX_DETAIL_CHARS);
        if content.is_empty() {
            return Err(HojokinError::Classification("empty page".to_string()).into());
        }
        let mut detail = extractor.extract(&record.url, &content).await?;
        // Municipality identity comes from the registry, not the model.
        detail.prefecture = record.prefecture.clone();
        detail.city = record.city.clone();
        if detail.official_url.trim().is_empty() {
            detail.official_url = record.url.clone();
        }
        Ok(detail)
    }

    /// The full pipeline for one prefecture.
    pub async fn run(&self, prefecture: &str, limits: &StageLimits) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();

        info!(prefecture, "Step 1/4: municipality search");
        let search = self.search_stage(prefecture, limits).await?;
        stats.municipalities_searched = search.municipalities;
        stats.urls_discovered = search.store.records.len() as u32;
        store::write_store(self.output_dir(), &search.store)?;

        info!(prefecture, "Step 2/4: page classification");
        let classified = self.classify_stage(&search.store).await?;
        stats.urls_classified = classified.store.records.len() as u32;
        stats.classification_failures = classified.failures;
        for record in &classified.store.records {
            match record.category {
                PageCategory::ListPage => stats.list_pages += 1,
                PageCategory::IndividualPage => stats.individual_pages += 1,
                PageCategory::Unrelated => stats.unrelated += 1,
            }
        }
        store::write_store(self.output_dir(), &classified.store)?;
        store::write_individual_derivatives(self.output_dir(), &classified.store)?;

        info!(prefecture, "Step 3/4: list-page expansion");
        let extraction = self.extract_stage(&classified.store, limits).await;
        stats.links_extracted = extraction.links_found as u32;
        stats.extracted_classified = extraction.records.len() as u32;
        stats.classification_failures += extraction.failures as u32;
        let extracted_store =
            RunStore::with_records(prefecture, Stage::Extraction, extraction.records);
        store::write_store(self.output_dir(), &extracted_store)?;

        info!(prefecture, "Step 4/4: merge");
        let merged = merge(&[classified.store, extracted_store], prefecture);
        store::write_merged_outputs(self.output_dir(), &merged)?;
        stats.merged_records = merged.records.len() as u32;
        stats.merged_individual_pages = merged.stats.individual_pages as u32;
        stats.duplicates_removed = merged.stats.duplicates_removed as u32;
        stats.new_from_extraction = merged.stats.new_from_extraction as u32;

        Ok(stats)
    }
}

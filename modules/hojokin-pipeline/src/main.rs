use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hojokin_common::{Config, PageCategory, Stage};
use hojokin_pipeline::pipeline::{Pipeline, StageLimits};
use hojokin_pipeline::store;

#[derive(Parser)]
#[command(name = "hojokin", about = "Municipal subsidy-page discovery pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search subsidy URLs for every municipality of a prefecture
    Search {
        /// Prefecture name (e.g. 千葉県)
        #[arg(long)]
        prefecture: String,
        /// Limit the number of municipalities processed
        #[arg(long)]
        max_cities: Option<usize>,
        /// Max results per search query
        #[arg(long, default_value = "10")]
        max_results: usize,
    },
    /// Classify the URLs of a search store
    Classify {
        /// Path to a search-stage store (JSON)
        #[arg(long)]
        input: PathBuf,
        /// Region override for bare-array store files
        #[arg(long)]
        region: Option<String>,
    },
    /// Expand list pages of a classification store into their linked pages
    Extract {
        /// Path to a classification-stage store (JSON)
        #[arg(long)]
        input: PathBuf,
        /// Region override for bare-array store files
        #[arg(long)]
        region: Option<String>,
        /// Max links classified per list page
        #[arg(long, default_value = "30")]
        max_links: usize,
    },
    /// Merge run stores into the consolidated per-region registry
    Merge {
        /// Region the stores belong to
        #[arg(long)]
        region: String,
        /// Store files to merge, oldest first
        inputs: Vec<PathBuf>,
    },
    /// Extract program details for a store's individual pages
    Details {
        /// Path to a merged or classification store (JSON)
        #[arg(long)]
        input: PathBuf,
        /// Region override for bare-array store files
        #[arg(long)]
        region: Option<String>,
    },
    /// Full pipeline: search, classify, extract, merge
    Run {
        /// Prefecture name (e.g. 千葉県)
        #[arg(long)]
        prefecture: String,
        /// Limit the number of municipalities processed
        #[arg(long)]
        max_cities: Option<usize>,
        /// Max results per search query
        #[arg(long, default_value = "10")]
        max_results: usize,
        /// Max links classified per list page
        #[arg(long, default_value = "30")]
        max_links: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "hojokin=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            prefecture,
            max_cities,
            max_results,
        } => {
            let pipeline = Pipeline::from_config(Config::from_env())?;
            let limits = StageLimits {
                max_cities,
                max_results_per_query: max_results,
                ..StageLimits::default()
            };
            let outcome = pipeline.search_stage(&prefecture, &limits).await?;
            let path = store::write_store(pipeline.output_dir(), &outcome.store)?;
            info!(
                municipalities = outcome.municipalities,
                urls = outcome.store.records.len(),
                path = %path.display(),
                "Search complete"
            );
        }

        Commands::Classify { input, region } => {
            let pipeline = Pipeline::from_config(Config::from_env())?;
            let seeds = load_single_store(&input, region.as_deref())?;
            let outcome = pipeline.classify_stage(&seeds).await?;
            let path = store::write_store(pipeline.output_dir(), &outcome.store)?;
            store::write_individual_derivatives(pipeline.output_dir(), &outcome.store)?;
            info!(
                classified = outcome.store.records.len(),
                failures = outcome.failures,
                path = %path.display(),
                "Classification complete"
            );
        }

        Commands::Extract {
            input,
            region,
            max_links,
        } => {
            let pipeline = Pipeline::from_config(Config::from_env())?;
            let classified = load_single_store(&input, region.as_deref())?;
            let limits = StageLimits {
                max_links_per_page: max_links,
                ..StageLimits::default()
            };
            let outcome = pipeline.extract_stage(&classified, &limits).await;
            let run = hojokin_common::RunStore::with_records(
                &classified.region,
                Stage::Extraction,
                outcome.records,
            );
            let path = store::write_store(pipeline.output_dir(), &run)?;
            info!(
                list_pages = outcome.list_pages_processed,
                classified = run.records.len(),
                failures = outcome.failures,
                path = %path.display(),
                "Extraction complete"
            );
        }

        Commands::Merge { region, inputs } => {
            if inputs.is_empty() {
                bail!("Pass at least one store file to merge");
            }
            // No API keys or address tables needed; merging is pure file work.
            let config = Config::merge_from_env();
            let stores = store::load_stores(&inputs, &region);
            let merged = hojokin_pipeline::merge::merge(&stores, &region);
            store::write_merged_outputs(std::path::Path::new(&config.output_dir), &merged)?;
            println!("{}", merged.stats);
        }

        Commands::Details { input, region } => {
            let pipeline = Pipeline::from_config(Config::from_env())?;
            let run = load_single_store(&input, region.as_deref())?;
            let rows = pipeline.details_stage(&run.records).await?;
            let individual = run
                .records
                .iter()
                .filter(|r| r.category == PageCategory::IndividualPage)
                .count();
            info!(rows, individual_pages = individual, "Detail extraction complete");
        }

        Commands::Run {
            prefecture,
            max_cities,
            max_results,
            max_links,
        } => {
            let pipeline = Pipeline::from_config(Config::from_env())?;
            let limits = StageLimits {
                max_cities,
                max_results_per_query: max_results,
                max_links_per_page: max_links,
            };
            let stats = pipeline.run(&prefecture, &limits).await?;
            println!("{stats}");
        }
    }

    Ok(())
}

/// Load one store file, tolerating bare-array files via `--region`.
fn load_single_store(
    path: &PathBuf,
    region: Option<&str>,
) -> Result<hojokin_common::RunStore> {
    let stores = store::load_stores(std::slice::from_ref(path), region.unwrap_or_default());
    let Some(run) = stores.into_iter().next() else {
        bail!("Could not read store file {}", path.display());
    };
    if run.region.is_empty() {
        bail!(
            "Store {} does not name its region; pass --region",
            path.display()
        );
    }
    Ok(run)
}

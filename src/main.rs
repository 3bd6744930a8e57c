mod config;
mod db;
mod discover;
mod enrich;
mod error;
mod fetch;
mod parser;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Settings;
use crate::fetch::WebFetcher;

#[derive(Parser)]
#[command(
    name = "jobscrape",
    about = "Job listing scraper: discover listings, then backfill full descriptions"
)]
struct Cli {
    /// Config file (default: ./jobscrape.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and the job_listings table
    Setup,
    /// Fetch listing page(s) and store new job summaries
    Scrape,
    /// Fetch detail pages for jobs without a description
    Update {
        /// Max jobs to update (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// setup, scrape and update in that order
    All {
        /// Max jobs to update (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show row counts
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    settings.validate()?;

    match cli.command {
        Commands::Setup => setup(&settings).await?,
        Commands::Scrape => scrape(&settings).await?,
        Commands::Update { limit } => update(&settings, limit).await?,
        Commands::All { limit } => {
            setup(&settings).await?;
            scrape(&settings).await?;
            update(&settings, limit).await?;
        }
        Commands::Stats { json } => {
            let store = db::connect(&settings.database).await?;
            store.init_schema().await?;
            let s = store.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&s)?);
            } else {
                println!("Total:    {}", s.total);
                println!("Enriched: {}", s.enriched);
                println!("Pending:  {}", s.pending);
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

async fn setup(settings: &Settings) -> error::Result<()> {
    db::create_database(&settings.database).await?;
    let store = db::connect(&settings.database).await?;
    store.init_schema().await?;
    println!("Table 'job_listings' is ready.");
    Ok(())
}

async fn scrape(settings: &Settings) -> error::Result<()> {
    let store = db::connect(&settings.database).await?;
    store.init_schema().await?;
    let fetcher = WebFetcher::new(settings)?;

    let stats = discover::run(settings, store.as_ref(), &fetcher).await?;
    banner("JOB SCRAPING COMPLETED!");
    println!("Listing pages scraped: {}", stats.pages);
    println!("Jobs found on page(s): {}", stats.found);
    println!("New jobs inserted:     {}", stats.inserted);
    Ok(())
}

async fn update(settings: &Settings, limit: Option<usize>) -> error::Result<()> {
    let store = db::connect(&settings.database).await?;
    store.init_schema().await?;

    let report = enrich::run_stage(settings, store.as_ref(), limit).await?;
    if report.processed == 0 {
        println!("No jobs without a description. Run 'scrape' first or all jobs are done.");
        return Ok(());
    }

    banner("DESCRIPTION SCRAPING COMPLETED!");
    println!("Jobs processed:       {}", report.processed);
    println!("Successfully updated: {}", report.enriched);
    println!("Left pending:         {}", report.failed.len());
    for (url, reason) in &report.failed {
        info!("pending: {} ({})", url, reason);
    }
    Ok(())
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{}", title);
    println!("{}", "=".repeat(60));
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

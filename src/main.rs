// src/main.rs
// =============================================================================
// Entry point of the image-crawler CLI.
//
// What happens here:
// 1. Parse command-line arguments using clap
// 2. Set up logging (tracing, written to stderr)
// 3. Build the crawl configuration: defaults, then --config file, then flags
// 4. Run the crawl and print its summary to stdout
// 5. Exit with 0 on success, 2 on any fatal error
// =============================================================================

mod cache;
mod cli;
mod config;
mod crawl;
mod error;
mod imaging;
mod page;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, CrawlArgs};
use config::CrawlConfig;
use crawl::{CrawlSummary, Crawler};
use imaging::TransformKind;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            // {:#} prints the whole context chain on one line
            eprintln!("Error: {e:#}");
            2
        }
    };

    std::process::exit(exit_code);
}

// RUST_LOG wins when set; otherwise -v picks how chatty we are
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,image_crawler={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl(args) => handle_crawl(args).await,
        Commands::Transforms => {
            list_transforms();
            Ok(())
        }
    }
}

async fn handle_crawl(args: CrawlArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => CrawlConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CrawlConfig::default(),
    };
    let config = args.apply(base);

    let crawler = Crawler::from_config(config, &args.root)
        .with_context(|| format!("setting up crawl of {}", args.root))?;

    if !args.json {
        println!("🔍 Crawling {}", crawler.root());
    }

    let summary = crawler.perform_crawl().await.context("crawl aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &CrawlSummary) {
    println!();
    println!("📊 Summary:");
    println!("   {:<18} {}", "Root:", summary.root_url);
    println!("   {:<18} {}", "Max depth:", summary.max_depth);
    println!("   {:<18} {:?}", "Strategy:", summary.strategy);
    println!("   {:<18} {}", "Transforms:", summary.transforms.join(", "));
    println!("   {:<18} {}", "Pages visited:", summary.pages_visited);
    println!("   {:<18} {}", "Images produced:", summary.images_produced);
    println!("   {:<18} {} ms", "Elapsed:", summary.elapsed_ms);
}

fn list_transforms() {
    for kind in TransformKind::value_variants() {
        let help = kind
            .to_possible_value()
            .and_then(|value| value.get_help().map(|help| help.to_string()))
            .unwrap_or_default();
        println!("{:<12} {}", kind.name(), help);
    }
}

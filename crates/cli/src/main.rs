// ABOUTME: CLI for the opendata collection engine.
// ABOUTME: Discovers topic/country configurations, runs them, and prints the run report.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use opendata_engine::{CountryRegistry, Engine};
use tracing_subscriber::EnvFilter;

/// Collect open data from configured remote sources.
#[derive(Parser, Debug)]
#[command(name = "opendata")]
#[command(about = "Run topic/country data collection from declarative configurations")]
struct Args {
    /// Configuration file(s) to run. When omitted, configurations are
    /// discovered under --topics-dir.
    configs: Vec<PathBuf>,

    /// Root directory of topic/country configurations.
    #[arg(long, default_value = "topics")]
    topics_dir: PathBuf,

    /// Only run configurations for this topic.
    #[arg(long)]
    topic: Option<String>,

    /// Only run configurations for this country code.
    #[arg(long)]
    country: Option<String>,

    /// Output dataset root.
    #[arg(long, default_value = "data")]
    out: PathBuf,

    /// Country registry file used to validate --country.
    #[arg(long)]
    countries: Option<PathBuf>,

    /// Concurrent fetches per configuration.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Per-source fetch timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// List matching configurations and exit.
    #[arg(long)]
    list_configs: bool,

    /// Print the structured report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Allow fetching from private/local networks.
    #[arg(long)]
    allow_private_networks: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Finds `index.yaml` files laid out as `<topics_dir>/<topic>/<cc>/index.yaml`,
/// optionally filtered by topic and country code.
fn discover_configs(
    topics_dir: &PathBuf,
    topic: Option<&str>,
    country: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut configs = Vec::new();
    if !topics_dir.is_dir() {
        return Ok(configs);
    }

    let mut topic_dirs: Vec<PathBuf> = std::fs::read_dir(topics_dir)
        .with_context(|| format!("reading {}", topics_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    topic_dirs.sort();

    for topic_dir in topic_dirs {
        let topic_name = topic_dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if let Some(wanted) = topic {
            if topic_name != wanted {
                continue;
            }
        }

        let mut country_dirs: Vec<PathBuf> = std::fs::read_dir(&topic_dir)
            .with_context(|| format!("reading {}", topic_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        country_dirs.sort();

        for country_dir in country_dirs {
            let country_name = country_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("");
            if let Some(wanted) = country {
                if !country_name.eq_ignore_ascii_case(wanted) {
                    continue;
                }
            }
            let index = country_dir.join("index.yaml");
            if index.exists() {
                configs.push(index);
            }
        }
    }

    Ok(configs)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let (Some(country), Some(registry_path)) = (&args.country, &args.countries) {
        let registry = CountryRegistry::load(registry_path)
            .with_context(|| format!("loading country registry {}", registry_path.display()))?;
        if !registry.is_valid_code(country) {
            bail!(
                "invalid country code \"{}\"; known codes: {}",
                country,
                registry.codes().collect::<Vec<_>>().join(", ")
            );
        }
    }

    let configs = if args.configs.is_empty() {
        discover_configs(
            &args.topics_dir,
            args.topic.as_deref(),
            args.country.as_deref(),
        )?
    } else {
        args.configs.clone()
    };

    if args.list_configs {
        if configs.is_empty() {
            println!("no configurations found");
        } else {
            for config in &configs {
                println!("{}", config.display());
            }
        }
        return Ok(());
    }

    if configs.is_empty() {
        bail!(
            "no configurations found under {} (topic={:?}, country={:?})",
            args.topics_dir.display(),
            args.topic,
            args.country
        );
    }

    let engine = Engine::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .concurrency(args.concurrency)
        .allow_private_networks(args.allow_private_networks)
        .out_dir(&args.out)
        .build();

    let report = engine.run_paths(&configs).await;

    let (text_path, json_path) = report
        .persist(&args.out)
        .context("persisting the run report")?;
    tracing::info!(
        text = %text_path.display(),
        json = %json_path.display(),
        "report persisted"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }

    Ok(())
}

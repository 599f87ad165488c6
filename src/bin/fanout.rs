//! CLI binary for fanout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fanout::fanout_engine::{ContentType, Provider, Query, StrategyKind};
use fanout::{Hub, HubConfig, load_fixtures};
use tracing_subscriber::EnvFilter;

/// Fanout: route a query across providers and merge the answers.
#[derive(Parser)]
#[command(name = "fanout", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "FANOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Route a query against fixture-backed providers and print the merged result as JSON.
    Route {
        /// Query text.
        query: String,

        /// JSON fixture file describing provider behaviour.
        #[arg(short, long)]
        fixtures: Option<PathBuf>,

        /// Force a strategy (`parallel` or `cascade`).
        #[arg(short, long, value_parser = parse_strategy)]
        strategy: Option<StrategyKind>,

        /// Declare the content type instead of inferring it.
        #[arg(short = 't', long, value_parser = parse_content_type)]
        content_type: Option<ContentType>,

        /// Overall deadline in milliseconds.
        #[arg(short, long)]
        deadline_ms: Option<u64>,

        /// Maximum merged results.
        #[arg(short = 'n', long)]
        max_results: Option<usize>,

        /// Restrict routing to these providers.
        #[arg(short, long = "provider")]
        providers: Vec<String>,

        /// Keep full page content in the output.
        #[arg(long)]
        raw: bool,
    },

    /// Print per-provider health as JSON.
    Health {
        /// JSON fixture file supplying the provider backends.
        #[arg(short, long)]
        fixtures: Option<PathBuf>,
    },

    /// Validate the configuration and print the effective settings.
    CheckConfig,
}

fn parse_strategy(raw: &str) -> Result<StrategyKind, String> {
    StrategyKind::parse(raw).ok_or_else(|| format!("unknown strategy {raw:?}"))
}

fn parse_content_type(raw: &str) -> Result<ContentType, String> {
    ContentType::parse(raw).ok_or_else(|| {
        let names: Vec<&str> = ContentType::all().iter().map(ContentType::name).collect();
        format!("unknown content type {raw:?} (expected one of {})", names.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fanout=info,fanout_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HubConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Route {
            query,
            fixtures,
            strategy,
            content_type,
            deadline_ms,
            max_results,
            providers,
            raw,
        } => {
            let hub = Hub::build(&config, backends(fixtures.as_deref())?)?;
            let mut query = Query::new(&query).with_raw_content(raw);
            if let Some(strategy) = strategy {
                query = query.with_strategy(strategy);
            }
            if let Some(content_type) = content_type {
                query = query.with_content_type(content_type);
            }
            if let Some(ms) = deadline_ms {
                query = query.with_deadline(Duration::from_millis(ms));
            }
            if let Some(max_results) = max_results {
                query = query.with_max_results(max_results);
            }
            if !providers.is_empty() {
                query = query.with_providers(providers);
            }
            let result = hub.route(&query).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Health { fixtures } => {
            let hub = Hub::build(&config, backends(fixtures.as_deref())?)?;
            println!("{}", serde_json::to_string_pretty(&hub.router().health())?);
        }
        Command::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            eprintln!("configuration OK ({} providers)", config.providers.len());
        }
    }
    Ok(())
}

fn backends(fixtures: Option<&std::path::Path>) -> anyhow::Result<Vec<Arc<dyn Provider>>> {
    let Some(path) = fixtures else {
        return Ok(Vec::new());
    };
    let providers = load_fixtures(path).with_context(|| format!("loading fixtures from {}", path.display()))?;
    Ok(providers
        .into_iter()
        .map(|p| Arc::new(p) as Arc<dyn Provider>)
        .collect())
}

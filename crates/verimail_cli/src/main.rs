//! verimail operator CLI.
//!
//! Thin wrapper over the verification engine: single and batch verification,
//! store statistics, and bulk migration between store backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use verimail_core::{
    Dispatcher, HttpLookupConfig, HttpPersonLookup, MxResolver, NameHint, PersonLookup,
    RemoteConfig, RemoteStore, ScanFilter, SqliteStore, VerdictStore, VerifyRequest,
};

mod config;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "verimail",
    version,
    about = "Tiered email deliverability verification"
)]
struct Cli {
    /// Path to a Config.toml (defaults to ./Config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a single address.
    Verify {
        address: String,
        /// First name hint for the pattern/enrichment tiers.
        #[arg(long)]
        first: Option<String>,
        /// Last name hint.
        #[arg(long)]
        last: Option<String>,
        /// Company hint.
        #[arg(long)]
        company: Option<String>,
        /// Emit the full verdict as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Verify a newline-delimited list of addresses.
    Batch {
        /// Input file, one address per line.
        #[arg(long)]
        input: PathBuf,
        /// Output JSONL file (stdout when omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show verdict store statistics.
    Stats,

    /// Copy verdicts between stores (`sqlite:PATH` or `remote:URL`).
    Migrate {
        /// Source store spec.
        #[arg(long)]
        from: String,
        /// Target store spec.
        #[arg(long)]
        to: String,
        /// API key for remote specs.
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = config::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&app_config)?;

    match cli.command {
        Command::Verify {
            address,
            first,
            last,
            company,
            json,
        } => {
            let dispatcher = build_dispatcher(&app_config)?;
            let hint = NameHint {
                first,
                last,
                company,
            };
            let request = VerifyRequest::with_hint(address, hint);
            let outcome = dispatcher.verify(request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                let v = &outcome.verdict;
                println!(
                    "{}\t{}\ttier={}\treason={}",
                    v.normalized, v.reachability, v.tier, outcome.reason
                );
            }
        }

        Command::Batch { input, output } => {
            let dispatcher = build_dispatcher(&app_config)?;
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let addresses: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .collect();
            info!(count = addresses.len(), "verifying batch");

            let mut lines: Vec<String> = Vec::with_capacity(addresses.len());
            for chunk in addresses.chunks(app_config.verifier.max_batch) {
                let requests = chunk.iter().map(|a| VerifyRequest::new(*a)).collect();
                let outcomes = dispatcher.verify_batch(requests).await?;
                for outcome in &outcomes {
                    lines.push(serde_json::to_string(outcome)?);
                }
            }

            let health = dispatcher.store_health();
            if health.degraded {
                warn!(
                    buffered = health.buffered_writes,
                    "verdict store is degraded; some writes are buffered"
                );
            }

            match output {
                Some(path) => {
                    std::fs::write(&path, lines.join("\n") + "\n")
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), count = lines.len(), "batch results written");
                }
                None => {
                    for line in lines {
                        println!("{line}");
                    }
                }
            }
        }

        Command::Stats => {
            let store = open_configured_store(&app_config)?;
            let stats = store.stats().await?;
            println!("total:     {}", stats.total);
            let mut rows: Vec<_> = stats.by_reachability.iter().collect();
            rows.sort();
            for (reachability, count) in rows {
                println!("{reachability:<10} {count}");
            }
            println!("catch-all: {}", stats.catch_all);
        }

        Command::Migrate { from, to, api_key } => {
            let source = open_store_spec(&from, api_key.as_deref())?;
            let target = open_store_spec(&to, api_key.as_deref())?;
            info!(%from, %to, "migrating verdicts");
            let copied =
                verimail_core::migrate(source.as_ref(), target.as_ref(), &ScanFilter::default())
                    .await?;
            println!("migrated {copied} verdicts");
        }
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_level.clone().into());

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

fn build_dispatcher(config: &AppConfig) -> Result<Arc<Dispatcher>> {
    let enrichment = lookup_providers(config)?;
    let core_config = config
        .verifier
        .to_core(config.enrichment.enabled && !enrichment.is_empty());
    let resolver = Arc::new(MxResolver::new(
        core_config.dns_timeout,
        core_config.dns_attempts,
    ));
    let store = open_configured_store(config)?;

    Dispatcher::new(core_config, resolver, store, enrichment)
        .map_err(|e| anyhow::anyhow!("building dispatcher: {e}"))
}

fn lookup_providers(config: &AppConfig) -> Result<Vec<Arc<dyn PersonLookup>>> {
    if !config.enrichment.enabled {
        return Ok(Vec::new());
    }

    let mut providers: Vec<Arc<dyn PersonLookup>> = Vec::new();
    if let (Some(endpoint), Some(key)) = (
        &config.enrichment.cheap_endpoint,
        &config.enrichment.cheap_api_key,
    ) {
        providers.push(Arc::new(HttpPersonLookup::new(HttpLookupConfig {
            name: "cheap".to_string(),
            endpoint: endpoint.clone(),
            api_key: key.clone(),
            cost: 0.0005,
            timeout: Duration::from_secs(5),
        })?));
    }
    if let (Some(endpoint), Some(key)) = (
        &config.enrichment.expensive_endpoint,
        &config.enrichment.expensive_api_key,
    ) {
        providers.push(Arc::new(HttpPersonLookup::new(HttpLookupConfig {
            name: "expensive".to_string(),
            endpoint: endpoint.clone(),
            api_key: key.clone(),
            cost: 0.10,
            timeout: Duration::from_secs(10),
        })?));
    }
    Ok(providers)
}

fn open_configured_store(config: &AppConfig) -> Result<Arc<dyn VerdictStore>> {
    match config.store.backend.as_str() {
        "embedded" => Ok(Arc::new(SqliteStore::open(&config.store.path)?)),
        "remote" => {
            let url = config
                .store
                .remote_url
                .as_ref()
                .context("store.remote_url is required for the remote backend")?;
            let key = config
                .store
                .remote_api_key
                .as_ref()
                .context("store.remote_api_key is required for the remote backend")?;
            Ok(Arc::new(RemoteStore::new(&RemoteConfig {
                base_url: url.clone(),
                api_key: key.clone(),
                timeout: Duration::from_secs(10),
            })?))
        }
        other => bail!("unknown store backend {other:?} (expected embedded or remote)"),
    }
}

/// Parse a migration spec: `sqlite:verified.db` or `remote:https://...`.
fn open_store_spec(spec: &str, api_key: Option<&str>) -> Result<Arc<dyn VerdictStore>> {
    if let Some(path) = spec.strip_prefix("sqlite:") {
        return Ok(Arc::new(SqliteStore::open(path)?));
    }
    if let Some(url) = spec.strip_prefix("remote:") {
        let key = api_key.context("--api-key is required for remote store specs")?;
        return Ok(Arc::new(RemoteStore::new(&RemoteConfig {
            base_url: url.to_string(),
            api_key: key.to_string(),
            timeout: Duration::from_secs(10),
        })?));
    }
    bail!("unrecognized store spec {spec:?} (expected sqlite:PATH or remote:URL)")
}

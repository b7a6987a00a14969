use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use threatcanvas::client::{self, ExportFormat, HttpIncidentSource, IncidentSource};
use threatcanvas::config::{DashboardConfig, LoggingConfig};
use threatcanvas::dashboard::{DashboardController, LoadOutcome, LogNotifier, SharedDashboard};
use threatcanvas::incident::EventType;

#[derive(Parser)]
#[command(
    name = "threatcanvas",
    about = "Geographic SSH intrusion dashboard engine",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and serve the state API
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Collector base URL
        #[arg(long)]
        backend: Option<String>,

        /// Read newline-delimited live events from stdin
        #[arg(long)]
        live_stdin: bool,
    },

    /// Fetch one snapshot and print stats and top attackers
    Snapshot {
        /// Collector base URL
        #[arg(long)]
        backend: Option<String>,

        /// Time window (1h, 24h, 7d, ...)
        #[arg(long)]
        since: Option<String>,

        /// Comma-separated event types
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<String>>,

        /// IP or location search text
        #[arg(long)]
        search: Option<String>,

        /// Maximum incidents to fetch
        #[arg(long)]
        limit: Option<u32>,

        /// Also print the backend timeline at this interval (e.g. 1h)
        #[arg(long)]
        timeline: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the server-side export URL of the top attacker list
    ExportUrl {
        /// Collector base URL
        #[arg(long)]
        backend: Option<String>,

        /// csv or json
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        /// Number of attackers
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // The logging section is not known yet, so config lookup warnings go
    // through a stderr subscriber of their own.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || {
        DashboardConfig::load_or_default(cli.config.as_deref())
    })?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve {
            bind,
            backend,
            live_stdin,
        } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(backend) = backend {
                config.backend.base_url = backend;
            }
            tracing::info!(bind = %config.server.bind, live_stdin, "Starting ThreatCanvas");
            threatcanvas::serve(config, live_stdin).await?;
        }
        Commands::Snapshot {
            backend,
            since,
            types,
            search,
            limit,
            timeline,
            json,
        } => {
            if let Some(backend) = backend {
                config.backend.base_url = backend;
            }
            let source = Arc::new(HttpIncidentSource::new(
                &config.backend.base_url,
                config.backend.timeout(),
            )?);

            let mut settings = config.controller_settings();
            if let Some(since) = since {
                settings.filters.since = since;
            }
            if let Some(types) = types {
                settings.filters.types = types.iter().map(|t| EventType::from(t.as_str())).collect();
            }
            if let Some(search) = search {
                settings.filters.search = search;
            }
            if limit.is_some() {
                settings.filters.limit = limit;
            }
            let since = settings.filters.since.clone();

            let controller = DashboardController::new(settings, source.clone(), Arc::new(LogNotifier));
            let dashboard = SharedDashboard::new(controller);
            if let LoadOutcome::Failed = dashboard.refresh().await {
                let c = dashboard.lock().await;
                bail!("snapshot failed: {}", c.last_error().unwrap_or("unknown error"));
            }

            let buckets = match &timeline {
                Some(interval) => Some(source.fetch_timeline(&since, interval).await?),
                None => None,
            };

            let c = dashboard.lock().await;
            if json {
                println!("{}", c.export_json()?);
            } else {
                let stats = c.stats();
                println!("\n=== ThreatCanvas Snapshot ({}) ===", since);
                println!("Total events:   {}", stats.total);
                println!("Unique IPs:     {}", stats.unique_ips);
                println!("Countries:      {}", stats.countries);
                println!("Failed logins:  {}", stats.failed_total);
                println!("\nTop attackers:");
                println!("{:<4} | {:<39} | {:>8} | Country", "#", "IP", "Events");
                println!("{:-<4}-|-{:-<39}-|-{:->8}-|-{:-<20}", "", "", "", "");
                for (rank, attacker) in c.top_attackers().iter().enumerate() {
                    let severity = c
                        .incident(&attacker.ip)
                        .map(|i| i.severity().to_string())
                        .unwrap_or_default();
                    println!(
                        "{:<4} | {:<39} | {:>8} | {} {}",
                        rank + 1,
                        attacker.ip,
                        attacker.count,
                        attacker.country,
                        severity
                    );
                }
                if let Some(buckets) = buckets {
                    println!("\nTimeline:");
                    for bucket in buckets {
                        println!("{:<25} {}", bucket.bucket, bucket.count);
                    }
                }
                println!();
            }
        }
        Commands::ExportUrl {
            backend,
            format,
            limit,
        } => {
            let base = backend.unwrap_or(config.backend.base_url);
            println!("{}", client::export_url(&base, format, limit));
        }
    }

    Ok(())
}

//! Main gateway binary. Reads the configuration, then serves user HTTP
//! requests and node WebSocket connections until terminated.
use std::{fs, io::IsTerminal as _, net::SocketAddr, path::PathBuf};

use anyhow::Context as _;
use clap::Parser;
use gateway::{handler::HandlerRegistry, Gateway};
use gateway_tools::{decode_json, AppConfig};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, Registry};
use vise_exporter::MetricsExporter;
use zksync_concurrency::{ctx, scope};

/// Command-line application launching a gateway.
#[derive(Debug, Parser)]
struct Args {
    /// Verify configuration instead of launching a gateway.
    #[arg(long)]
    verify_config: bool,
    /// Path to a JSON file with gateway configuration.
    #[arg(long, default_value = "config.json")]
    config_file: PathBuf,
    /// Address to serve metrics on, overriding the config file.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    let ctx = &ctx::root();

    if !args.verify_config {
        let stdout_log = tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
            .with_file(false)
            .with_line_number(false)
            .with_filter(LevelFilter::INFO);
        let subscriber = Registry::default().with(stdout_log);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    tracing::debug!("Loading config file.");
    let raw = fs::read_to_string(&args.config_file)
        .with_context(|| args.config_file.display().to_string())?;
    let app: AppConfig = decode_json(&raw).context("failed decoding JSON")?;
    let cfg = app.gateway_config().context("gateway_config()")?;

    if args.verify_config {
        tracing::info!("Configuration verified.");
        return Ok(());
    }

    tracing::info!("Starting gateway.");
    let (_gateway, runner) =
        Gateway::new(cfg, &HandlerRegistry::default()).context("Gateway::new()")?;
    let metrics_addr = args.metrics_addr.or(app.metrics_server_addr);

    scope::run!(ctx, |ctx, s| async move {
        if let Some(addr) = metrics_addr {
            s.spawn_bg(async move {
                MetricsExporter::default()
                    .with_graceful_shutdown(ctx.canceled())
                    .start(addr)
                    .await?;
                Ok(())
            });
        }
        s.spawn(async { runner.run(ctx).await });
        Ok(())
    })
    .await
    .context("gateway stopped")
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use macrotree::config as cfg;
use macrotree::error::MacroError;
use macrotree::executor::{EnigoDriver, Runtime};
use macrotree::matcher::{DirectoryAssets, XcapCapture};
use macrotree::variables::Value;

/// macrotree CLI
#[derive(Debug, Parser)]
#[command(
    name = macrotree::PKG_NAME,
    version = macrotree::PKG_VERSION,
    about = "Run an action-tree macro: input automation with image-search targeting"
)]
struct Args {
    /// Path to the JSON macro document
    #[arg(required_unless_present = "print_schema")]
    macro_path: Option<PathBuf>,

    /// Enable dry-run mode (log input instead of simulating it)
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Icon library root; overrides the document's `settings.assets_dir`
    #[arg(long = "assets")]
    assets: Option<PathBuf>,

    /// Set a macro-level variable before the run (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Print the JSON Schema for macro documents and exit
    #[arg(long = "print-schema")]
    print_schema: bool,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("variable name must not be empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --log-level wins over RUST_LOG.
    match args.log_level.as_deref() {
        Some(level) => macrotree::init_tracing_with(
            macrotree::parse_level(level).unwrap_or(tracing::Level::INFO),
        ),
        None => macrotree::init_tracing(),
    }

    if args.print_schema {
        let schema = cfg::generate_schema();
        let json = serde_json::to_string_pretty(&schema)?;
        println!("{json}");
        return Ok(());
    }

    let Some(path) = args.macro_path else {
        bail!("a macro document path is required");
    };
    info!(
        version = macrotree::PKG_VERSION,
        path = %path.display(),
        dry_run = args.dry_run,
        "Starting macrotree"
    );

    let mut doc = cfg::load_from_path_async(&path).await?;
    for (name, value) in args.vars {
        doc.variables.insert(name, Value::parse_literal(&value));
    }
    debug!(target: "macrotree", actions = doc.actions.len(), "Macro loaded successfully");

    let assets_dir = args
        .assets
        .or_else(|| doc.settings.assets_dir.clone())
        .unwrap_or_else(|| PathBuf::from("assets"));
    let poll = std::time::Duration::from_millis(doc.settings.pixel_poll_ms);
    let dry_run = args.dry_run;

    let cancel = CancellationToken::new();
    let run_token = cancel.clone();
    let mut run = tokio::task::spawn_blocking(move || {
        let mut runtime = Runtime::new(Box::new(EnigoDriver::new(dry_run)))
            .with_capture(Arc::new(XcapCapture))
            .with_assets(Arc::new(DirectoryAssets::new(assets_dir)))
            .with_pixel_poll(poll)
            .with_cancellation(run_token);
        runtime.run_document(&doc)
    });

    let joined = tokio::select! {
        joined = &mut run => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+C, cancelling macro");
            cancel.cancel();
            run.await
        }
    };

    match joined.context("Macro thread panicked")? {
        Ok(vars) => info!(variables = vars.len(), "Macro finished"),
        Err(MacroError::Cancelled) => info!("Macro cancelled"),
        Err(e) => return Err(e.into()),
    }

    info!("macrotree exited");
    Ok(())
}

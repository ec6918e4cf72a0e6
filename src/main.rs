use anyhow::{bail, Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};

use axlocate::{
    init_logging, ConfigStore, DetectionEngine, FindRequest, MemoryTreeProvider, TreeSnapshot,
};

/// Replays a captured accessibility tree through the detection engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON tree snapshot
    snapshot: PathBuf,

    /// Requested role; leave empty for any clickable element
    #[arg(long, default_value = "")]
    role: String,

    /// Label to look for, e.g. "the Send button"
    #[arg(long)]
    label: Option<String>,

    /// Target application name or bundle id (defaults to the focused one)
    #[arg(long)]
    app: Option<String>,

    /// Detection config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the diagnostic report instead of (or after) the match
    #[arg(long)]
    report: bool,

    /// Also write the diagnostic report to this file
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    if args.label.is_none() && !args.report && args.export.is_none() {
        bail!("nothing to do: pass --label, --report or --export");
    }

    let config = match &args.config {
        Some(path) => {
            let store = ConfigStore::new(path.clone())
                .with_context(|| format!("loading config {}", path.display()))?;
            store.config().as_ref().clone()
        }
        None => Default::default(),
    };

    let snapshot = TreeSnapshot::load(&args.snapshot)?;
    let provider = Arc::new(MemoryTreeProvider::from_snapshot(&snapshot));
    let engine = DetectionEngine::new(provider, config);

    if let Some(label) = &args.label {
        let mut request = FindRequest::new(args.role.clone(), label.clone());
        if let Some(app) = &args.app {
            request = request.in_app(app.clone());
        }
        match engine.find_element(&request).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(err) => log::error!("detection failed: {err}"),
        }
    }

    if args.report || args.export.is_some() {
        let report = match &args.export {
            Some(path) => engine.export_report(path).await?,
            None => engine.diagnostic_report().await,
        };
        if args.report {
            println!("{}", report.to_json()?);
        }
    }

    engine.shutdown().await;
    Ok(())
}

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod alert;
mod analytics;
mod buffer;
mod camera;
mod config;
mod report;
mod storage;

use alert::{AlertDispatcher, TerminalBell};
use analytics::{FixedRegion, InteractiveSelector, RegionSelector, RunSummary, Session};
use camera::VideoSource;
use config::{Config, Variant};
use report::{HeadlessPresenter, Presenter, WindowPresenter};

#[derive(Parser, Debug)]
#[command(name = "breathe", about = "Respiratory rate estimation from video")]
struct Args {
    /// Config file; `breathe.toml` in the working directory when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Video file path or camera index.
    #[arg(long, value_name = "URI")]
    source: Option<String>,
    /// `optical_flow` or `intensity`.
    #[arg(long)]
    variant: Option<Variant>,
    /// No windows; results go to the log and configured exports.
    #[arg(long)]
    headless: bool,
}

fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(source) = &args.source {
        config.source.uri = Some(source.clone());
    }
    if let Some(variant) = args.variant {
        config.analytics.variant = variant;
    }
    if args.headless {
        config.display.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    match summary.rate_bpm {
        Some(rate) => println!("Average RR over run: {rate:.2} BPM"),
        None => println!("Average RR over run: unavailable"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("breathe=debug".parse()?))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let uri = config.source.uri.clone().unwrap_or_default();
    tracing::info!(
        source = %uri,
        variant = %config.analytics.variant,
        display = config.display.enabled,
        "starting respiratory analysis"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let source = VideoSource::new(&uri);
    let selector: Box<dyn RegionSelector> = match config.region {
        Some(region) => Box::new(FixedRegion(region.into())),
        None => Box::new(InteractiveSelector::new()),
    };
    let presenter: Box<dyn Presenter> = if config.display.enabled {
        Box::new(WindowPresenter::new(Arc::clone(&shutdown)))
    } else {
        Box::new(HeadlessPresenter)
    };
    let alerts = (config.alert.enabled && config.analytics.variant == Variant::Intensity)
        .then(|| AlertDispatcher::new(Arc::new(TerminalBell), &config.alert));

    let mut session = Session::new(config, source, selector, presenter, Arc::clone(&shutdown));
    if let Some(alerts) = alerts {
        session = session.with_alerts(alerts);
    }

    let mut handle = analytics::spawn_session(session);
    let joined = tokio::select! {
        result = &mut handle => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
            handle.await
        }
    };

    match joined? {
        Ok(summary) => {
            print_summary(&summary);
            tracing::info!("shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "session failed");
            Err(e.into())
        }
    }
}

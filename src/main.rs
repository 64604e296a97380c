//! notifyhub - in-process notification dispatch
//!
//! Loads the configured targets, restores their last activation, and either
//! lists them or sends one message and waits for delivery.

use anyhow::Result;
use clap::Parser;
use notifyhub::{
    app::App,
    cli::{Cli, Command, SendArgs},
    config::Config,
    offload::wait_all,
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_tracing("error");
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(2);
        }
    };

    init_tracing(&config.log_level);
    info!("notifyhub starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Max Workers: {}", config.offload.max_workers);
    info!("Enforce Features: {}", config.dispatch.enforce_features);
    match &config.state.path {
        Some(path) => info!("State Path: {}", path.display()),
        None => info!("State Path: Not configured"),
    }
    info!("Configured Targets: {}", config.targets.len());
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;

    let outcome = match cli.command.clone().unwrap_or(Command::List { json: false }) {
        Command::List { json } => list_targets(&app, json),
        Command::Send(args) => send(&app, &args).await,
    };

    shutdown_tx.send(true).ok();
    app.run().await?;

    if let Err(e) = outcome {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Logs go to stderr so stdout stays machine readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn list_targets(app: &App, json: bool) -> Result<()> {
    let targets = app.dispatcher().targets();
    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }
    for target in targets {
        let last = target
            .last_notified
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}\t{}\t{}\t{}",
            target.identity, target.name, target.supported_features, last
        );
    }
    Ok(())
}

async fn send(app: &App, args: &SendArgs) -> Result<()> {
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .or(app.default_timeout());
    let handles = app.dispatcher().call_service(args.to_service_data()?)?;

    let total = handles.len();
    let mut failures = 0;
    for (identity, result) in wait_all(handles, timeout).await {
        match result {
            Ok(()) => println!("{}\tsent", identity),
            Err(e) => {
                failures += 1;
                println!("{}\tfailed: {}", identity, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} sends failed", failures, total);
    }
    Ok(())
}

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};

use plend_fabric::JournalConfig;
use plend_server::PlendServer;
use plend_service::{LoanLifecycleService, ServiceConfig};
use plend_types::SystemClock;

use crate::cli::*;
use crate::demo::{run_scenario, DemoReport};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Demo(args) => cmd_demo(args, cli.format),
        Command::Config(args) => cmd_config(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(ServiceConfig::default()),
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(path) = args.journal {
        config.journal = Some(JournalConfig {
            path,
            ..JournalConfig::default()
        });
    }

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let bind_addr = config.server.bind_addr;
    let node_id = config.node_id.clone();
    if config.server.tokens.is_empty() {
        warn!("no API tokens configured; the HTTP API is read-only");
    }
    let (service, _token) = LoanLifecycleService::in_memory(config, Arc::new(SystemClock))
        .context("starting loan lifecycle service")?;
    let service = Arc::new(service);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = tokio::spawn(Arc::clone(&service).run(shutdown_rx.clone()));
    let server = tokio::spawn(PlendServer::new(Arc::clone(&service)).serve(shutdown_rx));

    println!(
        "{} PrivLend node {} listening on {}",
        "✓".green().bold(),
        node_id.cyan(),
        bind_addr.to_string().bold()
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    // Both tasks hold receivers, so this only fails if they already exited.
    let _ = shutdown_tx.send(true);

    server.await??;
    background.await??;
    println!("{} stopped", "✓".green());
    Ok(())
}

fn cmd_demo(args: DemoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = run_scenario(args.scenario)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &DemoReport) {
    println!("Scenario {}", report.scenario.bold());
    for step in &report.steps {
        let mark = if step.accepted {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {:>6} {:<32} {}",
            mark,
            format!("t+{}s", step.at).dimmed(),
            step.action,
            step.outcome
        );
    }
    println!("Final status: {}", report.final_status.to_string().yellow().bold());
    println!(
        "Balances: lender {}, borrower {}",
        report.lender_balance, report.borrower_balance
    );
    match report.revealed_to_lender {
        Some(address) => println!("Identity revealed to lender: {}", address.to_hex().red()),
        None => println!("Identity: {}", "still private".green()),
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.path.as_deref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "plend",
    about = "PrivLend: privacy-preserving multi-slot lending node",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a node: ledger, event pump, deadline watcher and HTTP API
    Serve(ServeArgs),
    /// Walk through a loan lifecycle on a simulated clock
    Demo(DemoArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Override the listen address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Journal relayed events to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,
}

#[derive(Args)]
pub struct DemoArgs {
    #[arg(long, value_enum, default_value = "a")]
    pub scenario: Scenario,
}

/// `a`: the borrower repays in time. `b`: the deadline passes and the
/// watcher defaults the loan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    A,
    B,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML configuration file to load before printing
    #[arg(long)]
    pub path: Option<PathBuf>,
}

// This file is part of Rundler.
//
// Rundler is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Rundler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Rundler.
// If not, see https://www.gnu.org/licenses/.

use std::net::SocketAddr;

use alloy_primitives::Address;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};

mod metrics;
mod node;
mod tracing;

use node::NodeCliArgs;

/// Main entry point for the CLI
///
/// Parses the CLI arguments, sets up logging and metrics, then runs the command
pub async fn run() -> anyhow::Result<()> {
    let opt = Cli::parse();
    let _guard = tracing::configure_logging(&opt.logs)?;

    let metrics_addr = format!("{}:{}", opt.metrics.host, opt.metrics.port)
        .parse::<SocketAddr>()
        .context("metrics host and port should form a socket address")?;
    metrics::initialize(metrics_addr, &opt.metrics.tags)
        .context("metrics server should start")?;

    match opt.command {
        Command::Node(args) => node::run(*args, opt.common).await?,
    }

    tracing::info!("Shutdown, goodbye");
    Ok(())
}

/// Main CLI options
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    metrics: MetricsArgs,

    #[command(flatten)]
    logs: LogsArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs the bundler: mempool, builder and RPC server in one process
    #[command(name = "node")]
    Node(Box<NodeCliArgs>),
}

/// Arguments shared by every component
#[derive(Debug, Args)]
#[command(next_help_heading = "Common")]
pub struct CommonArgs {
    /// ETH node HTTP URL
    #[arg(
        long = "node_http",
        name = "node_http",
        env = "NODE_HTTP",
        global = true
    )]
    node_http: Option<String>,

    #[arg(
        long = "chain_id",
        name = "chain_id",
        env = "CHAIN_ID",
        default_value = "1337",
        global = true
    )]
    chain_id: u64,

    /// Entry point contract operations are submitted to
    #[arg(
        long = "entry_point",
        name = "entry_point",
        env = "ENTRY_POINT",
        default_value = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789",
        global = true
    )]
    entry_point: Address,

    /// Minimum stake, in wei, of a staked entity
    #[arg(
        long = "min_stake_value",
        name = "min_stake_value",
        env = "MIN_STAKE_VALUE",
        default_value = "1000000000000000000",
        global = true
    )]
    min_stake_value: u128,

    /// Minimum unstake delay, in seconds, of a staked entity
    #[arg(
        long = "min_unstake_delay",
        name = "min_unstake_delay",
        env = "MIN_UNSTAKE_DELAY",
        default_value = "86400",
        global = true
    )]
    min_unstake_delay: u32,

    /// Validate with plain `simulateValidation`, without checking the
    /// ERC-7562 rules. Must be set, as traced validation is not available.
    #[arg(long = "unsafe", env = "UNSAFE", global = true)]
    unsafe_mode: bool,

    /// Timeout, in seconds, of requests to the node
    #[arg(
        long = "provider_client_timeout_seconds",
        name = "provider_client_timeout_seconds",
        env = "PROVIDER_CLIENT_TIMEOUT_SECONDS",
        default_value = "10",
        global = true
    )]
    provider_client_timeout_seconds: u64,
}

/// CLI options for the metrics server
#[derive(Debug, Args)]
#[command(next_help_heading = "Metrics")]
struct MetricsArgs {
    /// Port to listen on for metrics requests
    #[arg(
        long = "metrics.port",
        name = "metrics.port",
        env = "METRICS_PORT",
        default_value = "8080",
        global = true
    )]
    port: u16,

    /// Host to listen on for metrics requests
    #[arg(
        long = "metrics.host",
        name = "metrics.host",
        env = "METRICS_HOST",
        default_value = "0.0.0.0",
        global = true
    )]
    host: String,

    /// Tags for metrics in the format key1=value1,key2=value2,...
    #[arg(
        long = "metrics.tags",
        name = "metrics.tags",
        env = "METRICS_TAGS",
        default_values_t = Vec::<String>::new(),
        value_delimiter = ',',
        global = true
    )]
    tags: Vec<String>,
}

/// CLI options for logging
#[derive(Debug, Args)]
#[command(next_help_heading = "Logging")]
struct LogsArgs {
    /// Log file
    ///
    /// If not provided, logs will be written to stdout
    #[arg(
        long = "log.file",
        name = "log.file",
        env = "LOG_FILE",
        default_value = None,
        global = true
    )]
    file: Option<String>,

    /// Log JSON
    ///
    /// If set, logs will be written in JSON format
    #[arg(
        long = "log.json",
        name = "log.json",
        env = "LOG_JSON",
        required = false,
        num_args = 0,
        global = true
    )]
    json: bool,
}

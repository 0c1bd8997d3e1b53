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

use std::{sync::Arc, time::Duration};

use aa_bundler_builder::{
    BundleProposerImpl, BundleSenderImpl, BundleSenderSettings, BundlerImpl, ExecutionManager,
    ExecutionSettings, LocalSigner, ProposerSettings, RawTransactionSender, Signer,
};
use aa_bundler_pool::{EventWatcher, Mempool, ReputationParams, ReputationTracker};
use aa_bundler_provider::{
    new_alloy_provider, AlloyEntryPointV0_6, AlloyEvmProvider, NodeTransport,
};
use aa_bundler_rpc::{RpcServer, RpcServerArgs};
use aa_bundler_sim::{UnsafeValidator, ValidationSettings};
use alloy_primitives::{Address, U256};
use anyhow::{bail, Context};
use clap::Args;

use super::CommonArgs;

/// CLI options for the bundler node
#[derive(Args)]
#[command(next_help_heading = "Node")]
pub struct NodeCliArgs {
    /// Address receiving bundle fees, defaults to the signer
    #[arg(long = "beneficiary", name = "beneficiary", env = "BENEFICIARY")]
    beneficiary: Option<Address>,

    /// Below this signer balance, in wei, fees are paid to the signer instead
    #[arg(
        long = "min_signer_balance",
        name = "min_signer_balance",
        env = "MIN_SIGNER_BALANCE",
        default_value = "100000000000000000"
    )]
    min_signer_balance: u128,

    /// Private key of the bundle signer
    #[arg(long = "private_key", name = "private_key", env = "PRIVATE_KEY")]
    private_key: String,

    /// Gas limit of a bundle, summed over `preOpGas + callGasLimit`
    #[arg(
        long = "max_bundle_gas",
        name = "max_bundle_gas",
        env = "MAX_BUNDLE_GAS",
        default_value = "5000000"
    )]
    pub(super) max_bundle_gas: u64,

    /// Gas limit of the `handleOps` transaction
    #[arg(
        long = "bundle_gas_limit",
        name = "bundle_gas_limit",
        env = "BUNDLE_GAS_LIMIT",
        default_value = "10000000"
    )]
    pub(super) bundle_gas_limit: u64,

    /// Submit bundles with `eth_sendRawTransactionConditional`
    #[arg(long = "conditional_rpc", name = "conditional_rpc", env = "CONDITIONAL_RPC")]
    conditional_rpc: bool,

    /// Expect the whole storage root of deployed senders in conditional submissions
    #[arg(
        long = "merge_to_account_root_hash",
        name = "merge_to_account_root_hash",
        env = "MERGE_TO_ACCOUNT_ROOT_HASH"
    )]
    merge_to_account_root_hash: bool,

    /// Entities never throttled or banned
    #[arg(
        long = "whitelist",
        name = "whitelist",
        env = "WHITELIST",
        value_delimiter = ','
    )]
    pub(super) whitelist: Vec<Address>,

    /// Entities always banned
    #[arg(
        long = "blacklist",
        name = "blacklist",
        env = "BLACKLIST",
        value_delimiter = ','
    )]
    pub(super) blacklist: Vec<Address>,

    /// Seconds between forced bundles, 0 for manual bundling
    #[arg(
        long = "auto_bundle_interval",
        name = "auto_bundle_interval",
        env = "AUTO_BUNDLE_INTERVAL",
        default_value = "0"
    )]
    pub(super) auto_bundle_interval: u64,

    /// Mempool size that triggers a bundle on admission
    #[arg(
        long = "auto_bundle_mempool_size",
        name = "auto_bundle_mempool_size",
        env = "AUTO_BUNDLE_MEMPOOL_SIZE",
        default_value = "10"
    )]
    pub(super) auto_bundle_mempool_size: usize,

    /// Seconds between reputation decays
    #[arg(
        long = "reputation_cron_interval",
        name = "reputation_cron_interval",
        env = "REPUTATION_CRON_INTERVAL",
        default_value = "3600"
    )]
    reputation_cron_interval: u64,

    /// Host to listen on for RPC requests
    #[arg(
        long = "rpc.host",
        name = "rpc.host",
        env = "RPC_HOST",
        default_value = "0.0.0.0"
    )]
    rpc_host: String,

    /// Port to listen on for RPC requests
    #[arg(
        long = "rpc.port",
        name = "rpc.port",
        env = "RPC_PORT",
        default_value = "3000"
    )]
    pub(super) rpc_port: u16,

    /// Serve the `debug_bundler` namespace
    #[arg(long = "rpc.debug", name = "rpc.debug", env = "RPC_DEBUG")]
    pub(super) rpc_debug: bool,

    /// Max number of RPC connections
    #[arg(
        long = "rpc.max_connections",
        name = "rpc.max_connections",
        env = "RPC_MAX_CONNECTIONS",
        default_value = "100"
    )]
    rpc_max_connections: u32,
}

// private key stays out of the logs
impl std::fmt::Debug for NodeCliArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCliArgs")
            .field("beneficiary", &self.beneficiary)
            .field("min_signer_balance", &self.min_signer_balance)
            .field("max_bundle_gas", &self.max_bundle_gas)
            .field("bundle_gas_limit", &self.bundle_gas_limit)
            .field("conditional_rpc", &self.conditional_rpc)
            .field("merge_to_account_root_hash", &self.merge_to_account_root_hash)
            .field("whitelist", &self.whitelist)
            .field("blacklist", &self.blacklist)
            .field("auto_bundle_interval", &self.auto_bundle_interval)
            .field("auto_bundle_mempool_size", &self.auto_bundle_mempool_size)
            .field("reputation_cron_interval", &self.reputation_cron_interval)
            .field("rpc_host", &self.rpc_host)
            .field("rpc_port", &self.rpc_port)
            .field("rpc_debug", &self.rpc_debug)
            .finish_non_exhaustive()
    }
}

pub async fn run(args: NodeCliArgs, common: CommonArgs) -> anyhow::Result<()> {
    tracing::info!("Node options: {:?} {:?}", common, args);

    if !common.unsafe_mode {
        bail!("only unsafe validation is supported, run with --unsafe");
    }
    let node_http = common
        .node_http
        .as_deref()
        .context("should have a node HTTP URL")?;

    let provider = new_alloy_provider(
        node_http,
        Duration::from_secs(common.provider_client_timeout_seconds),
    )?;
    let evm_provider = Arc::new(AlloyEvmProvider::<_, NodeTransport>::new(provider.clone()));
    let entry_point = Arc::new(AlloyEntryPointV0_6::<_, NodeTransport>::new(
        common.entry_point,
        provider.clone(),
    ));

    let reputation = Arc::new(ReputationTracker::new(
        ReputationParams::bundler_default(),
        U256::from(common.min_stake_value),
        common.min_unstake_delay,
    ));
    reputation.add_whitelist(args.whitelist.iter().copied());
    reputation.add_blacklist(args.blacklist.iter().copied());
    let mempool = Arc::new(Mempool::new(reputation.clone()));

    let validator = Arc::new(UnsafeValidator::new(
        entry_point.clone(),
        ValidationSettings {
            min_stake_value: U256::from(common.min_stake_value),
            min_unstake_delay: common.min_unstake_delay,
        },
    ));

    let event_watcher = Arc::new(EventWatcher::new(
        evm_provider.clone(),
        common.entry_point,
        mempool.clone(),
        reputation.clone(),
    ));

    let proposer = BundleProposerImpl::new(
        mempool.clone(),
        reputation.clone(),
        validator.clone(),
        entry_point.clone(),
        evm_provider.clone(),
        ProposerSettings {
            max_bundle_gas: args.max_bundle_gas,
            use_conditional_rpc: args.conditional_rpc,
            merge_to_account_root_hash: args.merge_to_account_root_hash,
        },
    );

    let signer = LocalSigner::connect(
        AlloyEvmProvider::<_, NodeTransport>::new(provider.clone()),
        common.chain_id,
        &args.private_key,
    )?;
    let beneficiary = args.beneficiary.unwrap_or(signer.address());
    let tx_sender = RawTransactionSender::new(evm_provider.clone(), signer, args.conditional_rpc);
    let bundle_sender = BundleSenderImpl::new(
        entry_point.clone(),
        evm_provider.clone(),
        tx_sender,
        mempool.clone(),
        reputation.clone(),
        BundleSenderSettings {
            beneficiary,
            min_signer_balance: U256::from(args.min_signer_balance),
            bundle_gas_limit: args.bundle_gas_limit,
            chain_id: common.chain_id,
        },
    );

    let bundler = BundlerImpl::new(event_watcher, proposer, bundle_sender);
    let auto_bundle_interval = Duration::from_secs(args.auto_bundle_interval);
    let manager = Arc::new(ExecutionManager::new(
        validator,
        mempool,
        reputation,
        bundler,
        ExecutionSettings {
            entry_point: common.entry_point,
            chain_id: common.chain_id,
            auto_bundle_interval,
            auto_bundle_mempool_size: args.auto_bundle_mempool_size,
        },
    ));
    manager.set_auto_bundler(auto_bundle_interval, args.auto_bundle_mempool_size);
    manager.set_reputation_cron(Duration::from_secs(args.reputation_cron_interval));

    let server = RpcServer::new(
        RpcServerArgs {
            host: args.rpc_host,
            port: args.rpc_port,
            debug_api: args.rpc_debug,
            max_connections: args.rpc_max_connections,
        },
        manager,
    )
    .start()
    .await?;

    tokio::select! {
        _ = server.clone().stopped() => {
            bail!("RPC server stopped unexpectedly");
        }
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => tracing::info!("Received signal, shutting down"),
                Err(err) => tracing::error!("Error while waiting for signal: {err:?}"),
            }
        }
    }

    if let Err(err) = server.stop() {
        tracing::warn!("RPC server already stopped: {err:?}");
    }
    Ok(())
}

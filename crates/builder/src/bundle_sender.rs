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

use std::sync::Arc;

use aa_bundler_pool::{Mempool, ReputationTracker};
use aa_bundler_provider::{decode_failed_op, EntryPoint, EvmProvider, ProviderResult};
use aa_bundler_types::{EntityType, GasFees, SendBundleResult, UserOperation};
use aa_bundler_utils::log::LogOnError;
use alloy_primitives::{Address, B256, U256};
use anyhow::Context;
use async_trait::async_trait;
use metrics::{Counter, Histogram};
use metrics_derive::Metrics;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tracing::{info, warn};

use crate::{bundle_proposer::Bundle, sender::TransactionSender};

/// Bundle sender settings
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Address paid the bundle's fees
    pub beneficiary: Address,
    /// Below this signer balance, fees are paid to the signer instead
    pub min_signer_balance: U256,
    /// Gas limit of the `handleOps` transaction
    pub bundle_gas_limit: u64,
    /// Chain id, for computing operation hashes locally
    pub chain_id: u64,
}

/// Submits bundles and reconciles failed submissions
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait BundleSender: Send + Sync + 'static {
    /// Address to receive the bundle's fees
    async fn select_beneficiary(&self) -> anyhow::Result<Address>;

    /// Submit a bundle.
    ///
    /// Returns `None` if the submission failed without being fatal. A reverted
    /// `FailedOp` penalizes the offending operation's entity or drops the
    /// operation. Only a node lacking the submission method is an error.
    async fn send_bundle(
        &self,
        bundle: Bundle,
        beneficiary: Address,
    ) -> anyhow::Result<Option<SendBundleResult>>;
}

/// Handling of a `FailedOp` revert, chosen by the prefix of its reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailedOpAction {
    /// Apply the crash penalty to the entity in this role
    Crash(EntityType),
    /// Drop the operation from the mempool
    RemoveOp,
}

const FAILED_OP_PREFIXES: [(&str, EntityType); 3] = [
    ("AA3", EntityType::Paymaster),
    ("AA2", EntityType::Account),
    ("AA1", EntityType::Factory),
];

fn failed_op_action(reason: &str) -> FailedOpAction {
    FAILED_OP_PREFIXES
        .iter()
        .find(|(prefix, _)| reason.starts_with(prefix))
        .map_or(FailedOpAction::RemoveOp, |(_, kind)| {
            FailedOpAction::Crash(*kind)
        })
}

fn entity_address(op: &UserOperation, kind: EntityType) -> Option<Address> {
    match kind {
        EntityType::Account => Some(op.sender),
        EntityType::Paymaster => op.paymaster(),
        EntityType::Factory => op.factory(),
        EntityType::Aggregator => None,
    }
}

#[derive(Metrics)]
#[metrics(scope = "builder")]
struct BundleSenderMetrics {
    #[metric(describe = "the count of bundles sent.")]
    bundles_sent: Counter,
    #[metric(describe = "the number of ops in a sent bundle.")]
    bundle_ops: Histogram,
    #[metric(describe = "the count of failed bundle submissions.")]
    failed_submissions: Counter,
    #[metric(describe = "the count of entities penalized for a failed bundle.")]
    crashed_entities: Counter,
}

/// Submits `handleOps` transactions through a [`TransactionSender`]
pub struct BundleSenderImpl<E, P, T> {
    entry_point: Arc<E>,
    provider: Arc<P>,
    sender: T,
    mempool: Arc<Mempool>,
    reputation: Arc<ReputationTracker>,
    settings: Settings,
    metrics: BundleSenderMetrics,
}

#[async_trait]
impl<E, P, T> BundleSender for BundleSenderImpl<E, P, T>
where
    E: EntryPoint,
    P: EvmProvider + 'static,
    T: TransactionSender,
{
    async fn select_beneficiary(&self) -> anyhow::Result<Address> {
        let signer = self.sender.address();
        let balance = self
            .provider
            .get_balance(signer, None)
            .await
            .context("should get signer balance")?;
        if balance <= self.settings.min_signer_balance {
            info!("Signer {signer} balance {balance} is low, paying fees to the signer");
            return Ok(signer);
        }
        Ok(self.settings.beneficiary)
    }

    async fn send_bundle(
        &self,
        bundle: Bundle,
        beneficiary: Address,
    ) -> anyhow::Result<Option<SendBundleResult>> {
        let (gas_fees, nonce) = match self.fees_and_nonce().await {
            Ok(prepared) => prepared,
            Err(error) if error.is_method_not_found() => {
                return Err(error).context("node does not support bundle preparation");
            }
            Err(error) => {
                self.metrics.failed_submissions.increment(1);
                warn!("Failed to prepare bundle transaction: {error}");
                return Ok(None);
            }
        };

        let tx = self
            .entry_point
            .get_send_bundle_transaction(
                bundle.ops.clone(),
                beneficiary,
                self.settings.bundle_gas_limit,
                gas_fees,
            )
            .nonce(nonce);

        match self.sender.send_transaction(tx, &bundle.storage_map).await {
            Ok(sent) => {
                self.metrics.bundles_sent.increment(1);
                self.metrics.bundle_ops.record(bundle.len() as f64);
                info!(
                    "Sent bundle of {} ops in tx {:?} with nonce {}",
                    bundle.len(),
                    sent.tx_hash,
                    sent.nonce
                );
                let user_op_hashes = self.user_op_hashes(&bundle.ops).await;
                Ok(Some(SendBundleResult {
                    transaction_hash: sent.tx_hash,
                    user_op_hashes,
                }))
            }
            Err(error) => {
                self.metrics.failed_submissions.increment(1);
                let Some((op_index, reason)) =
                    error.revert_data().and_then(|data| decode_failed_op(data))
                else {
                    if error.is_method_not_found() {
                        return Err(error).context("node does not support bundle submission");
                    }
                    warn!("Failed to send bundle: {error}");
                    return Ok(None);
                };
                self.handle_failed_op(&bundle, op_index, &reason);
                Ok(None)
            }
        }
    }
}

impl<E, P, T> BundleSenderImpl<E, P, T>
where
    E: EntryPoint,
    P: EvmProvider + 'static,
    T: TransactionSender,
{
    /// Creates a new bundle sender
    pub fn new(
        entry_point: Arc<E>,
        provider: Arc<P>,
        sender: T,
        mempool: Arc<Mempool>,
        reputation: Arc<ReputationTracker>,
        settings: Settings,
    ) -> Self {
        Self {
            entry_point,
            provider,
            sender,
            mempool,
            reputation,
            settings,
            metrics: BundleSenderMetrics::default(),
        }
    }

    // The whole bundle reverted; only the offending op's entity is touched and
    // the rest stay in the pool for the next attempt.
    fn handle_failed_op(&self, bundle: &Bundle, op_index: usize, reason: &str) {
        let Some(op) = bundle.ops.get(op_index) else {
            warn!("Bundle reverted with FailedOp for unknown index {op_index}: {reason}");
            return;
        };

        let action = failed_op_action(reason);
        if let FailedOpAction::Crash(kind) = action {
            if let Some(address) = entity_address(op, kind) {
                warn!(
                    "Bundle reverted: {reason}. Penalizing {} {address}",
                    kind.to_str()
                );
                self.reputation.crashed_handle_ops(address);
                self.metrics.crashed_entities.increment(1);
                return;
            }
        }

        warn!(
            "Bundle reverted: {reason}. Removing op from sender {}",
            op.sender
        );
        self.mempool.remove_user_op(&op.id());
    }

    async fn fees_and_nonce(&self) -> ProviderResult<(GasFees, u64)> {
        let fee_data = self.provider.get_fee_data().await?;
        let gas_fees = GasFees {
            max_fee_per_gas: fee_data.max_fee_per_gas.unwrap_or(0),
            max_priority_fee_per_gas: fee_data.max_priority_fee_per_gas.unwrap_or(0),
        };
        let nonce = self
            .provider
            .get_transaction_count(self.sender.address())
            .await?;
        Ok((gas_fees, nonce))
    }

    async fn user_op_hashes(&self, ops: &[UserOperation]) -> Vec<B256> {
        let mut hashes = Vec::with_capacity(ops.len());
        for op in ops {
            let hash = self
                .entry_point
                .get_user_op_hash(op.clone())
                .await
                .warn_on_error("should get user op hash from entry point")
                .unwrap_or_else(|_| op.hash(self.entry_point.address(), self.settings.chain_id));
            hashes.push(hash);
        }
        hashes
    }
}

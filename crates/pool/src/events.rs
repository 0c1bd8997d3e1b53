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

use aa_bundler_contracts::v0_6::IEntryPoint::{
    AccountDeployed, IEntryPointEvents, SignatureAggregatorChanged, UserOperationEvent,
};
use aa_bundler_provider::{EvmProvider, Filter, Log};
use alloy_primitives::{Address, B256};
use alloy_sol_types::{SolEvent, SolEventInterface};
use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Mempool, ReputationTracker};

/// Blocks scanned behind the head on the first run
const INITIAL_LOOKBACK_BLOCKS: u64 = 1000;

/// Applies entry point events to the mempool and reputation: mined operations
/// leave the pool and credit their entities.
pub struct EventWatcher<P> {
    provider: Arc<P>,
    entry_point: Address,
    mempool: Arc<Mempool>,
    reputation: Arc<ReputationTracker>,
    state: Mutex<WatcherState>,
}

#[derive(Debug, Default)]
struct WatcherState {
    /// Next block to scan
    last_block: Option<u64>,
    /// Aggregator announced in `aggregator_tx_hash`, if any
    aggregator: Option<Address>,
    aggregator_tx_hash: Option<B256>,
}

impl WatcherState {
    // An aggregator applies only to the operations of the transaction that
    // announced it.
    fn aggregator_for(&mut self, tx_hash: Option<B256>) -> Option<Address> {
        if tx_hash != self.aggregator_tx_hash {
            self.aggregator = None;
            self.aggregator_tx_hash = tx_hash;
        }
        self.aggregator
    }
}

impl<P: EvmProvider> EventWatcher<P> {
    /// Creates a watcher for the events of `entry_point`
    pub fn new(
        provider: Arc<P>,
        entry_point: Address,
        mempool: Arc<Mempool>,
        reputation: Arc<ReputationTracker>,
    ) -> Self {
        Self {
            provider,
            entry_point,
            mempool,
            reputation,
            state: Mutex::new(WatcherState::default()),
        }
    }

    /// Processes every event emitted since the previous call
    pub async fn handle_past_events(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let head = self
            .provider
            .get_block_number()
            .await
            .context("event watcher should get the block number")?;
        let from_block = *state
            .last_block
            .get_or_insert_with(|| head.saturating_sub(INITIAL_LOOKBACK_BLOCKS).max(1));
        if from_block > head {
            return Ok(());
        }

        let filter = Filter::new()
            .address(self.entry_point)
            .from_block(from_block)
            .to_block(head)
            .event_signature(vec![
                UserOperationEvent::SIGNATURE_HASH,
                AccountDeployed::SIGNATURE_HASH,
                SignatureAggregatorChanged::SIGNATURE_HASH,
            ]);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .context("event watcher should load entry point events")?;
        debug!(
            "Loaded {} entry point events in blocks {from_block}..={head}",
            logs.len()
        );

        for log in logs {
            self.handle_event(&mut state, log);
        }
        state.last_block = Some(head + 1);
        Ok(())
    }

    fn handle_event(&self, state: &mut WatcherState, log: Log) {
        let event = match IEntryPointEvents::decode_log(&log.inner, true) {
            Ok(event) => event.data,
            Err(error) => {
                warn!("Could not decode entry point event: {error}");
                return;
            }
        };
        match event {
            IEntryPointEvents::UserOperationEvent(event) => {
                if self
                    .mempool
                    .remove_user_op_by_hash(event.userOpHash)
                    .is_some()
                {
                    debug!("userOp {} mined, removed from mempool", event.userOpHash);
                }
                self.reputation.update_included_status(event.sender);
                if !event.paymaster.is_zero() {
                    self.reputation.update_included_status(event.paymaster);
                }
                if let Some(aggregator) = state.aggregator_for(log.transaction_hash) {
                    self.reputation.update_included_status(aggregator);
                }
            }
            IEntryPointEvents::AccountDeployed(event) => {
                self.reputation.update_included_status(event.factory);
            }
            IEntryPointEvents::SignatureAggregatorChanged(event) => {
                state.aggregator = (!event.aggregator.is_zero()).then_some(event.aggregator);
                state.aggregator_tx_hash = log.transaction_hash;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aa_bundler_provider::MockEvmProvider;
    use aa_bundler_types::{EntityInfos, ReferencedCodeHashes, StakeInfo, UserOperation};
    use alloy_primitives::{address, Bytes, U256};

    use super::*;
    use crate::ReputationParams;

    const ENTRY_POINT: Address = address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");

    fn log<E: SolEvent>(event: E, tx_hash: B256) -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: ENTRY_POINT,
                data: event.encode_log_data(),
            },
            block_number: Some(1500),
            transaction_hash: Some(tx_hash),
            ..Default::default()
        }
    }

    fn op_event(hash: B256, sender: Address, paymaster: Address) -> UserOperationEvent {
        UserOperationEvent {
            userOpHash: hash,
            sender,
            paymaster,
            nonce: U256::ZERO,
            success: true,
            actualGasCost: U256::ZERO,
            actualGasUsed: U256::ZERO,
        }
    }

    fn included(reputation: &ReputationTracker, address: Address) -> u64 {
        reputation
            .dump()
            .into_iter()
            .find(|r| r.address == address)
            .map_or(0, |r| r.ops_included)
    }

    fn setup(
        provider: MockEvmProvider,
    ) -> (
        EventWatcher<MockEvmProvider>,
        Arc<Mempool>,
        Arc<ReputationTracker>,
    ) {
        let reputation = Arc::new(ReputationTracker::new(
            ReputationParams::bundler_default(),
            U256::ZERO,
            0,
        ));
        let mempool = Arc::new(Mempool::new(reputation.clone()));
        let watcher = EventWatcher::new(
            Arc::new(provider),
            ENTRY_POINT,
            mempool.clone(),
            reputation.clone(),
        );
        (watcher, mempool, reputation)
    }

    #[tokio::test]
    async fn mined_op_is_removed_and_credited() {
        let sender = Address::repeat_byte(1);
        let paymaster = Address::repeat_byte(2);
        let factory = Address::repeat_byte(3);
        let aggregator = Address::repeat_byte(4);
        let op = UserOperation {
            sender,
            ..Default::default()
        };
        let hash = op.hash(ENTRY_POINT, 1);
        let (tx1, tx2) = (B256::repeat_byte(0x11), B256::repeat_byte(0x22));

        let logs = vec![
            log(SignatureAggregatorChanged { aggregator }, tx1),
            log(op_event(hash, sender, paymaster), tx1),
            log(
                AccountDeployed {
                    userOpHash: hash,
                    sender,
                    factory,
                    paymaster,
                },
                tx1,
            ),
            // a different transaction does not inherit the aggregator
            log(op_event(B256::ZERO, sender, Address::ZERO), tx2),
        ];
        let mut provider = MockEvmProvider::new();
        provider.expect_get_block_number().returning(|| Ok(2000));
        provider
            .expect_get_logs()
            .withf(|f| f.get_from_block() == Some(1000) && f.get_to_block() == Some(2000))
            .return_once(move |_| Ok(logs));

        let (watcher, mempool, reputation) = setup(provider);
        mempool
            .add_user_op(
                op,
                hash,
                U256::ZERO,
                ReferencedCodeHashes::default(),
                &EntityInfos {
                    sender: StakeInfo {
                        address: sender,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        watcher.handle_past_events().await.unwrap();

        assert_eq!(mempool.count(), 0);
        assert_eq!(included(&reputation, sender), 2);
        assert_eq!(included(&reputation, paymaster), 1);
        assert_eq!(included(&reputation, factory), 1);
        assert_eq!(included(&reputation, aggregator), 1);
        assert_eq!(included(&reputation, Address::ZERO), 0);
    }

    #[tokio::test]
    async fn advances_past_head() {
        let mut provider = MockEvmProvider::new();
        let mut heads = vec![10, 10, 12].into_iter();
        provider
            .expect_get_block_number()
            .times(3)
            .returning(move || Ok(heads.next().unwrap_or_default()));
        provider
            .expect_get_logs()
            .withf(|f| f.get_from_block() == Some(1) && f.get_to_block() == Some(10))
            .times(1)
            .returning(|_| Ok(vec![]));
        provider
            .expect_get_logs()
            .withf(|f| f.get_from_block() == Some(11) && f.get_to_block() == Some(12))
            .times(1)
            .returning(|_| Ok(vec![]));

        let (watcher, _, _) = setup(provider);
        watcher.handle_past_events().await.unwrap();
        // nothing new
        watcher.handle_past_events().await.unwrap();
        watcher.handle_past_events().await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_logs_are_skipped() {
        let bad = Log {
            inner: alloy_primitives::Log::new_unchecked(
                ENTRY_POINT,
                vec![UserOperationEvent::SIGNATURE_HASH],
                Bytes::new(),
            ),
            ..Default::default()
        };
        let mut provider = MockEvmProvider::new();
        provider.expect_get_block_number().returning(|| Ok(5));
        provider
            .expect_get_logs()
            .return_once(move |_| Ok(vec![bad]));

        let (watcher, _, reputation) = setup(provider);
        watcher.handle_past_events().await.unwrap();
        assert!(reputation.dump().is_empty());
    }
}

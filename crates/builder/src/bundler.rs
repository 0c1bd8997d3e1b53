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

use aa_bundler_pool::EventWatcher;
use aa_bundler_provider::EvmProvider;
use aa_bundler_types::SendBundleResult;
use anyhow::Context;
use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{bundle_proposer::BundleProposer, bundle_sender::BundleSender};

/// Builds and submits one bundle at a time
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait Bundler: Send + Sync + 'static {
    /// Drop included operations, then build and submit the next bundle.
    ///
    /// Returns `None` when there was nothing to bundle or the submission
    /// failed without being fatal.
    async fn send_next_bundle(&self) -> anyhow::Result<Option<SendBundleResult>>;

    /// Apply entry point events emitted since the previous call
    async fn handle_past_events(&self) -> anyhow::Result<()>;
}

/// Single-flight bundler.
///
/// The lock is held from flushing events until the submission is reconciled,
/// so at most one bundle is in flight and paymaster deposits are never
/// spent twice.
pub struct BundlerImpl<P, BP, BS> {
    event_watcher: Arc<EventWatcher<P>>,
    proposer: BP,
    sender: BS,
    lock: Mutex<()>,
}

impl<P, BP, BS> BundlerImpl<P, BP, BS> {
    /// Creates a new bundler
    pub fn new(event_watcher: Arc<EventWatcher<P>>, proposer: BP, sender: BS) -> Self {
        Self {
            event_watcher,
            proposer,
            sender,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl<P, BP, BS> Bundler for BundlerImpl<P, BP, BS>
where
    P: EvmProvider + 'static,
    BP: BundleProposer,
    BS: BundleSender,
{
    async fn send_next_bundle(&self) -> anyhow::Result<Option<SendBundleResult>> {
        let _guard = self.lock.lock().await;

        self.event_watcher
            .handle_past_events()
            .await
            .context("should handle past events before bundling")?;

        let bundle = self.proposer.make_bundle().await;
        if bundle.is_empty() {
            debug!("No operations to bundle");
            return Ok(None);
        }

        let beneficiary = self.sender.select_beneficiary().await?;
        self.sender.send_bundle(bundle, beneficiary).await
    }

    async fn handle_past_events(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        self.event_watcher.handle_past_events().await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use aa_bundler_pool::{Mempool, ReputationParams, ReputationTracker};
    use aa_bundler_provider::MockEvmProvider;
    use aa_bundler_types::UserOperation;
    use alloy_primitives::{address, Address, B256, U256};

    use super::*;
    use crate::{
        bundle_proposer::{Bundle, MockBundleProposer},
        bundle_sender::MockBundleSender,
    };

    const ENTRY_POINT: Address = address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");
    const BENEFICIARY: Address = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

    fn event_watcher() -> Arc<EventWatcher<MockEvmProvider>> {
        let mut provider = MockEvmProvider::new();
        provider.expect_get_block_number().returning(|| Ok(100));
        provider.expect_get_logs().returning(|_| Ok(vec![]));
        let reputation = Arc::new(ReputationTracker::new(
            ReputationParams::bundler_default(),
            U256::ZERO,
            0,
        ));
        Arc::new(EventWatcher::new(
            Arc::new(provider),
            ENTRY_POINT,
            Arc::new(Mempool::new(reputation.clone())),
            reputation,
        ))
    }

    fn one_op_bundle() -> Bundle {
        Bundle {
            ops: vec![UserOperation::default()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_bundle_is_not_sent() {
        let mut proposer = MockBundleProposer::new();
        proposer.expect_make_bundle().returning(Bundle::default);
        let mut sender = MockBundleSender::new();
        sender.expect_select_beneficiary().never();
        sender.expect_send_bundle().never();

        let bundler = BundlerImpl::new(event_watcher(), proposer, sender);
        assert_eq!(bundler.send_next_bundle().await.unwrap(), None);
    }

    #[tokio::test]
    async fn sends_to_selected_beneficiary() {
        let mut proposer = MockBundleProposer::new();
        proposer.expect_make_bundle().returning(one_op_bundle);
        let mut sender = MockBundleSender::new();
        sender
            .expect_select_beneficiary()
            .returning(|| Ok(BENEFICIARY));
        sender
            .expect_send_bundle()
            .withf(|bundle, beneficiary| bundle.len() == 1 && *beneficiary == BENEFICIARY)
            .returning(|_, _| {
                Ok(Some(SendBundleResult {
                    transaction_hash: B256::repeat_byte(1),
                    user_op_hashes: vec![B256::repeat_byte(2)],
                }))
            });

        let bundler = BundlerImpl::new(event_watcher(), proposer, sender);
        let result = bundler.send_next_bundle().await.unwrap().unwrap();
        assert_eq!(result.transaction_hash, B256::repeat_byte(1));
    }

    #[tokio::test]
    async fn fatal_send_error_propagates() {
        let mut proposer = MockBundleProposer::new();
        proposer.expect_make_bundle().returning(one_op_bundle);
        let mut sender = MockBundleSender::new();
        sender
            .expect_select_beneficiary()
            .returning(|| Ok(BENEFICIARY));
        sender
            .expect_send_bundle()
            .returning(|_, _| Err(anyhow::anyhow!("method not found")));

        let bundler = BundlerImpl::new(event_watcher(), proposer, sender);
        assert!(bundler.send_next_bundle().await.is_err());
    }

    #[tokio::test]
    async fn event_failure_stops_bundling() {
        let mut provider = MockEvmProvider::new();
        provider
            .expect_get_block_number()
            .returning(|| Err(anyhow::anyhow!("node down").into()));
        let reputation = Arc::new(ReputationTracker::new(
            ReputationParams::bundler_default(),
            U256::ZERO,
            0,
        ));
        let watcher = Arc::new(EventWatcher::new(
            Arc::new(provider),
            ENTRY_POINT,
            Arc::new(Mempool::new(reputation.clone())),
            reputation,
        ));
        let mut proposer = MockBundleProposer::new();
        proposer.expect_make_bundle().never();

        let bundler = BundlerImpl::new(watcher, proposer, MockBundleSender::new());
        assert!(bundler.send_next_bundle().await.is_err());
    }

    #[derive(Default)]
    struct SlowProposer {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl BundleProposer for Arc<SlowProposer> {
        async fn make_bundle(&self) -> Bundle {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Bundle::default()
        }
    }

    #[tokio::test]
    async fn bundling_attempts_are_serialized() {
        let proposer = Arc::new(SlowProposer::default());
        let bundler = Arc::new(BundlerImpl::new(
            event_watcher(),
            proposer.clone(),
            MockBundleSender::new(),
        ));

        let attempts = (0..4).map(|_| {
            let bundler = bundler.clone();
            tokio::spawn(async move { bundler.send_next_bundle().await })
        });
        for attempt in attempts.collect::<Vec<_>>() {
            attempt.await.unwrap().unwrap();
        }
        assert_eq!(proposer.max_in_flight.load(Ordering::SeqCst), 1);
    }
}

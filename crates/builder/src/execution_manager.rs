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

use aa_bundler_pool::{Mempool, ReputationTracker};
use aa_bundler_sim::{validate_input_parameters, Validator};
use aa_bundler_types::{
    BundlingMode, MempoolResult, Reputation, ReputationEntry, SendBundleResult, UserOperation,
};
use aa_bundler_utils::handle::SpawnGuard;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::bundler::Bundler;

/// Operations the RPC layer performs on the bundler
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait BundlerHandle: Send + Sync + 'static {
    /// Validate an operation and add it to the mempool, returning its hash
    async fn send_user_operation(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> MempoolResult<B256>;

    /// Entry points this bundler submits to
    fn supported_entry_points(&self) -> Vec<Address>;

    /// Chain id of the bundler's network
    fn chain_id(&self) -> u64;

    /// Build and submit a bundle regardless of the mempool size
    async fn send_bundle_now(&self) -> anyhow::Result<Option<SendBundleResult>>;

    /// Switch between manual and automatic bundling
    fn set_bundling_mode(&self, mode: BundlingMode);

    /// Clear the mempool and all reputation
    fn clear_state(&self);

    /// Clear the mempool
    fn clear_mempool(&self);

    /// Operations in the mempool, in submission order
    fn dump_mempool(&self) -> Vec<UserOperation>;

    /// Overwrite reputation counters
    fn set_reputation(&self, entries: Vec<ReputationEntry>);

    /// Reputation of every known entity
    fn dump_reputation(&self) -> Vec<Reputation>;
}

/// Execution manager settings
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// The configured entry point
    pub entry_point: Address,
    /// Chain id of the network
    pub chain_id: u64,
    /// Period of the forced bundling timer, zero for manual bundling
    pub auto_bundle_interval: Duration,
    /// Mempool size that triggers a bundle on admission
    pub auto_bundle_mempool_size: usize,
}

#[derive(Debug, Clone, Copy)]
struct AutoBundle {
    interval: Duration,
    max_mempool_size: usize,
}

struct Inner<V, B> {
    validator: Arc<V>,
    mempool: Arc<Mempool>,
    reputation: Arc<ReputationTracker>,
    bundler: B,
    settings: Settings,
    auto_bundle: RwLock<AutoBundle>,
    // serializes admission with bundling
    lock: tokio::sync::Mutex<()>,
}

impl<V, B> Inner<V, B>
where
    V: Validator,
    B: Bundler,
{
    async fn send_user_operation(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> MempoolResult<B256> {
        validate_input_parameters(&op, entry_point, self.settings.entry_point)?;

        let _guard = self.lock.lock().await;
        let output = self.validator.validate_user_op(&op, None, true).await?;
        let hash = op.hash(self.settings.entry_point, self.settings.chain_id);
        self.mempool.add_user_op(
            op,
            hash,
            output.return_info.prefund,
            output.referenced_contracts,
            &output.entity_infos,
        )?;
        Ok(hash)
    }

    async fn attempt_bundle(&self, force: bool) -> anyhow::Result<Option<SendBundleResult>> {
        let max_mempool_size = self.auto_bundle.read().max_mempool_size;
        if !force && self.mempool.count() < max_mempool_size {
            return Ok(None);
        }

        let _guard = self.lock.lock().await;
        let result = self.bundler.send_next_bundle().await?;
        if max_mempool_size == 0 {
            // bundling on every operation, pick up what was just mined
            self.bundler.handle_past_events().await?;
        }
        Ok(result)
    }
}

/// Front door of the bundler: admits operations and decides when to bundle
pub struct ExecutionManager<V, B> {
    inner: Arc<Inner<V, B>>,
    auto_bundle_timer: Mutex<Option<SpawnGuard>>,
    reputation_cron: Mutex<Option<SpawnGuard>>,
}

impl<V, B> ExecutionManager<V, B>
where
    V: Validator,
    B: Bundler,
{
    /// Creates a new execution manager.
    ///
    /// No timers run until [`ExecutionManager::set_auto_bundler`] and
    /// [`ExecutionManager::set_reputation_cron`] are called.
    pub fn new(
        validator: Arc<V>,
        mempool: Arc<Mempool>,
        reputation: Arc<ReputationTracker>,
        bundler: B,
        settings: Settings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                validator,
                mempool,
                reputation,
                bundler,
                settings,
                auto_bundle: RwLock::new(AutoBundle {
                    interval: settings.auto_bundle_interval,
                    max_mempool_size: settings.auto_bundle_mempool_size,
                }),
                lock: tokio::sync::Mutex::new(()),
            }),
            auto_bundle_timer: Mutex::new(None),
            reputation_cron: Mutex::new(None),
        }
    }

    /// Validate an operation and add it to the mempool, then bundle if the
    /// mempool has reached the configured size.
    ///
    /// A rejected operation leaves the mempool and reputation untouched.
    pub async fn send_user_operation(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> MempoolResult<B256> {
        let hash = self.inner.send_user_operation(op, entry_point).await?;
        if let Err(error) = self.inner.attempt_bundle(false).await {
            error!("Failed to bundle after admitting {hash:?}: {error:#}");
        }
        Ok(hash)
    }

    /// Send a bundle if `force` is set or the mempool has reached the
    /// configured size
    pub async fn attempt_bundle(&self, force: bool) -> anyhow::Result<Option<SendBundleResult>> {
        self.inner.attempt_bundle(force).await
    }

    /// Bundle every `interval` regardless of the mempool size, and whenever
    /// admission brings the mempool to `max_mempool_size`.
    ///
    /// A zero interval disables the timer.
    pub fn set_auto_bundler(&self, interval: Duration, max_mempool_size: usize) {
        *self.inner.auto_bundle.write() = AutoBundle {
            interval,
            max_mempool_size,
        };

        let mut timer = self.auto_bundle_timer.lock();
        *timer = None;
        if interval.is_zero() {
            info!("Auto bundling timer disabled, bundling at mempool size {max_mempool_size}");
            return;
        }
        info!("Auto bundling every {interval:?} or at mempool size {max_mempool_size}");
        let inner = Arc::clone(&self.inner);
        *timer = Some(SpawnGuard::spawn_interval(interval, move || {
            let inner = Arc::clone(&inner);
            async move {
                if let Err(error) = inner.attempt_bundle(true).await {
                    error!("Auto bundling failed: {error:#}");
                }
            }
        }));
    }

    /// Decay reputation every `interval`
    pub fn set_reputation_cron(&self, interval: Duration) {
        let reputation = Arc::clone(&self.inner.reputation);
        *self.reputation_cron.lock() = Some(SpawnGuard::spawn_interval(interval, move || {
            reputation.hourly_cron();
            async {}
        }));
    }

    fn current_auto_bundle(&self) -> AutoBundle {
        *self.inner.auto_bundle.read()
    }
}

#[async_trait]
impl<V, B> BundlerHandle for ExecutionManager<V, B>
where
    V: Validator,
    B: Bundler,
{
    async fn send_user_operation(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> MempoolResult<B256> {
        ExecutionManager::send_user_operation(self, op, entry_point).await
    }

    fn supported_entry_points(&self) -> Vec<Address> {
        vec![self.inner.settings.entry_point]
    }

    fn chain_id(&self) -> u64 {
        self.inner.settings.chain_id
    }

    async fn send_bundle_now(&self) -> anyhow::Result<Option<SendBundleResult>> {
        self.attempt_bundle(true).await
    }

    fn set_bundling_mode(&self, mode: BundlingMode) {
        match mode {
            BundlingMode::Manual => self.set_auto_bundler(Duration::ZERO, usize::MAX),
            BundlingMode::Auto => self.set_auto_bundler(
                self.inner.settings.auto_bundle_interval,
                self.inner.settings.auto_bundle_mempool_size,
            ),
        }
        tracing::debug!("Bundling mode set to {mode}: {:?}", self.current_auto_bundle());
    }

    fn clear_state(&self) {
        self.inner.mempool.clear_state();
        self.inner.reputation.clear_state();
    }

    fn clear_mempool(&self) {
        self.inner.mempool.clear_state();
    }

    fn dump_mempool(&self) -> Vec<UserOperation> {
        self.inner.mempool.dump()
    }

    fn set_reputation(&self, entries: Vec<ReputationEntry>) {
        self.inner.reputation.set_reputation(entries);
    }

    fn dump_reputation(&self) -> Vec<Reputation> {
        self.inner.reputation.dump()
    }
}

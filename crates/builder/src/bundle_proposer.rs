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

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use aa_bundler_pool::{Mempool, MempoolEntry, ReputationTracker};
use aa_bundler_provider::{EntryPoint, EvmProvider};
use aa_bundler_sim::Validator;
use aa_bundler_types::{ReputationStatus, StorageMap, UserOperation, ValidationOutput};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use metrics::Counter;
use metrics_derive::Metrics;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tracing::{debug, info, warn};

/// Operations a paymaster or factory may have in a single bundle
pub const THROTTLED_ENTITY_BUNDLE_COUNT: usize = 4;

/// A bundle of operations and the storage they expect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    /// Operations, in inclusion order
    pub ops: Vec<UserOperation>,
    /// Storage accessed during validation, keyed by account
    pub storage_map: StorageMap,
}

impl Bundle {
    /// Number of operations in the bundle
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if there are no operations in the bundle
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Builds bundles from the mempool
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait BundleProposer: Send + Sync + 'static {
    /// Constructs the next bundle.
    ///
    /// Operations found to be invalid are removed from the mempool.
    async fn make_bundle(&self) -> Bundle;
}

/// Bundle proposer settings
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Gas limit of a bundle, summed over each operation's `preOpGas + callGasLimit`
    pub max_bundle_gas: u64,
    /// Bundles are submitted with `eth_sendRawTransactionConditional`
    pub use_conditional_rpc: bool,
    /// Expect the whole storage root of deployed senders
    pub merge_to_account_root_hash: bool,
}

#[derive(Metrics)]
#[metrics(scope = "bundle_proposer")]
struct BundleProposerMetrics {
    #[metric(describe = "the count of candidates skipped for a later bundle.")]
    skipped_ops: Counter,
    #[metric(describe = "the count of candidates removed from the mempool.")]
    rejected_ops: Counter,
}

/// Greedy bundle builder.
///
/// Candidates are taken in mempool order and each is revalidated. Packing
/// stops at the first candidate that would exceed the bundle gas limit.
pub struct BundleProposerImpl<V, E, P> {
    mempool: Arc<Mempool>,
    reputation: Arc<ReputationTracker>,
    validator: Arc<V>,
    entry_point: Arc<E>,
    provider: Arc<P>,
    settings: Settings,
    metrics: BundleProposerMetrics,
}

/// Running totals while a bundle is packed
#[derive(Debug, Default)]
struct BundleState {
    bundle: Bundle,
    total_gas: U256,
    senders: HashSet<Address>,
    paymaster_deposit: HashMap<Address, U256>,
    staked_entity_count: HashMap<Address, usize>,
}

impl BundleState {
    fn entity_count(&self, address: &Address) -> usize {
        self.staked_entity_count.get(address).copied().unwrap_or(0)
    }

    fn increment_entity_count(&mut self, address: Address) {
        *self.staked_entity_count.entry(address).or_default() += 1;
    }
}

/// What to do with a candidate
enum Verdict {
    Include(Box<ValidationOutput>),
    Skip,
    Remove,
    Full,
}

#[async_trait]
impl<V, E, P> BundleProposer for BundleProposerImpl<V, E, P>
where
    V: Validator,
    E: EntryPoint,
    P: EvmProvider + 'static,
{
    async fn make_bundle(&self) -> Bundle {
        let entries = self.mempool.get_sorted_for_inclusion();
        let known_senders = self.mempool.known_senders();
        let mut state = BundleState::default();

        for entry in entries {
            match self.check_candidate(&entry, &known_senders, &mut state).await {
                Verdict::Include(output) => self.include(&mut state, &entry, *output).await,
                Verdict::Skip => self.metrics.skipped_ops.increment(1),
                Verdict::Remove => {
                    self.mempool.remove_user_op(&entry.user_op.id());
                    self.metrics.rejected_ops.increment(1);
                }
                Verdict::Full => break,
            }
        }

        if !state.bundle.is_empty() {
            info!(
                "Proposed bundle with {} ops, total gas {}",
                state.bundle.len(),
                state.total_gas
            );
        }
        state.bundle
    }
}

impl<V, E, P> BundleProposerImpl<V, E, P>
where
    V: Validator,
    E: EntryPoint,
    P: EvmProvider + 'static,
{
    /// Creates a new proposer
    pub fn new(
        mempool: Arc<Mempool>,
        reputation: Arc<ReputationTracker>,
        validator: Arc<V>,
        entry_point: Arc<E>,
        provider: Arc<P>,
        settings: Settings,
    ) -> Self {
        Self {
            mempool,
            reputation,
            validator,
            entry_point,
            provider,
            settings,
            metrics: BundleProposerMetrics::default(),
        }
    }

    async fn check_candidate(
        &self,
        entry: &MempoolEntry,
        known_senders: &HashSet<Address>,
        state: &mut BundleState,
    ) -> Verdict {
        let op = &entry.user_op;
        let paymaster = op.paymaster();
        let factory = op.factory();
        let paymaster_status = paymaster.map(|a| self.reputation.status(a));
        let factory_status = factory.map(|a| self.reputation.status(a));

        if paymaster_status == Some(ReputationStatus::Banned)
            || factory_status == Some(ReputationStatus::Banned)
        {
            warn!(
                "Removing op from sender {}: paymaster or factory is banned",
                op.sender
            );
            return Verdict::Remove;
        }
        for (address, status) in [(paymaster, paymaster_status), (factory, factory_status)] {
            let Some(address) = address else { continue };
            if status == Some(ReputationStatus::Throttled)
                || state.entity_count(&address) >= THROTTLED_ENTITY_BUNDLE_COUNT
            {
                debug!("Skipping op from sender {}: {address} is throttled", op.sender);
                return Verdict::Skip;
            }
        }
        if state.senders.contains(&op.sender) {
            debug!("Skipping op from sender {}: sender already in bundle", op.sender);
            return Verdict::Skip;
        }

        // stake cannot decrease between the first and second validation
        let output = match self
            .validator
            .validate_user_op(op, Some(entry.referenced_contracts.clone()), false)
            .await
        {
            Ok(output) => output,
            Err(error) => {
                warn!(
                    "Removing op from sender {} that failed revalidation: {error}",
                    op.sender
                );
                return Verdict::Remove;
            }
        };

        if let Some(address) = output
            .storage_map
            .addresses()
            .find(|a| **a != op.sender && known_senders.contains(*a))
        {
            debug!(
                "Skipping op from sender {}: accesses storage of sender {address}",
                op.sender
            );
            return Verdict::Skip;
        }

        let op_gas = output
            .return_info
            .pre_op_gas
            .saturating_add(op.call_gas_limit);
        if state.total_gas.saturating_add(op_gas) > U256::from(self.settings.max_bundle_gas) {
            return Verdict::Full;
        }

        if let Some(paymaster) = paymaster {
            let deposit = match self.paymaster_deposit(state, paymaster).await {
                Some(deposit) => deposit,
                None => return Verdict::Skip,
            };
            if deposit < output.return_info.prefund {
                debug!(
                    "Skipping op from sender {}: paymaster {paymaster} deposit {deposit} below prefund {}",
                    op.sender, output.return_info.prefund
                );
                return Verdict::Skip;
            }
        }

        Verdict::Include(Box::new(output))
    }

    async fn include(&self, state: &mut BundleState, entry: &MempoolEntry, output: ValidationOutput) {
        let op = &entry.user_op;

        if self.settings.merge_to_account_root_hash
            && self.settings.use_conditional_rpc
            && !op.has_init_code()
        {
            match self.provider.get_storage_root(op.sender).await {
                Ok(root_hash) => state.bundle.storage_map.set_root_hash(op.sender, root_hash),
                Err(error) => {
                    warn!("Skipping op from sender {}: could not get storage root: {error}", op.sender);
                    self.metrics.skipped_ops.increment(1);
                    return;
                }
            }
        }

        if let Some(paymaster) = op.paymaster() {
            if let Some(deposit) = state.paymaster_deposit.get_mut(&paymaster) {
                *deposit -= output.return_info.prefund;
            }
            state.increment_entity_count(paymaster);
        }
        if let Some(factory) = op.factory() {
            state.increment_entity_count(factory);
        }

        state.bundle.storage_map.merge(output.storage_map);
        state.senders.insert(op.sender);
        state.total_gas = state
            .total_gas
            .saturating_add(output.return_info.pre_op_gas)
            .saturating_add(op.call_gas_limit);
        state.bundle.ops.push(op.clone());
    }

    // Deposits are read once per bundle and debited as operations are included.
    async fn paymaster_deposit(&self, state: &mut BundleState, paymaster: Address) -> Option<U256> {
        if let Some(deposit) = state.paymaster_deposit.get(&paymaster) {
            return Some(*deposit);
        }
        match self.entry_point.balance_of(paymaster).await {
            Ok(deposit) => {
                state.paymaster_deposit.insert(paymaster, deposit);
                Some(deposit)
            }
            Err(error) => {
                warn!("Could not get deposit of paymaster {paymaster}: {error}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use aa_bundler_pool::ReputationParams;
    use aa_bundler_provider::{MockEntryPoint, MockEvmProvider};
    use aa_bundler_sim::MockValidator;
    use aa_bundler_types::{
        AccountStorage, EntityInfos, MempoolError, ReferencedCodeHashes, ReputationEntry,
        ReturnInfo, StakeInfo,
    };
    use alloy_primitives::{address, Bytes, B256};

    use super::*;

    const ENTRY_POINT: Address = address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");
    const PAYMASTER: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const FACTORY: Address = address!("ffffffffffffffffffffffffffffffffffffffff");

    fn settings() -> Settings {
        Settings {
            max_bundle_gas: 5_000_000,
            use_conditional_rpc: false,
            merge_to_account_root_hash: false,
        }
    }

    fn op(sender: u8, priority_fee: u64) -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(sender),
            call_gas_limit: U256::from(100_000),
            max_fee_per_gas: U256::from(priority_fee),
            max_priority_fee_per_gas: U256::from(priority_fee),
            ..Default::default()
        }
    }

    fn with_paymaster(mut op: UserOperation) -> UserOperation {
        op.paymaster_and_data = Bytes::from(PAYMASTER.to_vec());
        op
    }

    fn with_factory(mut op: UserOperation) -> UserOperation {
        op.init_code = Bytes::from(FACTORY.to_vec());
        op
    }

    fn output(pre_op_gas: u64, prefund: u64) -> ValidationOutput {
        ValidationOutput {
            return_info: ReturnInfo {
                pre_op_gas: U256::from(pre_op_gas),
                prefund: U256::from(prefund),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct Harness {
        mempool: Arc<Mempool>,
        reputation: Arc<ReputationTracker>,
        outputs: Arc<Mutex<HashMap<Address, Result<ValidationOutput, String>>>>,
        entry_point: MockEntryPoint,
        provider: MockEvmProvider,
        settings: Settings,
    }

    impl Harness {
        fn new() -> Self {
            let reputation = Arc::new(ReputationTracker::new(
                ReputationParams::bundler_default(),
                U256::ZERO,
                0,
            ));
            Self {
                mempool: Arc::new(Mempool::new(reputation.clone())),
                reputation,
                outputs: Arc::default(),
                entry_point: MockEntryPoint::new(),
                provider: MockEvmProvider::new(),
                settings: settings(),
            }
        }

        fn add(&self, op: UserOperation, validation: Result<ValidationOutput, String>) {
            let infos = EntityInfos {
                sender: StakeInfo {
                    address: op.sender,
                    ..Default::default()
                },
                paymaster: op.paymaster().map(|address| StakeInfo {
                    address,
                    ..Default::default()
                }),
                factory: op.factory().map(|address| StakeInfo {
                    address,
                    ..Default::default()
                }),
                aggregator: None,
            };
            self.outputs.lock().unwrap().insert(op.sender, validation);
            let hash = op.hash(ENTRY_POINT, 1);
            self.mempool
                .add_user_op(op, hash, U256::ZERO, ReferencedCodeHashes::default(), &infos)
                .unwrap();
        }

        fn proposer(self) -> BundleProposerImpl<MockValidator, MockEntryPoint, MockEvmProvider> {
            let outputs = self.outputs.clone();
            let mut validator = MockValidator::new();
            validator
                .expect_validate_user_op()
                .withf(|_, _, check_stakes| !*check_stakes)
                .returning(move |op, _, _| {
                    outputs
                        .lock()
                        .unwrap()
                        .get(&op.sender)
                        .cloned()
                        .unwrap_or_else(|| Err("unknown op".to_string()))
                        .map_err(MempoolError::SimulateValidation)
                });
            BundleProposerImpl::new(
                self.mempool,
                self.reputation,
                Arc::new(validator),
                Arc::new(self.entry_point),
                Arc::new(self.provider),
                self.settings,
            )
        }
    }

    fn senders(bundle: &Bundle) -> Vec<Address> {
        bundle.ops.iter().map(|op| op.sender).collect()
    }

    #[tokio::test]
    async fn ops_in_ascending_priority_fee_order() {
        let harness = Harness::new();
        harness.add(op(1, 5), Ok(output(50_000, 0)));
        harness.add(op(2, 1), Ok(output(50_000, 0)));

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(
            senders(&bundle),
            vec![Address::repeat_byte(2), Address::repeat_byte(1)]
        );
    }

    #[tokio::test]
    async fn one_op_per_sender() {
        let harness = Harness::new();
        let first = op(1, 1);
        let second = UserOperation {
            nonce: U256::from(1),
            ..op(1, 1)
        };
        harness.add(first.clone(), Ok(output(50_000, 0)));
        harness.add(second, Ok(output(50_000, 0)));
        harness.add(op(2, 1), Ok(output(50_000, 0)));
        let mempool = harness.mempool.clone();

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(
            senders(&bundle),
            vec![Address::repeat_byte(1), Address::repeat_byte(2)]
        );
        assert_eq!(bundle.ops[0], first);
        assert_eq!(mempool.count(), 3);
    }

    #[tokio::test]
    async fn banned_paymaster_op_is_removed() {
        let harness = Harness::new();
        harness.add(with_paymaster(op(1, 1)), Ok(output(50_000, 0)));
        harness.reputation.add_blacklist([PAYMASTER]);
        let mempool = harness.mempool.clone();

        let bundle = harness.proposer().make_bundle().await;
        assert!(bundle.is_empty());
        assert_eq!(mempool.count(), 0);
    }

    #[tokio::test]
    async fn throttled_factory_op_is_kept() {
        let harness = Harness::new();
        harness.add(with_factory(op(1, 1)), Ok(output(50_000, 0)));
        harness.reputation.set_reputation([ReputationEntry {
            address: FACTORY,
            ops_seen: 1000,
            ops_included: 50,
        }]);
        let mempool = harness.mempool.clone();

        let bundle = harness.proposer().make_bundle().await;
        assert!(bundle.is_empty());
        assert_eq!(mempool.count(), 1);
    }

    #[tokio::test]
    async fn entity_capped_per_bundle() {
        let mut harness = Harness::new();
        for sender in 1..=6 {
            harness.add(with_factory(op(sender, 1)), Ok(output(50_000, 0)));
        }
        harness.settings.max_bundle_gas = 10_000_000;

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(bundle.len(), THROTTLED_ENTITY_BUNDLE_COUNT);
    }

    #[tokio::test]
    async fn failed_revalidation_removes_op() {
        let harness = Harness::new();
        harness.add(op(1, 1), Err("AA23 reverted".to_string()));
        harness.add(op(2, 2), Ok(output(50_000, 0)));
        let mempool = harness.mempool.clone();

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(senders(&bundle), vec![Address::repeat_byte(2)]);
        assert_eq!(mempool.dump(), vec![op(2, 2)]);
    }

    #[tokio::test]
    async fn storage_of_other_sender_is_skipped() {
        let harness = Harness::new();
        let mut touches_other_sender = output(50_000, 0);
        touches_other_sender.storage_map = [
            (Address::repeat_byte(1), AccountStorage::RootHash(B256::ZERO)),
            (Address::repeat_byte(2), AccountStorage::RootHash(B256::ZERO)),
        ]
        .into_iter()
        .collect();
        let mut touches_self = output(50_000, 0);
        touches_self.storage_map = [(Address::repeat_byte(2), AccountStorage::RootHash(B256::ZERO))]
            .into_iter()
            .collect();
        harness.add(op(1, 1), Ok(touches_other_sender));
        harness.add(op(2, 2), Ok(touches_self));
        let mempool = harness.mempool.clone();

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(senders(&bundle), vec![Address::repeat_byte(2)]);
        assert_eq!(mempool.count(), 2);
    }

    #[tokio::test]
    async fn stops_at_gas_limit() {
        let harness = Harness::new();
        // 100k call gas each
        harness.add(op(1, 1), Ok(output(2_000_000, 0)));
        harness.add(op(2, 2), Ok(output(2_700_000, 0)));
        harness.add(op(3, 3), Ok(output(1, 0)));

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(senders(&bundle), vec![Address::repeat_byte(1)]);
    }

    #[tokio::test]
    async fn gas_limit_is_inclusive() {
        let harness = Harness::new();
        harness.add(op(1, 1), Ok(output(2_400_000, 0)));
        harness.add(op(2, 2), Ok(output(2_400_000, 0)));

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(bundle.len(), 2);
    }

    #[tokio::test]
    async fn paymaster_deposit_is_debited() {
        let mut harness = Harness::new();
        harness
            .entry_point
            .expect_balance_of()
            .times(1)
            .returning(|_| Ok(U256::from(250)));
        harness.add(with_paymaster(op(1, 1)), Ok(output(10, 100)));
        harness.add(with_paymaster(op(2, 2)), Ok(output(10, 100)));
        harness.add(with_paymaster(op(3, 3)), Ok(output(10, 100)));
        let mempool = harness.mempool.clone();

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(
            senders(&bundle),
            vec![Address::repeat_byte(1), Address::repeat_byte(2)]
        );
        assert_eq!(mempool.count(), 3);
    }

    #[tokio::test]
    async fn root_hash_of_deployed_sender() {
        let mut harness = Harness::new();
        harness.settings.use_conditional_rpc = true;
        harness.settings.merge_to_account_root_hash = true;
        harness
            .provider
            .expect_get_storage_root()
            .withf(|a| *a == Address::repeat_byte(1))
            .times(1)
            .returning(|_| Ok(B256::repeat_byte(0x77)));

        let mut slots = output(10, 0);
        slots
            .storage_map
            .insert_slot(Address::repeat_byte(1), B256::ZERO, B256::ZERO);
        slots
            .storage_map
            .insert_slot(Address::repeat_byte(9), B256::ZERO, B256::ZERO);
        harness.add(op(1, 1), Ok(slots));
        harness.add(with_factory(op(2, 2)), Ok(output(10, 0)));

        let bundle = harness.proposer().make_bundle().await;
        assert_eq!(bundle.len(), 2);
        assert_eq!(
            bundle.storage_map.get(&Address::repeat_byte(1)),
            Some(&AccountStorage::RootHash(B256::repeat_byte(0x77)))
        );
        assert!(matches!(
            bundle.storage_map.get(&Address::repeat_byte(9)),
            Some(AccountStorage::Slots(_))
        ));
        assert_eq!(bundle.storage_map.get(&Address::repeat_byte(2)), None);
    }
}

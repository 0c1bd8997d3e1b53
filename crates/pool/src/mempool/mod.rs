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

//! In-memory pool of validated user operations.

mod role_counts;
mod pool;

use std::{collections::HashSet, sync::Arc};

use aa_bundler_types::{
    Entity, EntityInfos, MempoolError, MempoolResult, ReferencedCodeHashes, StakeInfo,
    UserOperation, UserOperationId,
};
use aa_bundler_utils::math;
use alloy_primitives::{Address, B256, U256};
use metrics::{Counter, Gauge};
use metrics_derive::Metrics;
use parking_lot::RwLock;

use self::pool::PoolInner;
use crate::ReputationTracker;

/// Concurrent operations allowed per unstaked sender
pub const MAX_MEMPOOL_USEROPS_PER_SENDER: usize = 4;
/// Pool entries after which an entity must not be throttled
pub const THROTTLED_ENTITY_MEMPOOL_COUNT: usize = 4;
/// Fee increase, in percent, required to replace an operation
const REPLACEMENT_FEE_PERCENT: u32 = 10;

/// An operation admitted to the pool, along with its validation results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MempoolEntry {
    /// The operation
    pub user_op: UserOperation,
    /// Hash of the operation
    pub user_op_hash: B256,
    /// Prefund required by the operation
    pub prefund: U256,
    /// Contracts accessed during validation
    pub referenced_contracts: ReferencedCodeHashes,
    /// Aggregator of the operation, if any
    pub aggregator: Option<Address>,
}

#[derive(Metrics)]
#[metrics(scope = "mempool")]
struct MempoolMetrics {
    #[metric(describe = "the number of ops in the pool.")]
    num_ops: Gauge,
    #[metric(describe = "the count of ops added.")]
    ops_added: Counter,
    #[metric(describe = "the count of ops replaced.")]
    ops_replaced: Counter,
    #[metric(describe = "the count of ops removed.")]
    ops_removed: Counter,
    #[metric(describe = "the count of ops rejected on admission.")]
    ops_rejected: Counter,
}

/// Pool of validated user operations, at most one per sender and nonce.
///
/// Admission consults the [`ReputationTracker`] to cap how many operations an
/// entity may have in the pool.
pub struct Mempool {
    state: RwLock<PoolInner>,
    reputation: Arc<ReputationTracker>,
    metrics: MempoolMetrics,
}

impl Mempool {
    /// Creates an empty pool
    pub fn new(reputation: Arc<ReputationTracker>) -> Self {
        Self {
            state: RwLock::new(PoolInner::default()),
            reputation,
            metrics: MempoolMetrics::default(),
        }
    }

    /// Adds a validated operation, replacing the pool entry with the same
    /// sender and nonce if the new operation bumps both fees.
    ///
    /// Nothing is changed when an error is returned.
    pub fn add_user_op(
        &self,
        user_op: UserOperation,
        user_op_hash: B256,
        prefund: U256,
        referenced_contracts: ReferencedCodeHashes,
        entity_infos: &EntityInfos,
    ) -> MempoolResult<()> {
        let entry = MempoolEntry {
            user_op,
            user_op_hash,
            prefund,
            referenced_contracts,
            aggregator: entity_infos.aggregator.map(|a| a.address),
        };

        let mut state = self.state.write();
        if let Err(error) = self.admit(&mut state, entry, entity_infos) {
            tracing::debug!("userOp rejected: {error}");
            self.metrics.ops_rejected.increment(1);
            return Err(error);
        }
        self.metrics.num_ops.set(state.len() as f64);
        drop(state);

        self.update_seen_status(entity_infos);
        Ok(())
    }

    /// Operations in inclusion order: ascending priority fee, ties broken by
    /// submission order. Neither the base fee nor the max fee is considered.
    pub fn get_sorted_for_inclusion(&self) -> Vec<Arc<MempoolEntry>> {
        self.state.read().best_operations().collect()
    }

    /// Removes the operation with the given sender and nonce
    pub fn remove_user_op(&self, id: &UserOperationId) -> Option<Arc<MempoolEntry>> {
        let mut state = self.state.write();
        let removed = state.remove_operation_by_id(id);
        self.record_removal(&state, removed.is_some());
        removed
    }

    /// Removes the operation with the given hash
    pub fn remove_user_op_by_hash(&self, hash: B256) -> Option<Arc<MempoolEntry>> {
        let mut state = self.state.write();
        let removed = state.remove_operation_by_hash(hash);
        self.record_removal(&state, removed.is_some());
        removed
    }

    /// Addresses that are the sender of some pool entry
    pub fn known_senders(&self) -> HashSet<Address> {
        self.state.read().known_senders()
    }

    /// Addresses that are the paymaster or factory of some pool entry
    pub fn known_entities(&self) -> HashSet<Address> {
        self.state.read().known_entities()
    }

    /// Number of pool entries in which the address is the sender, paymaster
    /// or factory
    pub fn entry_count(&self, address: Address) -> usize {
        self.state.read().address_count(&address)
    }

    /// Number of operations in the pool
    pub fn count(&self) -> usize {
        self.state.read().len()
    }

    /// All operations, in submission order
    pub fn dump(&self) -> Vec<UserOperation> {
        self.state
            .read()
            .operations_by_submission()
            .into_iter()
            .map(|e| e.user_op.clone())
            .collect()
    }

    /// Removes every operation
    pub fn clear_state(&self) {
        let mut state = self.state.write();
        state.clear();
        self.metrics.num_ops.set(0.0);
    }

    fn admit(
        &self,
        state: &mut PoolInner,
        entry: MempoolEntry,
        entity_infos: &EntityInfos,
    ) -> MempoolResult<()> {
        if let Some(old) = state.get_by_id(&entry.user_op.id()) {
            check_replacement_fees(&old.user_op, &entry.user_op)?;
            tracing::debug!(
                "replace userOp sender {} nonce {}",
                entry.user_op.sender,
                entry.user_op.nonce
            );
            state.replace_operation(entry);
            self.metrics.ops_replaced.increment(1);
        } else {
            state.check_multiple_roles_violation(&entry.user_op)?;
            self.check_reputation(state, entity_infos)?;
            tracing::debug!(
                "add userOp sender {} nonce {}",
                entry.user_op.sender,
                entry.user_op.nonce
            );
            state.add_operation(entry);
            self.metrics.ops_added.increment(1);
        }
        Ok(())
    }

    fn record_removal(&self, state: &PoolInner, removed: bool) {
        if removed {
            self.metrics.ops_removed.increment(1);
            self.metrics.num_ops.set(state.len() as f64);
        }
    }

    fn check_reputation(&self, state: &PoolInner, entity_infos: &EntityInfos) -> MempoolResult<()> {
        self.check_reputation_status(
            state,
            Entity::account(entity_infos.sender.address),
            &entity_infos.sender,
            Some(MAX_MEMPOOL_USEROPS_PER_SENDER),
        )?;
        if let Some(info) = &entity_infos.paymaster {
            self.check_reputation_status(state, Entity::paymaster(info.address), info, None)?;
        }
        if let Some(info) = &entity_infos.factory {
            self.check_reputation_status(state, Entity::factory(info.address), info, None)?;
        }
        if let Some(info) = &entity_infos.aggregator {
            self.check_reputation_status(state, Entity::aggregator(info.address), info, None)?;
        }
        Ok(())
    }

    fn check_reputation_status(
        &self,
        state: &PoolInner,
        entity: Entity,
        info: &StakeInfo,
        max_allowed_override: Option<usize>,
    ) -> MempoolResult<()> {
        let max_allowed = max_allowed_override.unwrap_or_else(|| {
            self.reputation
                .calculate_max_allowed_mempool_ops_unstaked(entity.address)
        });
        self.reputation.check_banned(entity)?;
        let entry_count = state.address_count(&entity.address);
        if entry_count > THROTTLED_ENTITY_MEMPOOL_COUNT {
            self.reputation.check_throttled(entity)?;
        }
        if entry_count > max_allowed {
            self.reputation.check_stake(entity, info)?;
        }
        Ok(())
    }

    fn update_seen_status(&self, entity_infos: &EntityInfos) {
        self.reputation
            .update_seen_status(entity_infos.sender.address);
        for info in [
            entity_infos.aggregator,
            entity_infos.paymaster,
            entity_infos.factory,
        ]
        .into_iter()
        .flatten()
        {
            self.reputation.update_seen_status(info.address);
        }
    }
}

fn check_replacement_fees(old: &UserOperation, new: &UserOperation) -> MempoolResult<()> {
    if !math::is_bumped_by_percent(
        old.max_priority_fee_per_gas,
        new.max_priority_fee_per_gas,
        REPLACEMENT_FEE_PERCENT,
    ) {
        return Err(MempoolError::InvalidFields(format!(
            "Replacement UserOperation must have higher maxPriorityFeePerGas (old={} new={})",
            old.max_priority_fee_per_gas, new.max_priority_fee_per_gas
        )));
    }
    if !math::is_bumped_by_percent(
        old.max_fee_per_gas,
        new.max_fee_per_gas,
        REPLACEMENT_FEE_PERCENT,
    ) {
        return Err(MempoolError::InvalidFields(format!(
            "Replacement UserOperation must have higher maxFeePerGas (old={} new={})",
            old.max_fee_per_gas, new.max_fee_per_gas
        )));
    }
    Ok(())
}

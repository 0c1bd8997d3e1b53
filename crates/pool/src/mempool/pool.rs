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
    cmp::Ordering,
    collections::{hash_map::Entry, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use aa_bundler_types::{
    Entity, EntityType, MempoolError, MempoolResult, UserOperation, UserOperationId,
};
use alloy_primitives::{Address, B256};

use super::{role_counts::RoleCounts, MempoolEntry};

/// Pool of user operations
#[derive(Debug, Default)]
pub(crate) struct PoolInner {
    /// Operations by hash
    by_hash: HashMap<B256, OrderedPoolEntry>,
    /// Operations by operation ID
    by_id: HashMap<UserOperationId, OrderedPoolEntry>,
    /// Operations in inclusion order
    best: BTreeSet<OrderedPoolEntry>,
    /// Count of operations by entity address
    count_by_address: HashMap<Address, RoleCounts>,
    /// Submission ID counter
    submission_id: u64,
}

impl PoolInner {
    pub(crate) fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub(crate) fn get_by_id(&self, id: &UserOperationId) -> Option<Arc<MempoolEntry>> {
        self.by_id.get(id).map(|o| o.entry.clone())
    }

    pub(crate) fn best_operations(&self) -> impl Iterator<Item = Arc<MempoolEntry>> + '_ {
        self.best.iter().map(|o| o.entry.clone())
    }

    /// Operations in the order they were first submitted
    pub(crate) fn operations_by_submission(&self) -> Vec<Arc<MempoolEntry>> {
        let mut ops = self.by_hash.values().collect::<Vec<_>>();
        ops.sort_by_key(|o| o.submission_id);
        ops.into_iter().map(|o| o.entry.clone()).collect()
    }

    pub(crate) fn address_count(&self, address: &Address) -> usize {
        self.count_by_address
            .get(address)
            .map_or(0, RoleCounts::total)
    }

    pub(crate) fn known_senders(&self) -> HashSet<Address> {
        self.count_by_address
            .iter()
            .filter(|(_, c)| c.as_sender() > 0)
            .map(|(address, _)| *address)
            .collect()
    }

    pub(crate) fn known_entities(&self) -> HashSet<Address> {
        self.count_by_address
            .iter()
            .filter(|(_, c)| c.is_entity())
            .map(|(address, _)| *address)
            .collect()
    }

    /// Inserts an operation that has no entry for its ID
    pub(crate) fn add_operation(&mut self, entry: MempoolEntry) {
        let submission_id = self.next_submission_id();
        self.insert(entry, submission_id);
    }

    /// Replaces the operation with the same ID, keeping its submission ID
    pub(crate) fn replace_operation(&mut self, entry: MempoolEntry) -> Option<Arc<MempoolEntry>> {
        let old = self.by_id.get(&entry.user_op.id())?.clone();
        self.remove_operation_internal(old.entry.user_op_hash);
        self.insert(entry, old.submission_id);
        Some(old.entry)
    }

    pub(crate) fn remove_operation_by_hash(&mut self, hash: B256) -> Option<Arc<MempoolEntry>> {
        self.remove_operation_internal(hash)
    }

    pub(crate) fn remove_operation_by_id(
        &mut self,
        id: &UserOperationId,
    ) -> Option<Arc<MempoolEntry>> {
        let hash = self.by_id.get(id)?.entry.user_op_hash;
        self.remove_operation_internal(hash)
    }

    // An address may not be a sender in one operation and a paymaster or
    // factory in another.
    pub(crate) fn check_multiple_roles_violation(&self, uo: &UserOperation) -> MempoolResult<()> {
        if let Some(ec) = self.count_by_address.get(&uo.sender) {
            if ec.is_entity() {
                return Err(MempoolError::OpcodeValidation(format!(
                    "The sender address \"{}\" is used as a different entity in another UserOperation currently in mempool",
                    uo.sender
                )));
            }
        }

        for e in uo.entities() {
            match e.kind {
                EntityType::Factory | EntityType::Paymaster => {
                    if let Some(ec) = self.count_by_address.get(&e.address) {
                        if ec.as_sender() > 0 {
                            return Err(multiple_roles_error(e));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.by_hash.clear();
        self.by_id.clear();
        self.best.clear();
        self.count_by_address.clear();
    }

    fn insert(&mut self, entry: MempoolEntry, submission_id: u64) {
        let pool_op = OrderedPoolEntry {
            entry: Arc::new(entry),
            submission_id,
        };

        for e in pool_op.entry.user_op.entities() {
            self.count_by_address
                .entry(e.address)
                .or_default()
                .add(&e.kind);
        }

        self.by_hash
            .insert(pool_op.entry.user_op_hash, pool_op.clone());
        self.by_id.insert(pool_op.entry.user_op.id(), pool_op.clone());
        self.best.insert(pool_op);
    }

    fn remove_operation_internal(&mut self, hash: B256) -> Option<Arc<MempoolEntry>> {
        let op = self.by_hash.remove(&hash)?;
        self.by_id.remove(&op.entry.user_op.id());
        self.best.remove(&op);

        for e in op.entry.user_op.entities() {
            self.decrement_address_count(e.address, &e.kind);
        }

        Some(op.entry)
    }

    fn decrement_address_count(&mut self, address: Address, entity: &EntityType) {
        if let Entry::Occupied(mut count_entry) = self.count_by_address.entry(address) {
            count_entry.get_mut().remove(entity);
            if count_entry.get().total() == 0 {
                count_entry.remove_entry();
            }
        }
    }

    fn next_submission_id(&mut self) -> u64 {
        let id = self.submission_id;
        self.submission_id += 1;
        id
    }
}

fn multiple_roles_error(entity: Entity) -> MempoolError {
    let role = match entity.kind {
        EntityType::Factory => "A Factory",
        _ => "A Paymaster",
    };
    MempoolError::OpcodeValidation(format!(
        "{role} at {} in this UserOperation is used as a sender entity in another UserOperation currently in mempool.",
        entity.address
    ))
}

/// Wrapper around MempoolEntry that adds a submission ID to implement
/// a custom ordering for the best operations
#[derive(Debug, Clone)]
struct OrderedPoolEntry {
    entry: Arc<MempoolEntry>,
    submission_id: u64,
}

impl Eq for OrderedPoolEntry {}

impl Ord for OrderedPoolEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Sort by priority fee ascending then by id ascending.
        // Base fee and max fee are not taken into account.
        self.entry
            .user_op
            .max_priority_fee_per_gas
            .cmp(&other.entry.user_op.max_priority_fee_per_gas)
            .then_with(|| self.submission_id.cmp(&other.submission_id))
    }
}

impl PartialOrd for OrderedPoolEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderedPoolEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

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

//! Account storage expectations attached to conditional bundle submissions

use std::collections::{btree_map::Entry, BTreeMap};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Expected storage of a single account.
///
/// Either the whole storage root, or a set of individual slot values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountStorage {
    /// Expected storage root hash of the account
    RootHash(B256),
    /// Expected values of individual slots
    Slots(BTreeMap<B256, B256>),
}

/// Per-account storage expectations, serialized as the `knownAccounts` object
/// of `eth_sendRawTransactionConditional`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageMap(BTreeMap<Address, AccountStorage>);

impl StorageMap {
    /// Create an empty storage map
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no account has expectations
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of accounts with expectations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Expectations for a single account
    pub fn get(&self, address: &Address) -> Option<&AccountStorage> {
        self.0.get(address)
    }

    /// Addresses with expectations
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.0.keys()
    }

    /// Replace all expectations for `address` with a storage root
    pub fn set_root_hash(&mut self, address: Address, root_hash: B256) {
        self.0.insert(address, AccountStorage::RootHash(root_hash));
    }

    /// Record an expected value for one slot of `address`.
    ///
    /// Ignored when the account already pins its storage root.
    pub fn insert_slot(&mut self, address: Address, slot: B256, value: B256) {
        match self
            .0
            .entry(address)
            .or_insert_with(|| AccountStorage::Slots(BTreeMap::new()))
        {
            AccountStorage::RootHash(_) => {}
            AccountStorage::Slots(slots) => {
                slots.insert(slot, value);
            }
        }
    }

    /// Merge another map into this one.
    ///
    /// An incoming root hash overwrites whatever is recorded for the account.
    /// Incoming slots are dropped for an account that already has a root hash,
    /// otherwise they are unioned with the existing slots.
    pub fn merge(&mut self, other: StorageMap) {
        for (address, incoming) in other.0 {
            match (self.0.entry(address), incoming) {
                (Entry::Vacant(e), incoming) => {
                    e.insert(incoming);
                }
                (Entry::Occupied(mut e), AccountStorage::RootHash(root)) => {
                    e.insert(AccountStorage::RootHash(root));
                }
                (Entry::Occupied(mut e), AccountStorage::Slots(slots)) => match e.get_mut() {
                    AccountStorage::RootHash(_) => {}
                    AccountStorage::Slots(existing) => existing.extend(slots),
                },
            }
        }
    }
}

impl FromIterator<(Address, AccountStorage)> for StorageMap {
    fn from_iter<T: IntoIterator<Item = (Address, AccountStorage)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(b: u8) -> B256 {
        B256::repeat_byte(b)
    }

    #[test]
    fn merge_unions_slots() {
        let a = Address::repeat_byte(1);
        let mut map = StorageMap::new();
        map.insert_slot(a, slot(1), slot(10));

        let mut other = StorageMap::new();
        other.insert_slot(a, slot(2), slot(20));
        map.merge(other);

        let AccountStorage::Slots(slots) = map.get(&a).unwrap() else {
            panic!("expected slots");
        };
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[&slot(2)], slot(20));
    }

    #[test]
    fn incoming_root_hash_overwrites_slots() {
        let a = Address::repeat_byte(1);
        let mut map = StorageMap::new();
        map.insert_slot(a, slot(1), slot(10));

        let mut other = StorageMap::new();
        other.set_root_hash(a, slot(0xaa));
        map.merge(other);

        assert_eq!(map.get(&a), Some(&AccountStorage::RootHash(slot(0xaa))));
    }

    #[test]
    fn existing_root_hash_ignores_incoming_slots() {
        let a = Address::repeat_byte(1);
        let mut map = StorageMap::new();
        map.set_root_hash(a, slot(0xaa));

        let mut other = StorageMap::new();
        other.insert_slot(a, slot(1), slot(10));
        map.merge(other);
        map.insert_slot(a, slot(2), slot(20));

        assert_eq!(map.get(&a), Some(&AccountStorage::RootHash(slot(0xaa))));
    }

    #[test]
    fn serializes_as_known_accounts() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let mut map = StorageMap::new();
        map.set_root_hash(a, slot(0xaa));
        map.insert_slot(b, slot(1), slot(2));

        let json = serde_json::to_value(&map).unwrap();
        let accounts = json.as_object().unwrap();
        assert_eq!(accounts.len(), 2);
        assert!(accounts.values().any(|v| v == &serde_json::json!(slot(0xaa))));
        assert!(accounts.values().any(|v| v.is_object()));

        let back: StorageMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}

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

//! Trait for interacting with chain data.

use aa_bundler_types::StorageMap;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::{BlockId, Filter, Log};
#[cfg(feature = "test-utils")]
use mockall::automock;

use super::error::ProviderResult;

/// Current EIP-1559 fee suggestion of the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeData {
    /// Suggested max fee per gas, absent on chains without a base fee
    pub max_fee_per_gas: Option<u128>,
    /// Suggested max priority fee per gas
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Trait for interacting with chain data.
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait::async_trait]
pub trait EvmProvider: Send + Sync {
    /// Get the current block number
    async fn get_block_number(&self) -> ProviderResult<u64>;

    /// Get the balance of an address
    async fn get_balance(&self, address: Address, block: Option<BlockId>) -> ProviderResult<U256>;

    /// Get the nonce/transaction count of an address
    async fn get_transaction_count(&self, address: Address) -> ProviderResult<u64>;

    /// Get the logs matching a filter
    async fn get_logs(&self, filter: &Filter) -> ProviderResult<Vec<Log>>;

    /// Get the suggested fees for a new transaction
    async fn get_fee_data(&self) -> ProviderResult<FeeData>;

    /// Get the storage root hash of an account via `eth_getProof`
    async fn get_storage_root(&self, address: Address) -> ProviderResult<B256>;

    /// Submit a signed transaction with `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, tx: Bytes) -> ProviderResult<B256>;

    /// Submit a signed transaction with `eth_sendRawTransactionConditional`,
    /// expecting the account storage in `known_accounts`
    async fn send_raw_transaction_conditional(
        &self,
        tx: Bytes,
        known_accounts: StorageMap,
    ) -> ProviderResult<B256>;
}

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

use aa_bundler_types::{GasFees, UserOperation, ValidationOutput};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::TransactionRequest;
#[cfg(feature = "test-utils")]
use mockall::automock;

use super::error::ProviderResult;

/// Why `simulateValidation` did not produce a validation result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationRevert {
    /// The entry point reverted with `FailedOp`
    #[error("{reason}")]
    FailedOp {
        /// Index of the operation, always 0 for a single simulation
        op_index: usize,
        /// Reason string, prefixed with an `AAxx` code
        reason: String,
    },
    /// Plain `Error(string)` revert
    #[error("{0}")]
    Revert(String),
    /// Revert data that could not be decoded
    #[error("unknown revert data: {0}")]
    Unknown(Bytes),
}

/// Trait for interacting with a v0.6 entry point contract.
/// [Contracts can be found here](https://github.com/eth-infinitism/account-abstraction/tree/v0.6.0).
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait::async_trait]
pub trait EntryPoint: Send + Sync + 'static {
    /// Get the address of the entry point contract
    fn address(&self) -> Address;

    /// Get the deposit of an address
    async fn balance_of(&self, address: Address) -> ProviderResult<U256>;

    /// Hash of a user operation as computed by the contract
    async fn get_user_op_hash(&self, op: UserOperation) -> ProviderResult<B256>;

    /// Run `simulateValidation` for one operation
    async fn simulate_validation(
        &self,
        op: UserOperation,
    ) -> ProviderResult<Result<ValidationOutput, ValidationRevert>>;

    /// Construct the `handleOps` transaction for a bundle
    fn get_send_bundle_transaction(
        &self,
        ops: Vec<UserOperation>,
        beneficiary: Address,
        gas: u64,
        gas_fees: GasFees,
    ) -> TransactionRequest;
}

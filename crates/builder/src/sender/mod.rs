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

mod raw;

use aa_bundler_provider::{ProviderError, TransactionRequest};
use aa_bundler_types::StorageMap;
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
pub use raw::RawTransactionSender;

/// A submitted bundle transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTxInfo {
    /// Nonce the transaction was signed with
    pub nonce: u64,
    /// Hash reported by the node
    pub tx_hash: B256,
}

/// Errors from submitting a transaction
#[derive(Debug, thiserror::Error)]
pub enum TxSenderError {
    /// The node rejected the transaction
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// All other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TxSenderError {
    /// Revert data returned by the node, if the submission reverted
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            TxSenderError::Provider(e) => e.revert_data(),
            TxSenderError::Other(_) => None,
        }
    }

    /// True if the node does not implement the submission method
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, TxSenderError::Provider(e) if e.is_method_not_found())
    }
}

/// Result of a transaction sender call
pub type Result<T> = std::result::Result<T, TxSenderError>;

/// Signs and submits bundle transactions
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait TransactionSender: Send + Sync + 'static {
    /// Sign and submit a transaction. `known_accounts` is passed to nodes
    /// supporting conditional submission.
    async fn send_transaction(
        &self,
        tx: TransactionRequest,
        known_accounts: &StorageMap,
    ) -> Result<SentTxInfo>;

    /// Address of the submitting account
    fn address(&self) -> Address;
}

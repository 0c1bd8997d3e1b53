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

use aa_bundler_provider::{EvmProvider, TransactionRequest};
use aa_bundler_types::StorageMap;
use alloy_primitives::Address;
use async_trait::async_trait;

use super::{Result, SentTxInfo, TransactionSender};
use crate::signer::Signer;

/// Submits signed transactions to the node with `eth_sendRawTransaction`, or
/// `eth_sendRawTransactionConditional` when conditional submission is enabled
#[derive(Debug)]
pub struct RawTransactionSender<P, S> {
    submit_provider: Arc<P>,
    signer: S,
    use_conditional_rpc: bool,
}

#[async_trait]
impl<P, S> TransactionSender for RawTransactionSender<P, S>
where
    P: EvmProvider + 'static,
    S: Signer,
{
    async fn send_transaction(
        &self,
        tx: TransactionRequest,
        known_accounts: &StorageMap,
    ) -> Result<SentTxInfo> {
        let (raw_tx, nonce) = self.signer.fill_and_sign(tx).await?;

        let tx_hash = if self.use_conditional_rpc {
            self.submit_provider
                .send_raw_transaction_conditional(raw_tx, known_accounts.clone())
                .await?
        } else {
            self.submit_provider.send_raw_transaction(raw_tx).await?
        };

        Ok(SentTxInfo { nonce, tx_hash })
    }

    fn address(&self) -> Address {
        self.signer.address()
    }
}

impl<P, S> RawTransactionSender<P, S> {
    /// Creates a new sender
    pub fn new(submit_provider: Arc<P>, signer: S, use_conditional_rpc: bool) -> Self {
        Self {
            submit_provider,
            signer,
            use_conditional_rpc,
        }
    }
}

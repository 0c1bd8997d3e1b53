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

use std::marker::PhantomData;

use aa_bundler_types::StorageMap;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::Provider as AlloyProvider;
use alloy_rpc_types_eth::{BlockId, BlockTransactionsKind, Filter, Log};
use alloy_transport::Transport;
use anyhow::Context;
use serde::Serialize;

use crate::{EvmProvider, FeeData, ProviderResult};

/// Evm Provider implementation using [alloy-provider](https://github.com/alloy-rs/alloy-rs)
pub struct AlloyEvmProvider<AP, T> {
    inner: AP,
    _marker: PhantomData<T>,
}

impl<AP, T> AlloyEvmProvider<AP, T> {
    /// Create a new `AlloyEvmProvider`
    pub fn new(inner: AP) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<AP: Clone, T> Clone for AlloyEvmProvider<AP, T> {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

/// Room for the base fee to double before the transaction is underpriced
fn max_fee_per_gas(base_fee: u64, priority_fee: u128) -> u128 {
    u128::from(base_fee)
        .saturating_mul(2)
        .saturating_add(priority_fee)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConditionalOptions {
    known_accounts: StorageMap,
}

#[async_trait::async_trait]
impl<AP, T> EvmProvider for AlloyEvmProvider<AP, T>
where
    T: Transport + Clone,
    AP: AlloyProvider<T>,
{
    async fn get_block_number(&self) -> ProviderResult<u64> {
        Ok(self.inner.get_block_number().await?)
    }

    async fn get_balance(&self, address: Address, block: Option<BlockId>) -> ProviderResult<U256> {
        let mut call = self.inner.get_balance(address);
        if let Some(block) = block {
            call = call.block_id(block);
        }

        Ok(call.await?)
    }

    async fn get_transaction_count(&self, address: Address) -> ProviderResult<u64> {
        Ok(self.inner.get_transaction_count(address).await?)
    }

    async fn get_logs(&self, filter: &Filter) -> ProviderResult<Vec<Log>> {
        Ok(self.inner.get_logs(filter).await?)
    }

    async fn get_fee_data(&self) -> ProviderResult<FeeData> {
        let latest = self
            .inner
            .get_block(BlockId::latest(), BlockTransactionsKind::Hashes)
            .await?
            .context("latest block should exist")?;
        let Some(base_fee) = latest.header.base_fee_per_gas else {
            return Ok(FeeData::default());
        };
        let priority_fee = self.inner.get_max_priority_fee_per_gas().await?;

        Ok(FeeData {
            max_fee_per_gas: Some(max_fee_per_gas(base_fee, priority_fee)),
            max_priority_fee_per_gas: Some(priority_fee),
        })
    }

    async fn get_storage_root(&self, address: Address) -> ProviderResult<B256> {
        let proof = self.inner.get_proof(address, vec![]).await?;
        Ok(proof.storage_hash)
    }

    async fn send_raw_transaction(&self, tx: Bytes) -> ProviderResult<B256> {
        let pending = self.inner.send_raw_transaction(&tx).await?;
        Ok(*pending.tx_hash())
    }

    async fn send_raw_transaction_conditional(
        &self,
        tx: Bytes,
        known_accounts: StorageMap,
    ) -> ProviderResult<B256> {
        Ok(self
            .inner
            .raw_request(
                "eth_sendRawTransactionConditional".into(),
                (tx, ConditionalOptions { known_accounts }),
            )
            .await?)
    }
}

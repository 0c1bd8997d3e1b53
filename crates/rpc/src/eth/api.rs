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

use aa_bundler_builder::BundlerHandle;
use aa_bundler_types::UserOperation;
use alloy_primitives::{Address, B256, U64};
use async_trait::async_trait;
use jsonrpsee::core::RpcResult;

use super::{EthApiServer, EthRpcError};
use crate::utils::{self, InternalRpcResult};

pub(crate) struct EthApi<H> {
    handle: Arc<H>,
}

impl<H> EthApi<H> {
    pub(crate) fn new(handle: Arc<H>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl<H> EthApiServer for EthApi<H>
where
    H: BundlerHandle,
{
    async fn send_user_operation(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> RpcResult<B256> {
        utils::safe_call_rpc_handler(
            "eth_sendUserOperation",
            EthApi::send_user_operation(self, op, entry_point),
        )
        .await
    }

    async fn supported_entry_points(&self) -> RpcResult<Vec<String>> {
        utils::safe_call_rpc_handler(
            "eth_supportedEntryPoints",
            EthApi::supported_entry_points(self),
        )
        .await
    }

    async fn chain_id(&self) -> RpcResult<U64> {
        utils::safe_call_rpc_handler("eth_chainId", EthApi::chain_id(self)).await
    }
}

impl<H> EthApi<H>
where
    H: BundlerHandle,
{
    async fn send_user_operation(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> Result<B256, EthRpcError> {
        tracing::debug!("Received user operation from sender {}", op.sender);
        Ok(self.handle.send_user_operation(op, entry_point).await?)
    }

    async fn supported_entry_points(&self) -> InternalRpcResult<Vec<String>> {
        Ok(self
            .handle
            .supported_entry_points()
            .into_iter()
            .map(|ep| ep.to_checksum(None))
            .collect())
    }

    async fn chain_id(&self) -> InternalRpcResult<U64> {
        Ok(U64::from(self.handle.chain_id()))
    }
}

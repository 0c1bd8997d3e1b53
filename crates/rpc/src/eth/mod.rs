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

mod api;
pub(crate) use api::EthApi;

mod error;
pub(crate) use error::EthRpcError;

use aa_bundler_types::UserOperation;
use alloy_primitives::{Address, B256, U64};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};

/// Eth API
#[rpc(client, server, namespace = "eth")]
pub trait EthApi {
    /// Validates a user operation and adds it to the mempool, returning its hash.
    #[method(name = "sendUserOperation")]
    async fn send_user_operation(&self, op: UserOperation, entry_point: Address)
        -> RpcResult<B256>;

    /// Returns the supported entry points addresses
    #[method(name = "supportedEntryPoints")]
    async fn supported_entry_points(&self) -> RpcResult<Vec<String>>;

    /// Returns the chain ID
    #[method(name = "chainId")]
    async fn chain_id(&self) -> RpcResult<U64>;
}

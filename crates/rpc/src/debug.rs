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
use aa_bundler_types::{BundlingMode, Reputation, ReputationEntry, SendBundleResult, UserOperation};
use alloy_primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use jsonrpsee::{
    core::RpcResult,
    proc_macros::rpc,
    types::{error::INVALID_PARAMS_CODE, ErrorObjectOwned},
};

use crate::{
    error::rpc_err,
    utils::{self, InternalRpcError},
};

/// Debug API
#[rpc(client, server, namespace = "debug")]
pub trait DebugApi {
    /// Clears the mempool and all reputation.
    #[method(name = "bundler_clearState")]
    async fn bundler_clear_state(&self) -> RpcResult<String>;

    /// Clears the state of the mempool without affect reputations.
    #[method(name = "bundler_clearMempool")]
    async fn bundler_clear_mempool(&self) -> RpcResult<String>;

    /// Dumps the mempool.
    #[method(name = "bundler_dumpMempool")]
    async fn bundler_dump_mempool(&self, entry_point: Address) -> RpcResult<Vec<UserOperation>>;

    /// Builds and sends a bundle now, regardless of the bundling mode.
    ///
    /// Returns `null` when no bundle was sent.
    #[method(name = "bundler_sendBundleNow")]
    async fn bundler_send_bundle_now(&self) -> RpcResult<Option<SendBundleResult>>;

    /// Sets the bundling mode.
    #[method(name = "bundler_setBundlingMode")]
    async fn bundler_set_bundling_mode(&self, mode: BundlingMode) -> RpcResult<String>;

    /// Sets the reputations of entities on the given entry point.
    #[method(name = "bundler_setReputation")]
    async fn bundler_set_reputation(
        &self,
        reputations: Vec<ReputationEntry>,
        entry_point: Address,
    ) -> RpcResult<String>;

    /// Dumps the reputations of entities from the given entry point.
    #[method(name = "bundler_dumpReputation")]
    async fn bundler_dump_reputation(&self, entry_point: Address) -> RpcResult<Vec<Reputation>>;
}

pub(crate) struct DebugApi<H> {
    handle: Arc<H>,
}

impl<H> DebugApi<H> {
    pub(crate) fn new(handle: Arc<H>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl<H> DebugApiServer for DebugApi<H>
where
    H: BundlerHandle,
{
    async fn bundler_clear_state(&self) -> RpcResult<String> {
        utils::safe_call_rpc_handler("bundler_clearState", DebugApi::bundler_clear_state(self))
            .await
    }

    async fn bundler_clear_mempool(&self) -> RpcResult<String> {
        utils::safe_call_rpc_handler(
            "bundler_clearMempool",
            DebugApi::bundler_clear_mempool(self),
        )
        .await
    }

    async fn bundler_dump_mempool(&self, entry_point: Address) -> RpcResult<Vec<UserOperation>> {
        utils::safe_call_rpc_handler(
            "bundler_dumpMempool",
            DebugApi::bundler_dump_mempool(self, entry_point),
        )
        .await
    }

    async fn bundler_send_bundle_now(&self) -> RpcResult<Option<SendBundleResult>> {
        utils::safe_call_rpc_handler(
            "bundler_sendBundleNow",
            DebugApi::bundler_send_bundle_now(self),
        )
        .await
    }

    async fn bundler_set_bundling_mode(&self, mode: BundlingMode) -> RpcResult<String> {
        utils::safe_call_rpc_handler(
            "bundler_setBundlingMode",
            DebugApi::bundler_set_bundling_mode(self, mode),
        )
        .await
    }

    async fn bundler_set_reputation(
        &self,
        reputations: Vec<ReputationEntry>,
        entry_point: Address,
    ) -> RpcResult<String> {
        utils::safe_call_rpc_handler(
            "bundler_setReputation",
            DebugApi::bundler_set_reputation(self, reputations, entry_point),
        )
        .await
    }

    async fn bundler_dump_reputation(&self, entry_point: Address) -> RpcResult<Vec<Reputation>> {
        utils::safe_call_rpc_handler(
            "bundler_dumpReputation",
            DebugApi::bundler_dump_reputation(self, entry_point),
        )
        .await
    }
}

impl<H> DebugApi<H>
where
    H: BundlerHandle,
{
    fn check_entry_point(&self, entry_point: Address) -> Result<(), ErrorObjectOwned> {
        if self.handle.supported_entry_points().contains(&entry_point) {
            Ok(())
        } else {
            Err(rpc_err(
                INVALID_PARAMS_CODE,
                format!("entry point {entry_point} is not supported"),
            ))
        }
    }

    async fn bundler_clear_state(&self) -> RpcResult<String> {
        self.handle.clear_state();
        Ok("ok".to_string())
    }

    async fn bundler_clear_mempool(&self) -> RpcResult<String> {
        self.handle.clear_mempool();
        Ok("ok".to_string())
    }

    async fn bundler_dump_mempool(&self, entry_point: Address) -> RpcResult<Vec<UserOperation>> {
        self.check_entry_point(entry_point)?;
        Ok(self.handle.dump_mempool())
    }

    async fn bundler_send_bundle_now(&self) -> RpcResult<Option<SendBundleResult>> {
        tracing::debug!("Sending bundle");
        self.handle
            .send_bundle_now()
            .await
            .context("should send bundle")
            .map_err(|e| {
                tracing::error!("Error sending bundle {e:?}");
                InternalRpcError::from(e).into()
            })
    }

    async fn bundler_set_bundling_mode(&self, mode: BundlingMode) -> RpcResult<String> {
        tracing::debug!("Setting bundling mode to {:?}", mode);
        self.handle.set_bundling_mode(mode);
        Ok("ok".to_string())
    }

    async fn bundler_set_reputation(
        &self,
        reputations: Vec<ReputationEntry>,
        entry_point: Address,
    ) -> RpcResult<String> {
        self.check_entry_point(entry_point)?;
        self.handle.set_reputation(reputations);
        Ok("ok".to_string())
    }

    async fn bundler_dump_reputation(&self, entry_point: Address) -> RpcResult<Vec<Reputation>> {
        self.check_entry_point(entry_point)?;
        Ok(self.handle.dump_reputation())
    }
}

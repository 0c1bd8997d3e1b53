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

use std::{net::SocketAddr, sync::Arc};

use aa_bundler_builder::BundlerHandle;
use anyhow::Context;
use jsonrpsee::{
    server::{ServerBuilder, ServerHandle},
    RpcModule,
};
use tracing::info;

use crate::{
    debug::{DebugApi, DebugApiServer},
    eth::{EthApi, EthApiServer},
};

/// RPC server arguments.
#[derive(Debug, Clone)]
pub struct Args {
    /// Host to listen on.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable the `debug_bundler` namespace.
    pub debug_api: bool,
    /// Max number of connections.
    pub max_connections: u32,
}

/// JSON-RPC server over HTTP
pub struct RpcServer<H> {
    args: Args,
    handle: Arc<H>,
}

impl<H> RpcServer<H>
where
    H: BundlerHandle,
{
    /// Creates a new RPC server
    pub fn new(args: Args, handle: Arc<H>) -> Self {
        Self { args, handle }
    }

    /// Binds the listening socket and starts serving.
    ///
    /// The server runs until the returned handle is stopped or dropped.
    pub async fn start(self) -> anyhow::Result<ServerHandle> {
        let addr: SocketAddr = format!("{}:{}", self.args.host, self.args.port)
            .parse()
            .context("rpc host and port should form a socket address")?;
        info!("Starting rpc server on {}", addr);

        let module = self.module()?;
        let server = ServerBuilder::default()
            .max_connections(self.args.max_connections)
            .http_only()
            .build(addr)
            .await
            .context("should bind rpc server")?;

        Ok(server.start(module))
    }

    fn module(&self) -> anyhow::Result<RpcModule<()>> {
        let mut module = RpcModule::new(());
        module.merge(EthApi::new(Arc::clone(&self.handle)).into_rpc())?;
        if self.args.debug_api {
            module.merge(DebugApi::new(Arc::clone(&self.handle)).into_rpc())?;
        }
        Ok(module)
    }
}

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

use std::time::Duration;

use alloy_provider::{Provider as AlloyProvider, ProviderBuilder};
use alloy_rpc_client::ClientBuilder;
use alloy_transport_http::Http;
use anyhow::Context;
use reqwest::Client;
use url::Url;

use self::metrics::{NodeRpcMetricLayer, NodeRpcMetricService};

pub(crate) mod entry_point;
pub(crate) mod evm;
pub(crate) mod metrics;

/// Transport used by every provider created here
pub type NodeTransport = NodeRpcMetricService<Http<Client>>;

/// Create a new alloy provider from a given RPC URL
pub fn new_alloy_provider(
    rpc_url: &str,
    client_timeout: Duration,
) -> anyhow::Result<impl AlloyProvider<NodeTransport> + Clone> {
    let url = Url::parse(rpc_url).context("invalid rpc url")?;
    let http_client = Client::builder()
        .timeout(client_timeout)
        .build()
        .context("should build http client")?;
    let is_local = url
        .host_str()
        .is_some_and(|host| host == "localhost" || host == "127.0.0.1");
    let client = ClientBuilder::default()
        .layer(NodeRpcMetricLayer)
        .transport(Http::with_client(http_client, url), is_local);
    Ok(ProviderBuilder::new().on_client(client))
}

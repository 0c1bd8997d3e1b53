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

use std::net::SocketAddr;

use itertools::Itertools;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::layers::{PrefixLayer, Stack};

pub fn initialize<'a>(
    listen_addr: SocketAddr,
    tags: impl IntoIterator<Item = &'a String>,
) -> anyhow::Result<()> {
    let mut builder = PrometheusBuilder::new().with_http_listener(listen_addr);

    for (k, v) in parse_tags(tags) {
        builder = builder.add_global_label(k, v);
    }

    let (recorder, exporter) = builder.build()?;
    tokio::spawn(async move {
        if exporter.await.is_err() {
            tracing::error!("metrics exporter failed");
        }
    });
    Stack::new(recorder)
        .push(PrefixLayer::new("aa_bundler"))
        .install()?;

    Ok(())
}

/// `key=value` pairs, anything else is ignored
fn parse_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Vec<(&'a str, &'a str)> {
    tags.into_iter()
        .filter_map(|t| t.split('=').collect_tuple())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_key_value_pairs() {
        let tags = vec![
            "env=dev".to_string(),
            "malformed".to_string(),
            "a=b=c".to_string(),
            "region=us".to_string(),
        ];
        assert_eq!(parse_tags(&tags), vec![("env", "dev"), ("region", "us")]);
    }
}

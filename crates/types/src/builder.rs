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

use alloy_primitives::B256;
use parse_display::Display;
use serde::{Deserialize, Serialize};

/// Builder bundling mode
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BundlingMode {
    /// Manual bundling mode for debugging.
    ///
    /// Bundles will only be sent when `debug_bundler_sendBundleNow` is called.
    Manual,
    /// Auto bundling mode for normal operation.
    ///
    /// Bundles are sent on the configured interval and mempool size.
    Auto,
}

/// Outcome of a successfully submitted bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBundleResult {
    /// Hash of the `handleOps` transaction
    pub transaction_hash: B256,
    /// Hashes of the user operations in the bundle, in bundle order
    pub user_op_hashes: Vec<B256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundling_mode_serde() {
        assert_eq!(
            serde_json::from_str::<BundlingMode>("\"manual\"").unwrap(),
            BundlingMode::Manual
        );
        assert_eq!(serde_json::to_string(&BundlingMode::Auto).unwrap(), "\"auto\"");
        assert!(serde_json::from_str::<BundlingMode>("\"sometimes\"").is_err());
    }
}

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

use aa_bundler_types::{MempoolResult, ReferencedCodeHashes, UserOperation, ValidationOutput};
use alloy_primitives::U256;
#[cfg(feature = "test-utils")]
use mockall::automock;

mod unsafe_sim;
pub use unsafe_sim::UnsafeValidator;

/// Validates user operations against the chain
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait::async_trait]
pub trait Validator: Send + Sync + 'static {
    /// Validate an operation.
    ///
    /// `expected_code_hashes` are the contracts referenced when the operation was
    /// first validated. Stake requirements are only enforced with `check_stakes`,
    /// as stake cannot decrease between admission and bundling.
    async fn validate_user_op(
        &self,
        op: &UserOperation,
        expected_code_hashes: Option<ReferencedCodeHashes>,
        check_stakes: bool,
    ) -> MempoolResult<ValidationOutput>;
}

/// Validation settings
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Minimum stake, in wei, of a staked entity
    pub min_stake_value: U256,
    /// Minimum unstake delay, in seconds, of a staked entity
    pub min_unstake_delay: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_stake_value: U256::from(10).pow(U256::from(18)),
            min_unstake_delay: 86400,
        }
    }
}

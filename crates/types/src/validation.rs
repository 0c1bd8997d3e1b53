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

use aa_bundler_contracts::v0_6::{
    ReturnInfo as ContractReturnInfo, StakeInfo as ContractStakeInfo,
};
use alloy_primitives::{Address, Bytes, B256, U256};

use crate::StorageMap;

/// Stake of an entity as reported by the entry point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakeInfo {
    /// Address of the entity
    pub address: Address,
    /// Staked amount in wei
    pub stake: U256,
    /// Unstake delay in seconds
    pub unstake_delay_sec: u32,
}

impl StakeInfo {
    /// Attach an address to the stake reported by simulation
    pub fn from_contract(address: Address, info: ContractStakeInfo) -> Self {
        Self {
            address,
            stake: info.stake,
            unstake_delay_sec: info.unstakeDelaySec.saturating_to::<u32>(),
        }
    }
}

/// Stake of every entity taking part in an operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityInfos {
    /// The sender
    pub sender: StakeInfo,
    /// The paymaster, if any
    pub paymaster: Option<StakeInfo>,
    /// The factory, if any
    pub factory: Option<StakeInfo>,
    /// The signature aggregator, if any
    pub aggregator: Option<StakeInfo>,
}

/// Gas and time facts returned by validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnInfo {
    /// Gas used by validation plus pre-verification gas
    pub pre_op_gas: U256,
    /// Amount the sender or paymaster must have deposited
    pub prefund: U256,
    /// Whether the account signature check failed
    pub sig_failed: bool,
    /// Earliest timestamp the operation is valid at
    pub valid_after: u64,
    /// Latest timestamp the operation is valid at, 0 for no limit
    pub valid_until: u64,
    /// Context returned by the paymaster's validation
    pub paymaster_context: Bytes,
}

impl From<ContractReturnInfo> for ReturnInfo {
    fn from(info: ContractReturnInfo) -> Self {
        Self {
            pre_op_gas: info.preOpGas,
            prefund: info.prefund,
            sig_failed: info.sigFailed,
            valid_after: info.validAfter.to::<u64>(),
            valid_until: info.validUntil.to::<u64>(),
            paymaster_context: info.paymasterContext,
        }
    }
}

/// Contracts referenced during validation, used to detect code changes between
/// admission and bundling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencedCodeHashes {
    /// Addresses of the referenced contracts
    pub addresses: Vec<Address>,
    /// Hash over their code
    pub hash: B256,
}

/// Everything the bundler needs to know about a validated operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutput {
    /// Gas and prefund facts
    pub return_info: ReturnInfo,
    /// Stake of the participating entities
    pub entity_infos: EntityInfos,
    /// Storage read during validation
    pub storage_map: StorageMap,
    /// Contracts whose code was referenced
    pub referenced_contracts: ReferencedCodeHashes,
}

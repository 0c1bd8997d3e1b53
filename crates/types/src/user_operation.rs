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

use aa_bundler_contracts::v0_6::UserOperation as ContractUserOperation;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::Entity;

/// A v0.6 ERC-4337 user operation.
///
/// Never mutated once admitted to the mempool: a resubmission with the same
/// sender and nonce replaces the whole value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    /// The account making the operation
    pub sender: Address,
    /// Anti-replay nonce
    pub nonce: U256,
    /// Factory address followed by its calldata, empty for deployed accounts
    pub init_code: Bytes,
    /// Calldata for the main execution call
    pub call_data: Bytes,
    /// Gas allocated for the main execution call
    pub call_gas_limit: U256,
    /// Gas allocated for verification
    pub verification_gas_limit: U256,
    /// Gas paid to compensate the bundler for pre-verification execution and calldata
    pub pre_verification_gas: U256,
    /// EIP-1559 max fee per gas
    pub max_fee_per_gas: U256,
    /// EIP-1559 max priority fee per gas
    pub max_priority_fee_per_gas: U256,
    /// Paymaster address followed by its data, empty when self-sponsored
    pub paymaster_and_data: Bytes,
    /// Signature over the operation hash
    pub signature: Bytes,
}

/// Unique identifier of a user operation in the mempool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserOperationId {
    /// Sender of the operation
    pub sender: Address,
    /// Nonce of the operation
    pub nonce: U256,
}

impl UserOperation {
    /// Hash of the operation as computed by `EntryPoint.getUserOpHash`
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> B256 {
        keccak256(
            (
                keccak256(self.pack_for_hash()),
                entry_point,
                U256::from(chain_id),
            )
                .abi_encode(),
        )
    }

    /// The (sender, nonce) pair identifying this operation
    pub fn id(&self) -> UserOperationId {
        UserOperationId {
            sender: self.sender,
            nonce: self.nonce,
        }
    }

    /// Factory address encoded in the first 20 bytes of `init_code`
    pub fn factory(&self) -> Option<Address> {
        extract_address(&self.init_code)
    }

    /// Paymaster address encoded in the first 20 bytes of `paymaster_and_data`
    pub fn paymaster(&self) -> Option<Address> {
        extract_address(&self.paymaster_and_data)
    }

    /// True when the operation deploys its sender
    pub fn has_init_code(&self) -> bool {
        !self.init_code.is_empty()
    }

    /// Entities that are tracked in the mempool entry counts: the sender, and
    /// the paymaster and factory when present
    pub fn entities(&self) -> impl Iterator<Item = Entity> {
        [
            Some(Entity::account(self.sender)),
            self.paymaster().map(Entity::paymaster),
            self.factory().map(Entity::factory),
        ]
        .into_iter()
        .flatten()
    }

    fn pack_for_hash(&self) -> Vec<u8> {
        let hash_init_code = keccak256(&self.init_code);
        let hash_call_data = keccak256(&self.call_data);
        let hash_paymaster_and_data = keccak256(&self.paymaster_and_data);

        (
            self.sender,
            self.nonce,
            hash_init_code,
            hash_call_data,
            self.call_gas_limit,
            self.verification_gas_limit,
            self.pre_verification_gas,
            self.max_fee_per_gas,
            self.max_priority_fee_per_gas,
            hash_paymaster_and_data,
        )
            .abi_encode()
    }
}

/// Reads the address packed into the first 20 bytes of a field.
///
/// Fields shorter than an address carry no address.
pub fn extract_address(field: &[u8]) -> Option<Address> {
    if field.len() < Address::len_bytes() {
        None
    } else {
        Some(Address::from_slice(&field[..Address::len_bytes()]))
    }
}

impl From<UserOperation> for ContractUserOperation {
    fn from(op: UserOperation) -> Self {
        ContractUserOperation {
            sender: op.sender,
            nonce: op.nonce,
            initCode: op.init_code,
            callData: op.call_data,
            callGasLimit: op.call_gas_limit,
            verificationGasLimit: op.verification_gas_limit,
            preVerificationGas: op.pre_verification_gas,
            maxFeePerGas: op.max_fee_per_gas,
            maxPriorityFeePerGas: op.max_priority_fee_per_gas,
            paymasterAndData: op.paymaster_and_data,
            signature: op.signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, bytes};

    use super::*;
    use crate::EntityType;

    #[test]
    fn test_hash_zeroed() {
        // Hash returned by getUserOpHash() on an entry point at
        // 0x66a15edcc3b50a663e72f1457ffd49b9ae284ddc with chain ID 1337.
        let operation = UserOperation::default();
        let entry_point = address!("66a15edcc3b50a663e72f1457ffd49b9ae284ddc");
        let hash = operation.hash(entry_point, 1337);
        assert_eq!(
            hash,
            b256!("dca97c3b49558ab360659f6ead939773be8bf26631e61bb17045bb70dc983b2d")
        );
    }

    #[test]
    fn test_hash_depends_on_chain_and_entry_point() {
        let operation = UserOperation {
            sender: Address::repeat_byte(1),
            nonce: U256::from(7),
            ..Default::default()
        };
        let entry_point = Address::repeat_byte(2);
        let hash = operation.hash(entry_point, 1);
        assert_ne!(hash, operation.hash(entry_point, 2));
        assert_ne!(hash, operation.hash(Address::repeat_byte(3), 1));
    }

    #[test]
    fn test_extract_address() {
        let paymaster_and_data =
            bytes!("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef");
        assert_eq!(
            extract_address(&paymaster_and_data),
            Some(address!("0123456789abcdef0123456789abcdef01234567"))
        );
        assert_eq!(extract_address(&[]), None);
        assert_eq!(extract_address(&[0xab; 19]), None);
        assert_eq!(
            extract_address(&[0xab; 20]),
            Some(Address::repeat_byte(0xab))
        );
    }

    #[test]
    fn test_entities() {
        let sender = Address::repeat_byte(1);
        let paymaster = Address::repeat_byte(2);
        let op = UserOperation {
            sender,
            paymaster_and_data: paymaster.to_vec().into(),
            ..Default::default()
        };
        let entities: Vec<_> = op.entities().collect();
        assert_eq!(
            entities,
            vec![Entity::account(sender), Entity::paymaster(paymaster)]
        );
        assert!(!entities.iter().any(|e| e.kind == EntityType::Factory));
    }

    #[test]
    fn test_deserialize_rpc_shape() {
        let json = serde_json::json!({
            "sender": "0x1306b01bc3e4ad202612d3843387e94737673f53",
            "nonce": "0x22ee",
            "initCode": "0x",
            "callData": "0x",
            "callGasLimit": "0x2710",
            "verificationGasLimit": "0x186a0",
            "preVerificationGas": "0x64",
            "maxFeePerGas": "0x1869f",
            "maxPriorityFeePerGas": "0x98967f",
            "paymasterAndData": "0x",
            "signature": "0x"
        });
        let op: UserOperation = serde_json::from_value(json).unwrap();
        assert_eq!(op.nonce, U256::from(8942));
        assert_eq!(op.max_priority_fee_per_gas, U256::from(9999999));
        assert_eq!(op.factory(), None);
    }
}

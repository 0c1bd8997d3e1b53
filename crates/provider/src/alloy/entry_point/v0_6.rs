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
    IEntryPoint::{
        FailedOp, IEntryPointErrors, IEntryPointInstance, ValidationResult,
        ValidationResultWithAggregation,
    },
    StakeInfo as ContractStakeInfo,
};
use aa_bundler_types::{EntityInfos, GasFees, StakeInfo, UserOperation, ValidationOutput};
use alloy_contract::Error as ContractError;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::Provider as AlloyProvider;
use alloy_rpc_types_eth::TransactionRequest;
use alloy_sol_types::{ContractError as SolContractError, SolError};
use alloy_transport::{Transport, TransportError};
use anyhow::anyhow;

use crate::{EntryPoint, ProviderResult, ValidationRevert};

/// Entry point provider for v0.6
pub struct EntryPointProvider<AP, T> {
    i_entry_point: IEntryPointInstance<T, AP>,
}

impl<AP, T> EntryPointProvider<AP, T>
where
    T: Transport + Clone,
    AP: AlloyProvider<T>,
{
    /// Create a new `EntryPoint` instance for v0.6
    pub fn new(entry_point_address: Address, provider: AP) -> Self {
        Self {
            i_entry_point: IEntryPointInstance::new(entry_point_address, provider),
        }
    }
}

#[async_trait::async_trait]
impl<AP, T> EntryPoint for EntryPointProvider<AP, T>
where
    T: Transport + Clone,
    AP: AlloyProvider<T> + 'static,
{
    fn address(&self) -> Address {
        *self.i_entry_point.address()
    }

    async fn balance_of(&self, address: Address) -> ProviderResult<U256> {
        Ok(self.i_entry_point.balanceOf(address).call().await?._0)
    }

    async fn get_user_op_hash(&self, op: UserOperation) -> ProviderResult<B256> {
        Ok(self.i_entry_point.getUserOpHash(op.into()).call().await?._0)
    }

    async fn simulate_validation(
        &self,
        op: UserOperation,
    ) -> ProviderResult<Result<ValidationOutput, ValidationRevert>> {
        let result = self
            .i_entry_point
            .simulateValidation(op.clone().into())
            .call()
            .await;

        match result {
            Ok(_) => Err(anyhow!("simulateValidation should always revert").into()),
            Err(ContractError::TransportError(TransportError::ErrorResp(resp))) => {
                if let Some(err) =
                    resp.as_decoded_error::<SolContractError<IEntryPointErrors>>(false)
                {
                    match err {
                        // success cases
                        SolContractError::CustomError(IEntryPointErrors::ValidationResult(r)) => {
                            Ok(Ok(validation_output(&op, r)))
                        }
                        SolContractError::CustomError(
                            IEntryPointErrors::ValidationResultWithAggregation(r),
                        ) => Ok(Ok(aggregated_validation_output(&op, r))),
                        // failure cases
                        SolContractError::CustomError(IEntryPointErrors::FailedOp(f)) => {
                            Ok(Err(ValidationRevert::FailedOp {
                                op_index: f.opIndex.saturating_to(),
                                reason: f.reason,
                            }))
                        }
                        SolContractError::Revert(r) => Ok(Err(ValidationRevert::Revert(r.reason))),
                        _ => Err(TransportError::ErrorResp(resp).into()),
                    }
                } else if let Some(data) = resp.as_revert_data() {
                    Ok(Err(ValidationRevert::Unknown(data)))
                } else {
                    Err(TransportError::ErrorResp(resp).into())
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    fn get_send_bundle_transaction(
        &self,
        ops: Vec<UserOperation>,
        beneficiary: Address,
        gas: u64,
        gas_fees: GasFees,
    ) -> TransactionRequest {
        self.i_entry_point
            .handleOps(ops.into_iter().map(Into::into).collect(), beneficiary)
            .gas(gas.into())
            .into_transaction_request()
            .max_fee_per_gas(gas_fees.max_fee_per_gas)
            .max_priority_fee_per_gas(gas_fees.max_priority_fee_per_gas)
    }
}

/// Decode `FailedOp(opIndex, reason)` revert data into the operation index and reason
pub fn decode_failed_op(revert_data: &[u8]) -> Option<(usize, String)> {
    FailedOp::abi_decode(revert_data, true)
        .ok()
        .map(|f| (f.opIndex.saturating_to(), f.reason))
}

fn entity_infos(
    op: &UserOperation,
    sender: ContractStakeInfo,
    factory: ContractStakeInfo,
    paymaster: ContractStakeInfo,
) -> EntityInfos {
    EntityInfos {
        sender: StakeInfo::from_contract(op.sender, sender),
        factory: op
            .factory()
            .map(|address| StakeInfo::from_contract(address, factory)),
        paymaster: op
            .paymaster()
            .map(|address| StakeInfo::from_contract(address, paymaster)),
        aggregator: None,
    }
}

fn validation_output(op: &UserOperation, r: ValidationResult) -> ValidationOutput {
    ValidationOutput {
        return_info: r.returnInfo.into(),
        entity_infos: entity_infos(op, r.senderInfo, r.factoryInfo, r.paymasterInfo),
        ..Default::default()
    }
}

fn aggregated_validation_output(
    op: &UserOperation,
    r: ValidationResultWithAggregation,
) -> ValidationOutput {
    let mut entity_infos = entity_infos(op, r.senderInfo, r.factoryInfo, r.paymasterInfo);
    entity_infos.aggregator = Some(StakeInfo::from_contract(
        r.aggregatorInfo.aggregator,
        r.aggregatorInfo.stakeInfo,
    ));
    ValidationOutput {
        return_info: r.returnInfo.into(),
        entity_infos,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use aa_bundler_contracts::v0_6::{AggregatorStakeInfo, ReturnInfo};
    use alloy_primitives::{aliases::U48, Bytes};

    use super::*;

    fn stake(stake: u64, delay: u64) -> ContractStakeInfo {
        ContractStakeInfo {
            stake: U256::from(stake),
            unstakeDelaySec: U256::from(delay),
        }
    }

    #[test]
    fn decodes_failed_op() {
        let data = FailedOp {
            opIndex: U256::from(2),
            reason: "AA21 didn't pay prefund".to_string(),
        }
        .abi_encode();
        assert_eq!(
            decode_failed_op(&data),
            Some((2, "AA21 didn't pay prefund".to_string()))
        );
    }

    #[test]
    fn rejects_other_revert_data() {
        assert_eq!(decode_failed_op(&[]), None);
        assert_eq!(decode_failed_op(&[0xde, 0xad, 0xbe, 0xef]), None);
    }

    #[test]
    fn validation_result_attaches_addresses() {
        let paymaster = Address::repeat_byte(0x22);
        let op = UserOperation {
            sender: Address::repeat_byte(0x11),
            paymaster_and_data: Bytes::from(paymaster.to_vec()),
            ..Default::default()
        };
        let result = ValidationResult {
            returnInfo: ReturnInfo {
                preOpGas: U256::from(50_000),
                prefund: U256::from(1_000),
                sigFailed: false,
                validAfter: U48::from(5),
                validUntil: U48::ZERO,
                paymasterContext: Bytes::new(),
            },
            senderInfo: stake(0, 0),
            factoryInfo: stake(0, 0),
            paymasterInfo: stake(100, 86400),
        };

        let output = validation_output(&op, result);
        assert_eq!(output.return_info.pre_op_gas, U256::from(50_000));
        assert_eq!(output.return_info.valid_after, 5);
        assert_eq!(output.entity_infos.sender.address, op.sender);
        assert_eq!(output.entity_infos.factory, None);
        let paymaster_info = output.entity_infos.paymaster.unwrap();
        assert_eq!(paymaster_info.address, paymaster);
        assert_eq!(paymaster_info.stake, U256::from(100));
        assert_eq!(paymaster_info.unstake_delay_sec, 86400);
        assert!(output.storage_map.is_empty());
    }

    #[test]
    fn aggregated_result_reports_aggregator() {
        let op = UserOperation::default();
        let result = ValidationResultWithAggregation {
            returnInfo: ReturnInfo::default(),
            senderInfo: stake(0, 0),
            factoryInfo: stake(0, 0),
            paymasterInfo: stake(0, 0),
            aggregatorInfo: AggregatorStakeInfo {
                aggregator: Address::repeat_byte(0x33),
                stakeInfo: stake(1, 1),
            },
        };
        let output = aggregated_validation_output(&op, result);
        assert_eq!(
            output.entity_infos.aggregator.map(|a| a.address),
            Some(Address::repeat_byte(0x33))
        );
    }
}

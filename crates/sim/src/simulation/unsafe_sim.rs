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

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use aa_bundler_provider::{EntryPoint, ValidationRevert};
use aa_bundler_types::{
    MempoolError, MempoolResult, ReferencedCodeHashes, ReturnInfo, UserOperation,
    ValidationOutput,
};

use super::{Settings, Validator};

/// Operations expiring within this many seconds are rejected
const VALID_UNTIL_MARGIN_SECS: u64 = 30;

/// A validator that runs `simulateValidation` without a tracer.
///
/// WARNING: This is "unsafe" for a reason. None of the ERC-7562 opcode and
/// storage rules are checked, and no storage map or referenced contracts are
/// reported.
pub struct UnsafeValidator<E> {
    entry_point: Arc<E>,
    settings: Settings,
}

impl<E> UnsafeValidator<E> {
    /// Creates a new unsafe validator
    pub fn new(entry_point: Arc<E>, settings: Settings) -> Self {
        Self {
            entry_point,
            settings,
        }
    }

    fn check_stakes(&self, output: &ValidationOutput) -> MempoolResult<()> {
        let Some(paymaster) = output.entity_infos.paymaster else {
            return Ok(());
        };
        if output.return_info.paymaster_context.is_empty() {
            return Ok(());
        }
        if paymaster.stake < self.settings.min_stake_value
            || paymaster.unstake_delay_sec < self.settings.min_unstake_delay
        {
            return Err(MempoolError::InsufficientStake(format!(
                "paymaster {} must be staked to return a context (stake={} unstakeDelaySec={})",
                paymaster.address, paymaster.stake, paymaster.unstake_delay_sec
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<E: EntryPoint> Validator for UnsafeValidator<E> {
    async fn validate_user_op(
        &self,
        op: &UserOperation,
        _expected_code_hashes: Option<ReferencedCodeHashes>,
        check_stakes: bool,
    ) -> MempoolResult<ValidationOutput> {
        tracing::debug!("Performing unsafe simulation for sender {}", op.sender);

        let output = match self
            .entry_point
            .simulate_validation(op.clone())
            .await
            .map_err(|e| MempoolError::Other(e.into()))?
        {
            Ok(output) => output,
            Err(ValidationRevert::FailedOp { reason, .. }) if reason.starts_with("AA3") => {
                return Err(MempoolError::SimulatePaymasterValidation(format!(
                    "FailedOp: {reason}"
                )));
            }
            Err(ValidationRevert::FailedOp { reason, .. }) => {
                return Err(MempoolError::SimulateValidation(format!(
                    "FailedOp: {reason}"
                )));
            }
            Err(revert) => return Err(MempoolError::SimulateValidation(revert.to_string())),
        };

        check_return_info(&output.return_info, unix_now())?;

        if let Some(aggregator) = output.entity_infos.aggregator {
            return Err(MempoolError::UnsupportedSignatureAggregator(format!(
                "Currently not supporting aggregator {}",
                aggregator.address
            )));
        }

        if check_stakes {
            self.check_stakes(&output)?;
        }

        Ok(output)
    }
}

fn check_return_info(info: &ReturnInfo, now: u64) -> MempoolResult<()> {
    if info.sig_failed {
        return Err(MempoolError::InvalidSignature(
            "Invalid UserOp signature or paymaster signature".to_string(),
        ));
    }
    if info.valid_after > now {
        return Err(MempoolError::NotInTimeRange(format!(
            "time-range in the future time {}, now={now}",
            info.valid_after
        )));
    }
    let valid_until = match info.valid_until {
        0 => u64::MAX,
        t => t,
    };
    if valid_until < now {
        return Err(MempoolError::NotInTimeRange("already expired".to_string()));
    }
    if valid_until <= now.saturating_add(VALID_UNTIL_MARGIN_SECS) {
        return Err(MempoolError::NotInTimeRange("expires too soon".to_string()));
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use aa_bundler_provider::MockEntryPoint;
    use aa_bundler_types::{EntityInfos, StakeInfo};
    use alloy_primitives::{Address, Bytes, U256};

    use super::*;

    fn settings() -> Settings {
        Settings {
            min_stake_value: U256::from(100),
            min_unstake_delay: 10,
        }
    }

    fn validator_returning(
        result: Result<ValidationOutput, ValidationRevert>,
    ) -> UnsafeValidator<MockEntryPoint> {
        let mut entry_point = MockEntryPoint::new();
        entry_point
            .expect_simulate_validation()
            .returning(move |_| Ok(result.clone()));
        UnsafeValidator::new(Arc::new(entry_point), settings())
    }

    fn output_with_paymaster(stake: u64, context: &'static [u8]) -> ValidationOutput {
        ValidationOutput {
            return_info: ReturnInfo {
                paymaster_context: Bytes::from_static(context),
                ..Default::default()
            },
            entity_infos: EntityInfos {
                paymaster: Some(StakeInfo {
                    address: Address::repeat_byte(0xaa),
                    stake: U256::from(stake),
                    unstake_delay_sec: 100,
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn paymaster_failure_is_reported_separately() {
        let validator = validator_returning(Err(ValidationRevert::FailedOp {
            op_index: 0,
            reason: "AA33 reverted".to_string(),
        }));
        let err = validator
            .validate_user_op(&UserOperation::default(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, MempoolError::SimulatePaymasterValidation(_)));

        let validator = validator_returning(Err(ValidationRevert::FailedOp {
            op_index: 0,
            reason: "AA23 reverted".to_string(),
        }));
        let err = validator
            .validate_user_op(&UserOperation::default(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, MempoolError::SimulateValidation(_)));
    }

    #[tokio::test]
    async fn unstaked_paymaster_with_context_needs_stake() {
        let validator = validator_returning(Ok(output_with_paymaster(1, b"ctx")));
        let op = UserOperation::default();

        let err = validator.validate_user_op(&op, None, true).await.unwrap_err();
        assert!(matches!(err, MempoolError::InsufficientStake(_)));

        // stake cannot decrease between admission and bundling
        validator.validate_user_op(&op, None, false).await.unwrap();
    }

    #[tokio::test]
    async fn staked_or_contextless_paymaster_passes() {
        let op = UserOperation::default();
        validator_returning(Ok(output_with_paymaster(100, b"ctx")))
            .validate_user_op(&op, None, true)
            .await
            .unwrap();
        validator_returning(Ok(output_with_paymaster(0, b"")))
            .validate_user_op(&op, None, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn aggregator_is_rejected() {
        let output = ValidationOutput {
            entity_infos: EntityInfos {
                aggregator: Some(StakeInfo::default()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validator_returning(Ok(output))
            .validate_user_op(&UserOperation::default(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, MempoolError::UnsupportedSignatureAggregator(_)));
    }

    #[test]
    fn return_info_checks() {
        let now = 1_000;
        let ok = ReturnInfo::default();
        check_return_info(&ok, now).unwrap();

        let sig_failed = ReturnInfo {
            sig_failed: true,
            ..Default::default()
        };
        assert!(matches!(
            check_return_info(&sig_failed, now),
            Err(MempoolError::InvalidSignature(_))
        ));

        for (valid_after, valid_until) in [(1_001, 0), (0, 999), (0, 1_030)] {
            let info = ReturnInfo {
                valid_after,
                valid_until,
                ..Default::default()
            };
            assert!(matches!(
                check_return_info(&info, now),
                Err(MempoolError::NotInTimeRange(_))
            ));
        }

        let info = ReturnInfo {
            valid_after: 1_000,
            valid_until: 1_031,
            ..Default::default()
        };
        check_return_info(&info, now).unwrap();
    }
}

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

use std::collections::HashMap;

use aa_bundler_types::MempoolError;
use jsonrpsee::types::{error::INTERNAL_ERROR_CODE, ErrorObjectOwned};

use crate::error::{rpc_err, rpc_err_with_data};

/// Error returned by the eth namespace
#[derive(Debug, thiserror::Error)]
pub(crate) enum EthRpcError {
    /// The operation was rejected
    #[error(transparent)]
    Rejected(#[from] MempoolError),
}

impl From<EthRpcError> for ErrorObjectOwned {
    fn from(error: EthRpcError) -> Self {
        let EthRpcError::Rejected(error) = error;
        let code = error.code();
        let msg = error.to_string();
        match error {
            MempoolError::Other(e) => {
                tracing::error!("Internal error handling user operation: {e:?}");
                rpc_err(INTERNAL_ERROR_CODE, msg)
            }
            // the offending entity is reported as `{"<role>": "<address>"}`
            MempoolError::Reputation { entity, .. } => rpc_err_with_data(
                code,
                msg,
                HashMap::from([(entity.kind.to_str(), entity.address)]),
            ),
            _ => rpc_err(code, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use aa_bundler_types::{Entity, ReputationStatus};
    use alloy_primitives::Address;

    use super::*;

    #[test]
    fn reputation_error_names_entity() {
        let error: ErrorObjectOwned = EthRpcError::from(MempoolError::Reputation {
            entity: Entity::factory(Address::repeat_byte(0xfa)),
            status: ReputationStatus::Throttled,
        })
        .into();

        assert_eq!(error.code(), -32504);
        let data: HashMap<String, Address> =
            serde_json::from_str(error.data().unwrap().get()).unwrap();
        assert_eq!(
            data,
            HashMap::from([("factory".to_string(), Address::repeat_byte(0xfa))])
        );
    }

    #[test]
    fn admission_errors_keep_their_codes() {
        let cases = [
            (MempoolError::InvalidFields("x".into()), -32602),
            (MempoolError::SimulateValidation("x".into()), -32500),
            (MempoolError::SimulatePaymasterValidation("x".into()), -32501),
            (MempoolError::OpcodeValidation("x".into()), -32502),
            (MempoolError::NotInTimeRange("x".into()), -32503),
            (MempoolError::InsufficientStake("x".into()), -32505),
            (MempoolError::UnsupportedSignatureAggregator("x".into()), -32506),
            (MempoolError::InvalidSignature("x".into()), -32507),
        ];
        for (error, code) in cases {
            let error: ErrorObjectOwned = EthRpcError::from(error).into();
            assert_eq!(error.code(), code);
            assert_eq!(error.message(), "x");
            assert!(error.data().is_none());
        }
    }

    #[test]
    fn other_errors_are_internal() {
        let error: ErrorObjectOwned =
            EthRpcError::from(MempoolError::Other(anyhow::anyhow!("node down"))).into();
        assert_eq!(error.code(), INTERNAL_ERROR_CODE);
    }
}

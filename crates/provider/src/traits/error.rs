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

use alloy_json_rpc::RpcError;
use alloy_primitives::Bytes;
use alloy_transport::TransportError;

/// JSON-RPC code returned by nodes that do not implement a method
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

/// Result of a provider call
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error enumeration for the provider traits
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The node answered with a JSON-RPC error
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Revert data, if the error carries any
        data: Option<Bytes>,
    },
    /// Contract Error
    #[error("Contract Error: {0}")]
    ContractError(String),
    /// Internal errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// JSON-RPC error code, if the node returned an error response
    pub fn code(&self) -> Option<i64> {
        match self {
            ProviderError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Revert data carried by the error response, if any
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            ProviderError::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// True if the node does not support the called method
    pub fn is_method_not_found(&self) -> bool {
        self.code() == Some(METHOD_NOT_FOUND_CODE)
    }
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        match err {
            RpcError::ErrorResp(payload) => ProviderError::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload.as_revert_data(),
            },
            other => ProviderError::Other(other.into()),
        }
    }
}

impl From<alloy_contract::Error> for ProviderError {
    fn from(err: alloy_contract::Error) -> Self {
        match err {
            alloy_contract::Error::TransportError(err) => err.into(),
            other => ProviderError::ContractError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_json_rpc::ErrorPayload;

    use super::*;

    #[test]
    fn keeps_rpc_error_code() {
        let err: ProviderError = TransportError::ErrorResp(ErrorPayload {
            code: METHOD_NOT_FOUND_CODE,
            message: "the method eth_sendRawTransactionConditional does not exist".into(),
            data: None,
        })
        .into();
        assert!(err.is_method_not_found());
        assert_eq!(err.revert_data(), None);
    }

    #[test]
    fn other_errors_have_no_code() {
        let err = ProviderError::from(anyhow::anyhow!("timeout"));
        assert_eq!(err.code(), None);
        assert!(!err.is_method_not_found());
    }
}

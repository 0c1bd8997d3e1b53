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

use crate::{Entity, ReputationStatus};

/// Result of an admission step
pub type MempoolResult<T> = Result<T, MempoolError>;

/// Reasons a user operation is rejected.
///
/// Each variant maps to an ERC-4337 JSON-RPC error code, see [`MempoolError::code`].
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// Malformed operation, or underpriced replacement
    #[error("{0}")]
    InvalidFields(String),
    /// Simulation reverted
    #[error("{0}")]
    SimulateValidation(String),
    /// Simulation reverted inside the paymaster
    #[error("{0}")]
    SimulatePaymasterValidation(String),
    /// Disallowed behavior, including one address in multiple roles
    #[error("{0}")]
    OpcodeValidation(String),
    /// The operation is not valid now, or expires too soon
    #[error("{0}")]
    NotInTimeRange(String),
    /// An entity is throttled or banned
    #[error("{entity} is {status}")]
    Reputation {
        /// The offending entity
        entity: Entity,
        /// Its status
        status: ReputationStatus,
    },
    /// An entity lacks the required stake or unstake delay
    #[error("{0}")]
    InsufficientStake(String),
    /// Signature aggregators are not supported
    #[error("{0}")]
    UnsupportedSignatureAggregator(String),
    /// The account's signature check failed
    #[error("{0}")]
    InvalidSignature(String),
    /// Some other error occurred
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MempoolError {
    /// ERC-4337 JSON-RPC error code
    pub fn code(&self) -> i32 {
        match self {
            MempoolError::InvalidFields(_) => -32602,
            MempoolError::SimulateValidation(_) => -32500,
            MempoolError::SimulatePaymasterValidation(_) => -32501,
            MempoolError::OpcodeValidation(_) => -32502,
            MempoolError::NotInTimeRange(_) => -32503,
            MempoolError::Reputation { .. } => -32504,
            MempoolError::InsufficientStake(_) => -32505,
            MempoolError::UnsupportedSignatureAggregator(_) => -32506,
            MempoolError::InvalidSignature(_) => -32507,
            MempoolError::Other(_) => -32603,
        }
    }
}

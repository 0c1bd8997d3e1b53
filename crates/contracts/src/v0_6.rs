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

//! EntryPoint v0.6 bindings, limited to what the bundler calls, decodes or watches.
//!
//! See <https://github.com/eth-infinitism/account-abstraction/tree/releases/v0.6/contracts>

use alloy_sol_macro::sol;

sol! {
    /// User operation as packed into `handleOps` calldata
    #[allow(missing_docs)]
    #[derive(Default, Debug, PartialEq, Eq)]
    struct UserOperation {
        address sender;
        uint256 nonce;
        bytes initCode;
        bytes callData;
        uint256 callGasLimit;
        uint256 verificationGasLimit;
        uint256 preVerificationGas;
        uint256 maxFeePerGas;
        uint256 maxPriorityFeePerGas;
        bytes paymasterAndData;
        bytes signature;
    }

    /// Gas and time range values returned by `simulateValidation`
    #[allow(missing_docs)]
    #[derive(Default, Debug, PartialEq, Eq)]
    struct ReturnInfo {
        uint256 preOpGas;
        uint256 prefund;
        bool sigFailed;
        uint48 validAfter;
        uint48 validUntil;
        bytes paymasterContext;
    }

    #[allow(missing_docs)]
    #[derive(Default, Debug, PartialEq, Eq)]
    struct StakeInfo {
        uint256 stake;
        uint256 unstakeDelaySec;
    }

    #[allow(missing_docs)]
    #[derive(Default, Debug, PartialEq, Eq)]
    struct AggregatorStakeInfo {
        address aggregator;
        StakeInfo stakeInfo;
    }

    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Default, Debug, PartialEq, Eq)]
    interface IEntryPoint {
        function simulateValidation(UserOperation calldata userOp) external;
        function handleOps(UserOperation[] calldata ops, address payable beneficiary);
        function getUserOpHash(UserOperation calldata userOp) external view returns (bytes32);
        function balanceOf(address account) external view returns (uint256);

        // simulateValidation always reverts, with one of these on success
        error ValidationResult(
            ReturnInfo returnInfo,
            StakeInfo senderInfo,
            StakeInfo factoryInfo,
            StakeInfo paymasterInfo
        );
        error ValidationResultWithAggregation(
            ReturnInfo returnInfo,
            StakeInfo senderInfo,
            StakeInfo factoryInfo,
            StakeInfo paymasterInfo,
            AggregatorStakeInfo aggregatorInfo
        );
        error FailedOp(uint256 opIndex, string reason);

        event UserOperationEvent(
            bytes32 indexed userOpHash,
            address indexed sender,
            address indexed paymaster,
            uint256 nonce,
            bool success,
            uint256 actualGasCost,
            uint256 actualGasUsed
        );
        event AccountDeployed(
            bytes32 indexed userOpHash,
            address indexed sender,
            address factory,
            address paymaster
        );
        event SignatureAggregatorChanged(address indexed aggregator);
    }
}

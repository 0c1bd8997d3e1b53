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

use aa_bundler_types::{MempoolError, MempoolResult, UserOperation};
use alloy_primitives::Address;

/// Checks that can be made on an operation without touching the chain.
///
/// The operation must target the configured entry point, and `initCode` and
/// `paymasterAndData` must each be empty or start with an address.
pub fn validate_input_parameters(
    op: &UserOperation,
    entry_point_input: Address,
    entry_point: Address,
) -> MempoolResult<()> {
    if entry_point_input != entry_point {
        return Err(MempoolError::InvalidFields(format!(
            "The EntryPoint at \"{entry_point_input}\" is not supported. This bundler uses {entry_point}"
        )));
    }
    check_address_prefix("initCode", &op.init_code)?;
    check_address_prefix("paymasterAndData", &op.paymaster_and_data)?;
    Ok(())
}

fn check_address_prefix(field: &str, value: &[u8]) -> MempoolResult<()> {
    if !value.is_empty() && value.len() < Address::len_bytes() {
        return Err(MempoolError::InvalidFields(format!(
            "{field}: must contain at least an address"
        )));
    }
    Ok(())
}

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

//! Math utilities

use alloy_primitives::U256;

/// True if `new` is at least `old` increased by `percent`.
///
/// Compared without division so no rounding is involved: 10 bumped by 10% needs 11,
/// and 15 bumped by 10% needs 16.5, so 16 is not enough.
pub fn is_bumped_by_percent(old: U256, new: U256, percent: u32) -> bool {
    new.saturating_mul(U256::from(100)) >= old.saturating_mul(U256::from(100 + percent))
}

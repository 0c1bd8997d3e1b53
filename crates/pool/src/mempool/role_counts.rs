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

use aa_bundler_types::EntityType;

/// How many pool entries reference an address, split by the role it plays in them.
///
/// Aggregators never appear in an operation's own fields, so they are not counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RoleCounts {
    as_sender: usize,
    as_paymaster: usize,
    as_factory: usize,
}

impl RoleCounts {
    fn slot(&mut self, role: &EntityType) -> Option<&mut usize> {
        match role {
            EntityType::Account => Some(&mut self.as_sender),
            EntityType::Paymaster => Some(&mut self.as_paymaster),
            EntityType::Factory => Some(&mut self.as_factory),
            EntityType::Aggregator => None,
        }
    }

    pub(crate) fn add(&mut self, role: &EntityType) {
        if let Some(count) = self.slot(role) {
            *count += 1;
        }
    }

    pub(crate) fn remove(&mut self, role: &EntityType) {
        if let Some(count) = self.slot(role) {
            *count = count.saturating_sub(1);
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.as_sender + self.as_paymaster + self.as_factory
    }

    pub(crate) fn as_sender(&self) -> usize {
        self.as_sender
    }

    /// Referenced as a paymaster or factory by at least one entry
    pub(crate) fn is_entity(&self) -> bool {
        self.as_paymaster > 0 || self.as_factory > 0
    }
}

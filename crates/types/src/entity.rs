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

use std::{fmt::Display, str::FromStr};

use alloy_primitives::Address;
use anyhow::bail;
use parse_display::Display;
use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum::EnumIter;

/// The role an address plays in a user operation
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, EnumIter, Deserialize)]
#[display(style = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// The sender account
    Account,
    /// Paymaster sponsoring the operation
    Paymaster,
    /// Signature aggregator
    Aggregator,
    /// Factory deploying the sender
    Factory,
}

impl EntityType {
    /// Get the string representation of the entity type
    pub fn to_str(&self) -> &'static str {
        match self {
            EntityType::Account => "account",
            EntityType::Paymaster => "paymaster",
            EntityType::Aggregator => "aggregator",
            EntityType::Factory => "factory",
        }
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(EntityType::Account),
            "paymaster" => Ok(EntityType::Paymaster),
            "aggregator" => Ok(EntityType::Aggregator),
            "factory" => Ok(EntityType::Factory),
            _ => bail!("Invalid entity type: {s}"),
        }
    }
}

/// An address together with the role it plays in a user operation
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Entity {
    /// The role of the entity
    pub kind: EntityType,
    /// The address of the entity
    pub address: Address,
}

impl Entity {
    /// Create a new entity of the given type and address
    pub fn new(kind: EntityType, address: Address) -> Self {
        Self { kind, address }
    }

    /// Create a new account entity at address
    pub fn account(address: Address) -> Self {
        Self::new(EntityType::Account, address)
    }

    /// Create a new paymaster entity at address
    pub fn paymaster(address: Address) -> Self {
        Self::new(EntityType::Paymaster, address)
    }

    /// Create a new aggregator entity at address
    pub fn aggregator(address: Address) -> Self {
        Self::new(EntityType::Aggregator, address)
    }

    /// Create a new factory entity at address
    pub fn factory(address: Address) -> Self {
        Self::new(EntityType::Factory, address)
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.address.to_checksum(None))
    }
}

// Serialized as `{ "<role>": "<address>" }`, the shape used in RPC error data.
impl Serialize for Entity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut e = serializer.serialize_struct("Entity", 1)?;
        e.serialize_field(self.kind.to_str(), &self.address.to_checksum(None))?;
        e.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_str() {
        for kind in ["account", "paymaster", "aggregator", "factory"] {
            assert_eq!(EntityType::from_str(kind).unwrap().to_str(), kind);
        }
        assert!(EntityType::from_str("deployer").is_err());
    }

    #[test]
    fn entity_serializes_as_role_keyed_object() {
        let address = Address::repeat_byte(0x11);
        let json = serde_json::to_value(Entity::paymaster(address)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "paymaster": address.to_checksum(None) })
        );
    }
}

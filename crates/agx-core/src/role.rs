//! # Roles and Actors
//!
//! The five parties that touch a shipment. The ledger stores a role as a
//! `uint8` inside KYC attestations, so each role has a fixed code.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::{Address, ProfileId};

/// A participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Producer. Creates shipments and claims payment.
    Farmer,
    /// Carrier. Picks up and delivers.
    Transporter,
    /// Buyer. Makes offers, pays into escrow, verifies delivery.
    Industry,
    /// Neutral signer of weighments, proofs, state updates, and KYC.
    Attestor,
    /// Decides disputes.
    Resolver,
}

impl Role {
    /// All roles in ledger-code order.
    pub fn all() -> &'static [Role] {
        &[
            Self::Farmer,
            Self::Transporter,
            Self::Industry,
            Self::Attestor,
            Self::Resolver,
        ]
    }

    /// The `uint8` the ledger stores for this role.
    pub fn ledger_code(&self) -> u8 {
        match self {
            Self::Farmer => 0,
            Self::Transporter => 1,
            Self::Industry => 2,
            Self::Attestor => 3,
            Self::Resolver => 4,
        }
    }

    /// Inverse of [`Role::ledger_code`].
    pub fn from_ledger_code(code: u8) -> Result<Self, ValidationError> {
        Self::all()
            .iter()
            .copied()
            .find(|r| r.ledger_code() == code)
            .ok_or_else(|| ValidationError::UnknownRole(code.to_string()))
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Farmer => "farmer",
            Self::Transporter => "transporter",
            Self::Industry => "industry",
            Self::Attestor => "attestor",
            Self::Resolver => "resolver",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnknownRole(s.to_string()))
    }
}

/// The caller of an operation: who they are, which account they sign with,
/// and which role they act in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Document-store profile.
    pub profile_id: ProfileId,
    /// Ledger account.
    pub address: Address,
    /// Role for this call.
    pub role: Role,
}

impl Actor {
    /// Build an actor.
    pub fn new(profile_id: ProfileId, address: Address, role: Role) -> Self {
        Self {
            profile_id,
            address,
            role,
        }
    }
}

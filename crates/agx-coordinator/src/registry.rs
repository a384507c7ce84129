//! # Participant Registry
//!
//! Which accounts hold a confirmed KYC attestation, and in which role.
//! An account becomes verified when its `kycAttestation` receipt or the
//! `KycAttested` event is observed, whichever comes first; both paths write
//! the same entry.

use agx_core::{Address, ProfileId, Role, Timestamp};
use agx_ledger::{EventData, LedgerEvent};
use agx_sync::{EventObserver, SyncError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A known participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Ledger account.
    pub address: Address,
    /// Document-store profile, when known.
    pub profile_id: Option<ProfileId>,
    /// Attested role.
    pub role: Role,
    /// Whether a KYC attestation for this account is confirmed.
    pub verified: bool,
    /// Content id of the KYC record.
    pub meta_data_hash: Option<String>,
    /// When the attestation was confirmed.
    pub verified_at: Option<Timestamp>,
}

/// Participants by account.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: DashMap<Address, Participant>,
}

impl ParticipantRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a profile and role for `address` without verifying it.
    pub fn register(&self, address: Address, profile_id: ProfileId, role: Role) {
        self.participants
            .entry(address)
            .and_modify(|p| p.profile_id = Some(profile_id.clone()))
            .or_insert_with(|| Participant {
                address,
                profile_id: Some(profile_id),
                role,
                verified: false,
                meta_data_hash: None,
                verified_at: None,
            });
    }

    /// Mark `address` verified as `role`.
    pub fn record_kyc(&self, address: Address, role: Role, meta_data_hash: &str, at: Timestamp) {
        let mut entry = self.participants.entry(address).or_insert_with(|| Participant {
            address,
            profile_id: None,
            role,
            verified: false,
            meta_data_hash: None,
            verified_at: None,
        });
        let p = entry.value_mut();
        if p.verified && p.role == role && p.meta_data_hash.as_deref() == Some(meta_data_hash) {
            return;
        }
        p.role = role;
        p.verified = true;
        p.meta_data_hash = Some(meta_data_hash.to_string());
        p.verified_at = Some(at);
    }

    /// Whether `address` holds a confirmed attestation in any role.
    pub fn is_verified(&self, address: &Address) -> bool {
        self.participants.get(address).map_or(false, |p| p.verified)
    }

    /// Whether `address` holds a confirmed attestation as `role`.
    pub fn is_verified_as(&self, address: &Address, role: Role) -> bool {
        self.participants
            .get(address)
            .map_or(false, |p| p.verified && p.role == role)
    }

    /// A participant by account.
    pub fn get(&self, address: &Address) -> Option<Participant> {
        self.participants.get(address).map(|p| p.value().clone())
    }

    /// Number of known accounts.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether no account is known.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[async_trait]
impl EventObserver for ParticipantRegistry {
    async fn observe(&self, event: &LedgerEvent) -> Result<(), SyncError> {
        let EventData::KycAttested {
            participant,
            role,
            meta_data_hash,
        } = &event.data
        else {
            return Ok(());
        };
        match Role::from_ledger_code(*role) {
            Ok(role) => {
                self.record_kyc(*participant, role, meta_data_hash, event.block_time);
                tracing::debug!(%participant, %role, "participant verified");
            }
            Err(e) => tracing::warn!(%participant, code = role, error = %e, "KYC event with unknown role"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::{EventId, Hash32, LedgerPosition, TxHash};

    fn carrier() -> Address {
        Address::from_bytes([3; 20])
    }

    fn kyc_event(role: u8) -> LedgerEvent {
        LedgerEvent {
            id: EventId {
                tx_hash: TxHash::from_hash(Hash32::ZERO),
                log_index: 0,
            },
            position: LedgerPosition::new(1, 0),
            block_time: Timestamp::now(),
            emitter: Address::from_bytes([0x5e; 20]),
            data: EventData::KycAttested {
                participant: carrier(),
                role,
                meta_data_hash: "Qm-kyc".into(),
            },
        }
    }

    #[test]
    fn registration_alone_does_not_verify() {
        let reg = ParticipantRegistry::new();
        reg.register(carrier(), ProfileId::new("carrier-1").unwrap(), Role::Transporter);
        assert!(!reg.is_verified(&carrier()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn kyc_verifies_in_its_role_only() {
        let reg = ParticipantRegistry::new();
        reg.record_kyc(carrier(), Role::Transporter, "Qm", Timestamp::now());
        assert!(reg.is_verified_as(&carrier(), Role::Transporter));
        assert!(!reg.is_verified_as(&carrier(), Role::Farmer));
    }

    #[test]
    fn kyc_keeps_registered_profile() {
        let reg = ParticipantRegistry::new();
        reg.register(carrier(), ProfileId::new("carrier-1").unwrap(), Role::Transporter);
        reg.record_kyc(carrier(), Role::Transporter, "Qm", Timestamp::now());
        let p = reg.get(&carrier()).unwrap();
        assert_eq!(p.profile_id.unwrap().as_str(), "carrier-1");
        assert!(p.verified);
    }

    #[tokio::test]
    async fn observes_kyc_events() {
        let reg = ParticipantRegistry::new();
        reg.observe(&kyc_event(Role::Transporter.ledger_code())).await.unwrap();
        assert!(reg.is_verified_as(&carrier(), Role::Transporter));
        assert_eq!(reg.get(&carrier()).unwrap().meta_data_hash.as_deref(), Some("Qm-kyc"));
    }

    #[tokio::test]
    async fn unknown_role_code_is_ignored() {
        let reg = ParticipantRegistry::new();
        reg.observe(&kyc_event(42)).await.unwrap();
        assert!(reg.is_empty());
    }
}

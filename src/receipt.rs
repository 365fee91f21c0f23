//! Signed draw receipts.
//!
//! A receipt pins one drawn cycle (winner, seed, ticket root and the journal
//! head it was committed under) and carries an Ed25519 signature over the
//! SHA-256 digest of those fields.

use base64::{engine::general_purpose, Engine as _};
use draw_core::{CycleAudit, DrawSeed, Ticket};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptCore {
    pub cycle: String,
    pub winner: Ticket,
    pub seed: DrawSeed,
    pub ticket_root: String,
    pub ticket_count: usize,
    pub total_weight: u64,
    pub journal_head: String,
}

impl ReceiptCore {
    pub fn from_audit(audit: &CycleAudit, journal_head: [u8; 32]) -> Result<Self, ReceiptError> {
        let (Some(winner), Some(seed)) = (&audit.winner, audit.seed) else {
            return Err(ReceiptError::NoWinner {
                cycle: audit.cycle.clone(),
            });
        };
        Ok(Self {
            cycle: audit.cycle.clone(),
            winner: winner.clone(),
            seed,
            ticket_root: audit.ticket_root.clone(),
            ticket_count: audit.ticket_count,
            total_weight: audit.total_weight,
            journal_head: hex::encode(journal_head),
        })
    }

    /// Same cycle, winner, seed and ticket set. The journal head is left
    /// out since the journal keeps growing after the draw.
    pub fn same_draw(&self, other: &ReceiptCore) -> bool {
        self.cycle == other.cycle
            && self.winner == other.winner
            && self.seed == other.seed
            && self.ticket_root == other.ticket_root
            && self.ticket_count == other.ticket_count
            && self.total_weight == other.total_weight
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"voyage-draw-receipt");
        hasher.update(self.cycle.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.winner.participant.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.winner.weight.to_le_bytes());
        hasher.update(self.winner.issued_at.to_le_bytes());
        hasher.update(self.winner.sequence.to_le_bytes());
        hasher.update(self.seed.0);
        hasher.update(self.ticket_root.as_bytes());
        hasher.update((self.ticket_count as u64).to_le_bytes());
        hasher.update(self.total_weight.to_le_bytes());
        hasher.update(self.journal_head.as_bytes());
        hasher.finalize().into()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawReceipt {
    pub core: ReceiptCore,
    /// Hex Ed25519 public key of the signer.
    pub signer: String,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl DrawReceipt {
    pub fn sign(core: ReceiptCore, key: &SigningKey) -> Self {
        let signature = key.sign(&core.digest());
        Self {
            core,
            signer: hex::encode(key.verifying_key().as_bytes()),
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Check the signature against the embedded signer key.
    pub fn verify(&self) -> Result<VerifyingKey, ReceiptError> {
        let key = parse_verifying_key(&self.signer)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| ReceiptError::MalformedSignature)?;
        key.verify_strict(&self.core.digest(), &signature)
            .map_err(|_| ReceiptError::InvalidSignature)?;
        Ok(key)
    }

    /// Check the signature and that it was made by `expected`.
    pub fn verify_from(&self, expected: &VerifyingKey) -> Result<(), ReceiptError> {
        let key = self.verify()?;
        if key != *expected {
            return Err(ReceiptError::UnexpectedSigner(self.signer.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("cycle {cycle} has no winner to sign for")]
    NoWinner { cycle: String },
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("malformed signature")]
    MalformedSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("receipt signed by unexpected key {0}")]
    UnexpectedSigner(String),
}

fn key_bytes(value: &str) -> Result<[u8; 32], ReceiptError> {
    let bytes = hex::decode(value.trim()).map_err(|e| ReceiptError::MalformedKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| ReceiptError::MalformedKey(format!("expected 32 bytes, got {}", v.len())))
}

/// 32-byte secret key written as 64 hex characters.
pub fn parse_signing_key(value: &str) -> Result<SigningKey, ReceiptError> {
    Ok(SigningKey::from_bytes(&key_bytes(value)?))
}

pub fn parse_verifying_key(value: &str) -> Result<VerifyingKey, ReceiptError> {
    VerifyingKey::from_bytes(&key_bytes(value)?).map_err(|e| ReceiptError::MalformedKey(e.to_string()))
}

mod b64 {
    use super::*;
    use serde::{de::Error, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use draw_core::{CycleState, DrawCycle, FixedSeed, SeedSource, WeightedSelector};
    use rand::rngs::OsRng;

    fn drawn_audit() -> CycleAudit {
        let mut cycle = DrawCycle::new("2024-08", 0, 100);
        for (sequence, participant) in ["alice", "bob"].into_iter().enumerate() {
            cycle.tickets.push(Ticket {
                participant: participant.into(),
                cycle: "2024-08".into(),
                weight: sequence as u64 + 1,
                issued_at: 10,
                sequence: sequence as u64,
            });
        }
        let seed = FixedSeed::from_u64(5).next_seed();
        let winner = WeightedSelector::new(&cycle.id, &cycle.tickets)
            .unwrap()
            .draw(&seed)
            .clone();
        cycle.state = CycleState::Drawn;
        cycle.seed = Some(seed);
        cycle.winner = Some(winner);
        CycleAudit::of(&cycle)
    }

    #[test]
    fn signed_receipt_verifies_and_survives_json() {
        let key = SigningKey::generate(&mut OsRng);
        let core = ReceiptCore::from_audit(&drawn_audit(), [7u8; 32]).unwrap();
        let receipt = DrawReceipt::sign(core, &key);

        let json = serde_json::to_string(&receipt).unwrap();
        let parsed: DrawReceipt = serde_json::from_str(&json).unwrap();
        parsed.verify_from(&key.verifying_key()).unwrap();
    }

    #[test]
    fn edited_winner_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let core = ReceiptCore::from_audit(&drawn_audit(), [7u8; 32]).unwrap();
        let mut receipt = DrawReceipt::sign(core, &key);
        receipt.core.winner.participant = "mallory".into();
        assert!(matches!(receipt.verify(), Err(ReceiptError::InvalidSignature)));
    }

    #[test]
    fn other_signer_is_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let core = ReceiptCore::from_audit(&drawn_audit(), [0u8; 32]).unwrap();
        let receipt = DrawReceipt::sign(core, &key);
        assert!(matches!(
            receipt.verify_from(&other.verifying_key()),
            Err(ReceiptError::UnexpectedSigner(_))
        ));
    }

    #[test]
    fn same_draw_ignores_journal_growth() {
        let audit = drawn_audit();
        let at_draw = ReceiptCore::from_audit(&audit, [1u8; 32]).unwrap();
        let later = ReceiptCore::from_audit(&audit, [2u8; 32]).unwrap();
        assert!(at_draw.same_draw(&later));
        assert_ne!(at_draw.digest(), later.digest());

        let mut forged = later.clone();
        forged.winner.weight += 1;
        assert!(!at_draw.same_draw(&forged));
    }

    #[test]
    fn undrawn_cycle_has_no_receipt() {
        let audit = CycleAudit::of(&DrawCycle::new("2024-09", 0, 100));
        assert!(matches!(
            ReceiptCore::from_audit(&audit, [0u8; 32]),
            Err(ReceiptError::NoWinner { .. })
        ));
    }

    #[test]
    fn key_parsing_checks_length() {
        assert!(parse_signing_key(&"ab".repeat(32)).is_ok());
        assert!(matches!(
            parse_signing_key("abcd"),
            Err(ReceiptError::MalformedKey(_))
        ));
    }
}

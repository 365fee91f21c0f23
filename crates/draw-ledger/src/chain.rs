use draw_core::{DrawEvent, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One journal line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub height: u64,
    /// Hex digest of the previous entry, or of [`genesis`] for the first.
    pub prev: String,
    pub event: DrawEvent,
    pub digest: String,
}

impl JournalEntry {
    pub fn new(height: u64, prev: [u8; 32], event: DrawEvent) -> Result<Self, StoreError> {
        let digest = entry_digest(height, &prev, &event)?;
        Ok(Self {
            height,
            prev: hex::encode(prev),
            event,
            digest: hex::encode(digest),
        })
    }
}

/// Where the chain currently ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainHead {
    /// Number of entries, which is also the height the next entry gets.
    pub len: u64,
    pub digest: [u8; 32],
}

impl ChainHead {
    pub fn empty() -> Self {
        Self {
            len: 0,
            digest: genesis(),
        }
    }

    /// Check `entry` extends this head and return the head after it.
    pub fn extend(&self, entry: &JournalEntry) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            height: entry.height,
            reason,
        };
        if entry.height != self.len {
            return Err(corrupt(format!("expected height {}", self.len)));
        }
        if entry.prev != hex::encode(self.digest) {
            return Err(corrupt("previous digest does not match".into()));
        }
        let digest = entry_digest(entry.height, &self.digest, &entry.event)?;
        if entry.digest != hex::encode(digest) {
            return Err(corrupt("entry digest does not match its contents".into()));
        }
        Ok(Self {
            len: self.len + 1,
            digest,
        })
    }
}

pub fn genesis() -> [u8; 32] {
    Sha256::digest(b"voyage-draw-journal").into()
}

pub fn entry_digest(height: u64, prev: &[u8; 32], event: &DrawEvent) -> Result<[u8; 32], StoreError> {
    let body = serde_json::to_vec(event).map_err(|e| StoreError::Encoding(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(b"entry");
    hasher.update(height.to_le_bytes());
    hasher.update(prev);
    hasher.update(&body);
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked(cycle: &str) -> DrawEvent {
        DrawEvent::CycleLocked {
            cycle: cycle.into(),
            at: 1,
        }
    }

    #[test]
    fn entries_link_from_genesis() {
        let head = ChainHead::empty();
        let first = JournalEntry::new(0, head.digest, locked("2024-08")).unwrap();
        let head = head.extend(&first).unwrap();
        let second = JournalEntry::new(1, head.digest, locked("2024-09")).unwrap();
        let head = head.extend(&second).unwrap();
        assert_eq!(head.len, 2);
        assert_eq!(second.prev, first.digest);
    }

    #[test]
    fn edited_event_breaks_the_digest() {
        let head = ChainHead::empty();
        let mut entry = JournalEntry::new(0, head.digest, locked("2024-08")).unwrap();
        entry.event = locked("2024-09");
        let err = head.extend(&entry).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { height: 0, .. }));
    }

    #[test]
    fn skipped_height_is_rejected() {
        let head = ChainHead::empty();
        let entry = JournalEntry::new(1, head.digest, locked("2024-08")).unwrap();
        assert!(head.extend(&entry).is_err());
    }
}

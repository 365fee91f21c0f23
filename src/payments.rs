//! File-backed payment statuses.
//!
//! The book is a JSON object `{ participant: { cycle: status } }`. It is
//! re-read on every lookup so statuses written by another process are seen
//! immediately.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use draw_core::{CollaboratorError, PaymentService, PaymentStatus};
use tracing::info;

type Statuses = BTreeMap<String, BTreeMap<String, PaymentStatus>>;

#[derive(Debug)]
pub struct PaymentBook {
    path: PathBuf,
    writes: Mutex<()>,
}

impl PaymentBook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Statuses, CollaboratorError> {
        if !self.path.exists() {
            return Ok(Statuses::new());
        }
        let bytes = fs::read(&self.path)
            .map_err(|e| CollaboratorError(format!("{}: {e}", self.path.display())))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Statuses::new());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| CollaboratorError(format!("{}: {e}", self.path.display())))
    }

    /// Record `status` for `participant` in `cycle`, replacing the file
    /// through a rename so readers never see a half-written book.
    pub fn set_status(
        &self,
        participant: &str,
        cycle: &str,
        status: PaymentStatus,
    ) -> Result<(), CollaboratorError> {
        let _guard = self
            .writes
            .lock()
            .map_err(|_| CollaboratorError("payment book lock poisoned".into()))?;
        let mut statuses = self.read()?;
        statuses
            .entry(participant.to_string())
            .or_default()
            .insert(cycle.to_string(), status);

        let io = |e: std::io::Error| CollaboratorError(format!("{}: {e}", self.path.display()));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let body = serde_json::to_vec_pretty(&statuses).map_err(|e| CollaboratorError(e.to_string()))?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, body).map_err(io)?;
        fs::rename(&staging, &self.path).map_err(io)?;
        info!(participant, cycle, ?status, "payment status recorded");
        Ok(())
    }
}

impl PaymentService for PaymentBook {
    fn payment_status(&self, participant: &str, cycle: &str) -> Result<PaymentStatus, CollaboratorError> {
        Ok(self
            .read()?
            .get(participant)
            .and_then(|cycles| cycles.get(cycle))
            .copied()
            .unwrap_or(PaymentStatus::Unpaid))
    }
}

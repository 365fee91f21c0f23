use std::sync::Mutex;

use referral_module::ParticipantId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::cycle::CycleId;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    TicketIssued { weight: u64 },
    Won,
    NotSelected,
}

/// Event handed to the notification collaborator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub participant: ParticipantId,
    pub cycle: CycleId,
    pub outcome: Outcome,
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self.outcome {
            Outcome::TicketIssued { .. } => "Payment Confirmed",
            Outcome::Won => "Congratulations!",
            Outcome::NotSelected => "Draw Results",
        }
    }

    pub fn description(&self) -> String {
        match &self.outcome {
            Outcome::TicketIssued { weight } => format!(
                "Your payment for the {} draw has been confirmed. Ticket weight: {}.",
                self.cycle, weight
            ),
            Outcome::Won => format!("You have been selected in the {} draw.", self.cycle),
            Outcome::NotSelected => format!(
                "The {} draw has concluded. You were not selected this time.",
                self.cycle
            ),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("notification sink error: {0}")]
pub struct SinkError(pub String);

/// Delivery side of notifications. Failures are logged, never retried.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), SinkError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _: &Notification) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        self.delivered
            .lock()
            .map_err(|_| SinkError("memory sink poisoned".into()))?
            .push(notification.clone());
        Ok(())
    }
}

/// Fire-and-forget delivery.
pub(crate) fn dispatch(sink: &dyn NotificationSink, notification: Notification) {
    if let Err(err) = sink.notify(&notification) {
        warn!(
            participant = %notification.participant,
            cycle = %notification.cycle,
            error = %err,
            "notification dropped"
        );
    }
}

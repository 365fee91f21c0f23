use draw_core::{Notification, NotificationSink, SinkError};
use tracing::info;

/// Delivers notifications as structured log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        info!(
            target: "voyage_draw::notify",
            participant = %notification.participant,
            cycle = %notification.cycle,
            title = notification.title(),
            "{}",
            notification.description()
        );
        Ok(())
    }
}

//! Push-side delivery of flash progress to a presentation layer.

use tokio::sync::mpsc;

use crate::models::SessionLogEntry;
use crate::orchestrator::state::FlashStage;

#[derive(Debug, Clone, PartialEq)]
pub enum FlashEvent {
    StageChanged(FlashStage),
    Progress(u32),
    Log(SessionLogEntry),
}

/// Sink for flash events. Called from the flashing task; must not block.
pub trait FlashObserver: Send + Sync {
    fn on_event(&self, event: FlashEvent);
}

/// Channel delivery; events are dropped if the receiver lags.
impl FlashObserver for mpsc::Sender<FlashEvent> {
    fn on_event(&self, event: FlashEvent) {
        let _ = self.try_send(event);
    }
}

impl FlashObserver for mpsc::UnboundedSender<FlashEvent> {
    fn on_event(&self, event: FlashEvent) {
        let _ = self.send(event);
    }
}

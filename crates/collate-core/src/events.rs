use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

use crate::inventory::GroupId;

/// Notifications for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A group's plan changed and it will be prepared again.
    ChangeDetected { group: GroupId },
    /// A group's composites are uploaded and its report was triggered.
    ReportReady { group: GroupId },
    GroupFailed { group: GroupId, reason: String },
}

/// Sending half handed to the engine and executor. A missing or hung-up
/// receiver never affects processing.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<Event>>,
}

impl EventSink {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: Event) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }
}

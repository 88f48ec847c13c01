// src/updater/messages.rs

//! Lifecycle notifications raised by the update manager.

use tokio::sync::mpsc;

use super::status::UpdateInfo;

/// Events forwarded to collaborators that prefer a channel over callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// A newer version is available and was not skipped.
    UpdateAvailable(UpdateInfo),

    /// The package finished downloading and can be installed.
    UpdateReady(UpdateInfo),

    /// The last operation failed.
    Error(String),
}

/// Hooks fired synchronously when the manager enters the matching status.
/// Each hook fires once per transition.
pub trait UpdateObserver: Send + Sync {
    fn on_update_available(&self, _info: &UpdateInfo) {}

    fn on_update_ready(&self, _info: &UpdateInfo) {}

    fn on_error(&self, _message: &str) {}
}

/// Observer that forwards every hook as an [`UpdateEvent`].
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UpdateEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<UpdateEvent>) -> Self {
        Self { tx }
    }

    /// Convenience constructor returning the receiving half as well.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: UpdateEvent) {
        if let Err(e) = self.tx.send(event) {
            log::debug!("Update: event receiver dropped: {}", e);
        }
    }
}

impl UpdateObserver for ChannelObserver {
    fn on_update_available(&self, info: &UpdateInfo) {
        self.send(UpdateEvent::UpdateAvailable(info.clone()));
    }

    fn on_update_ready(&self, info: &UpdateInfo) {
        self.send(UpdateEvent::UpdateReady(info.clone()));
    }

    fn on_error(&self, message: &str) {
        self.send(UpdateEvent::Error(message.to_string()));
    }
}

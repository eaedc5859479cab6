use std::path::PathBuf;

use tokio::sync::mpsc;

/// One message for the UI/log surface. Delivery is FIFO, at-most-once,
/// and never acknowledged.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Message(String),
    /// A message with a file artifact attached (e.g. a screenshot path).
    Artifact { label: String, path: PathBuf },
}

/// Cloneable sending half of the status channel. The Core, Interpreter and
/// Executor all hold one; the front-end drains the receiver.
#[derive(Clone)]
pub struct StatusSink {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl StatusSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: impl Into<String>) {
        let message = message.into();
        if self.tx.send(StatusUpdate::Message(message)).is_err() {
            tracing::debug!("status receiver dropped, message discarded");
        }
    }

    pub fn send_artifact(&self, label: impl Into<String>, path: PathBuf) {
        let update = StatusUpdate::Artifact {
            label: label.into(),
            path,
        };
        if self.tx.send(update).is_err() {
            tracing::debug!("status receiver dropped, artifact discarded");
        }
    }
}

//! Lifecycle notifications delivered to a single listener.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Initialized,
    Started,
    Stopped,
    Error(String),
    Reloaded,
    /// Emitted by the engine whenever one of its machines changes state.
    StateChange(Value),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Initialized => "initialized",
            LifecycleEvent::Started => "started",
            LifecycleEvent::Stopped => "stopped",
            LifecycleEvent::Error(_) => "error",
            LifecycleEvent::Reloaded => "reloaded",
            LifecycleEvent::StateChange(_) => "state-change",
        }
    }
}

/// Sending half shared by the manager and the engines it builds.
///
/// Events emitted while nobody listens are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    listener: Arc<Mutex<Option<UnboundedSender<LifecycleEvent>>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current listener.
    pub fn subscribe(&self) -> UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = unbounded_channel();
        if let Ok(mut listener) = self.listener.lock() {
            *listener = Some(tx);
        }
        rx
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let Ok(mut listener) = self.listener.lock() else {
            return;
        };
        let closed = match listener.as_ref() {
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if closed {
            *listener = None;
        }
    }
}

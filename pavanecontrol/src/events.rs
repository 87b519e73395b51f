use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Session-level notification broadcast to every dependent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Discovered,
    Lost,
    /// Asynchronous fault from the transport client; the session may still
    /// be alive.
    ClientError(String),
}

impl SessionStatus {
    /// Boolean discovery indicator; client errors do not change it.
    pub fn is_discovered(&self) -> Option<bool> {
        match self {
            SessionStatus::Discovered => Some(true),
            SessionStatus::Lost => Some(false),
            SessionStatus::ClientError(_) => None,
        }
    }
}

/// Fan-out bus for [`SessionStatus`], scoped to one device session manager.
#[derive(Clone, Default)]
pub struct SessionStatusBus {
    subscribers: Arc<Mutex<Vec<Sender<SessionStatus>>>>,
}

impl SessionStatusBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<SessionStatus> {
        let (tx, rx) = unbounded::<SessionStatus>();
        {
            let mut subscribers = self.subscribers.lock().expect("Status Mutex Poisoned");
            subscribers.push(tx);
        }
        rx
    }

    pub fn broadcast(&self, status: SessionStatus) {
        let mut subscribers = self.subscribers.lock().expect("Status Mutex Poisoned");
        subscribers.retain(|tx| tx.send(status.clone()).is_ok());
    }
}

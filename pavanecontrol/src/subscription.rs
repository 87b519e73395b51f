//! Reference-counted fan-out of device event subscriptions.
//!
//! One network-level GENA subscription per service type, shared by every
//! logical subscriber interested in that service. The network subscription
//! is issued on first interest (once the session's event channel is ready)
//! and deliberately kept alive when the subscriber set empties; only
//! [`SubscriptionMultiplexer::unsubscribe_all`] cancels network
//! subscriptions.

use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error};

use crate::client::{ControlPointClient, EventMessage};
use crate::errors::ControlPointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A logical subscription handed to one consumer.
pub struct EventSubscription {
    pub service_type: String,
    pub id: SubscriberId,
    pub receiver: Receiver<EventMessage>,
}

struct ServiceEntry {
    subscribers: Vec<(SubscriberId, Sender<EventMessage>)>,
    network_active: bool,
}

#[derive(Default)]
struct MuxInner {
    entries: HashMap<String, ServiceEntry>,
    next_id: u64,
}

#[derive(Default)]
pub struct SubscriptionMultiplexer {
    inner: Mutex<MuxInner>,
}

impl SubscriptionMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in a service type.
    ///
    /// `client` is the live session capability when the session is
    /// discovered and its event channel is ready; `None` leaves the network
    /// subscription pending until the next ready notification.
    pub fn subscribe(
        &self,
        service_type: &str,
        client: Option<&dyn ControlPointClient>,
    ) -> EventSubscription {
        let (tx, rx) = unbounded::<EventMessage>();

        let (id, first_interest) = {
            let mut inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
            let id = SubscriberId(inner.next_id);
            inner.next_id += 1;

            match inner.entries.get_mut(service_type) {
                Some(entry) => {
                    entry.subscribers.push((id, tx));
                    (id, false)
                }
                None => {
                    inner.entries.insert(
                        service_type.to_string(),
                        ServiceEntry {
                            subscribers: vec![(id, tx)],
                            network_active: false,
                        },
                    );
                    (id, true)
                }
            }
        };

        if first_interest {
            if let Some(client) = client {
                self.issue_subscribe(service_type, client);
            }
        }

        EventSubscription {
            service_type: service_type.to_string(),
            id,
            receiver: rx,
        }
    }

    /// Drops one logical subscriber. The service type stays tracked and its
    /// network subscription stays alive.
    pub fn unsubscribe(&self, service_type: &str, id: SubscriberId) {
        let mut inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
        if let Some(entry) = inner.entries.get_mut(service_type) {
            entry.subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Issues the network subscribe for every tracked service type.
    ///
    /// Called on each event-channel-ready notification. A failed subscribe
    /// drops the service type from tracking without failing the session.
    pub fn resubscribe_all(&self, client: &dyn ControlPointClient) {
        let service_types: Vec<String> = {
            let inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
            inner.entries.keys().cloned().collect()
        };

        for service_type in service_types {
            self.issue_subscribe(&service_type, client);
        }
    }

    /// Cancels every active network subscription, sequentially, continuing
    /// past failures. Returns once every cancellation has been attempted.
    /// Tracked service types survive so a rediscovered session can
    /// resubscribe them.
    pub fn unsubscribe_all(&self, client: &dyn ControlPointClient) {
        let service_types: Vec<String> = {
            let inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
            inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.network_active)
                .map(|(service_type, _)| service_type.clone())
                .collect()
        };

        for service_type in service_types {
            match client.unsubscribe(&service_type) {
                Ok(()) => {
                    debug!(service_type = service_type.as_str(), "Unsubscribed");
                }
                Err(err) => {
                    error!(
                        service_type = service_type.as_str(),
                        error = %err,
                        "Unsubscribe failed"
                    );
                }
            }
            let mut inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
            if let Some(entry) = inner.entries.get_mut(&service_type) {
                entry.network_active = false;
            }
        }
    }

    /// Delivers an event to every subscriber of its service type, in
    /// arrival order, within the current turn.
    pub fn dispatch(&self, message: &EventMessage) {
        let mut inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
        if let Some(entry) = inner.entries.get_mut(&message.service_type) {
            entry
                .subscribers
                .retain(|(_, tx)| tx.send(message.clone()).is_ok());
        }
    }

    pub fn tracked_service_types(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
        inner.entries.keys().cloned().collect()
    }

    fn issue_subscribe(&self, service_type: &str, client: &dyn ControlPointClient) {
        match client.subscribe(service_type) {
            Ok(()) => {
                debug!(service_type, "Network subscription issued");
                let mut inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
                if let Some(entry) = inner.entries.get_mut(service_type) {
                    entry.network_active = true;
                }
            }
            Err(err) => {
                let err = ControlPointError::subscription(service_type, err);
                error!(error = %err, "Subscribe failed, dropping service type");
                let mut inner = self.inner.lock().expect("Multiplexer Mutex Poisoned");
                inner.entries.remove(service_type);
            }
        }
    }
}

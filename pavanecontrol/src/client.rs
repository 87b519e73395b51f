//! Collaborator seams.
//!
//! The SOAP/HTTP action wire, the GENA event listener and the SSDP socket
//! all live behind these traits; the control point core only sees parsed
//! responses and notification streams. Implementations are free to block —
//! every call is made from a worker thread, never from a dispatch path that
//! holds core state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Receiver;

use crate::errors::ControlPointError;

/// Parsed response of a UPnP action: output argument name → text value.
#[derive(Debug, Clone, Default)]
pub struct ActionResponse {
    values: HashMap<String, String>,
}

impl ActionResponse {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Returns the named field or a `MalformedResponse` error.
    pub fn require(&self, name: &str) -> Result<&str, ControlPointError> {
        self.get(name)
            .ok_or_else(|| ControlPointError::MalformedResponse(format!("missing {name}")))
    }
}

impl FromIterator<(String, String)> for ActionResponse {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One GENA event delivery: the evented state variables of one service.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub service_type: String,
    /// Evented variable name → value. `LastChange` carries embedded XML.
    pub properties: HashMap<String, String>,
}

/// Asynchronous notifications pushed by a [`ControlPointClient`].
#[derive(Debug, Clone)]
pub enum ClientNotification {
    /// The event listen channel is up; network subscriptions may be issued.
    EventChannelReady,
    Event(EventMessage),
    Subscribed { service_type: String, sid: String },
    Unsubscribed { service_type: String, sid: String },
    /// Fault not tied to one in-flight call.
    Error(String),
}

/// Action-invoke capability of a live device session.
pub trait ActionInvoker: Send + Sync {
    fn invoke_action(
        &self,
        action: &str,
        args: &[(&str, &str)],
        service_type: &str,
    ) -> Result<ActionResponse>;
}

/// Full control-point client bound to one device description URL.
pub trait ControlPointClient: ActionInvoker {
    /// Requests the event listen channel be opened; readiness arrives as
    /// [`ClientNotification::EventChannelReady`].
    fn open_event_channel(&self) -> Result<()>;

    fn subscribe(&self, service_type: &str) -> Result<()>;
    fn unsubscribe(&self, service_type: &str) -> Result<()>;

    fn device_description(&self) -> Result<xmltree::Element>;
    fn service_description(&self, service_type: &str) -> Result<xmltree::Element>;

    /// Stream of asynchronous notifications for this session.
    fn notifications(&self) -> Receiver<ClientNotification>;

    /// Releases sockets and listeners. Must be idempotent.
    fn cleanup(&self);
}

/// Creates a [`ControlPointClient`] for a discovered description URL.
pub trait SessionConnector: Send + Sync {
    fn connect(&self, description_url: &str) -> Result<Arc<dyn ControlPointClient>>;
}

/// One SSDP search response.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// USN header, `uuid:<device-uuid>::<target>`.
    pub usn: String,
    pub location: String,
    pub status_code: u16,
    pub remote: String,
}

/// Handle on a running SSDP search.
pub trait SearchHandle: Send {
    fn responses(&self) -> &Receiver<SearchResponse>;
    /// Stops the search; further responses are discarded.
    fn stop(&self);
}

/// SSDP discovery capability.
pub trait DiscoveryClient: Send + Sync {
    fn search(&self, target: &str) -> Result<Box<dyn SearchHandle>>;

    /// Static-URL mode: true when the description document answers.
    fn probe_description(&self, url: &str) -> bool;
}

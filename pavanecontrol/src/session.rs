//! Device session lifecycle: periodic discovery, session construction and
//! bounded teardown.
//!
//! A background worker polls for the target device on a fixed cadence. Each
//! tick resolves the device's current description URL (or its absence) and
//! reconciles the live session against it: same URL is a no-op, a new URL
//! tears the old session down before connecting, no URL tears down only.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use tracing::{debug, error, info, warn};

use crate::client::{
    ClientNotification, ControlPointClient, DiscoveryClient, SessionConnector,
};
use crate::errors::ControlPointError;
use crate::events::{SessionStatus, SessionStatusBus};
use crate::subscription::{EventSubscription, SubscriberId, SubscriptionMultiplexer};
use crate::{DEFAULT_POLL_INTERVAL, DEFAULT_SEARCH_TARGET, DISCOVERY_TIMEOUT, TEARDOWN_TIMEOUT};

/// How the target device is identified.
#[derive(Debug, Clone)]
pub enum DeviceTarget {
    /// SSDP search, matching the device UUID inside the USN header.
    Uuid(String),
    /// Fixed description URL, probed directly.
    DescriptionUrl(String),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target: DeviceTarget,
    pub poll_interval: Duration,
    pub discovery_timeout: Duration,
    pub search_target: String,
}

impl SessionConfig {
    pub fn new(target: DeviceTarget) -> Self {
        Self {
            target,
            poll_interval: DEFAULT_POLL_INTERVAL,
            discovery_timeout: DISCOVERY_TIMEOUT,
            search_target: DEFAULT_SEARCH_TARGET.to_string(),
        }
    }
}

struct DeviceSession {
    description_url: String,
    client: Arc<dyn ControlPointClient>,
    event_ready: bool,
}

#[derive(Default)]
struct SessionState {
    session: Option<DeviceSession>,
}

struct SessionCore {
    config: SessionConfig,
    discovery: Arc<dyn DiscoveryClient>,
    connector: Arc<dyn SessionConnector>,
    multiplexer: Arc<SubscriptionMultiplexer>,
    status_bus: SessionStatusBus,
    state: Mutex<SessionState>,
}

/// Owns the discovery worker and the live session, if any.
pub struct DeviceSessionManager {
    core: Arc<SessionCore>,
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSessionManager {
    /// Starts the discovery worker. The first poll happens immediately.
    pub fn start(
        config: SessionConfig,
        discovery: Arc<dyn DiscoveryClient>,
        connector: Arc<dyn SessionConnector>,
    ) -> io::Result<Self> {
        let core = Arc::new(SessionCore {
            config,
            discovery,
            connector,
            multiplexer: Arc::new(SubscriptionMultiplexer::new()),
            status_bus: SessionStatusBus::new(),
            state: Mutex::new(SessionState::default()),
        });

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker_core = Arc::clone(&core);
        let worker = thread::Builder::new()
            .name("session-poll".to_string())
            .spawn(move || {
                loop {
                    SessionCore::poll_device(&worker_core);
                    match stop_rx.recv_timeout(worker_core.config.poll_interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                worker_core.teardown();
            })?;

        Ok(Self {
            core,
            stop_tx,
            worker: Some(worker),
        })
    }

    /// Stream of discovery and fault notifications for this session.
    pub fn status(&self) -> Receiver<SessionStatus> {
        self.core.status_bus.subscribe()
    }

    pub fn is_discovered(&self) -> bool {
        self.core
            .state
            .lock()
            .expect("Session Mutex Poisoned")
            .session
            .is_some()
    }

    /// Registers interest in events of one service type. The network
    /// subscription is issued now if the session is ready, otherwise on the
    /// next event-channel-ready notification.
    pub fn subscribe_events(&self, service_type: &str) -> EventSubscription {
        let client = {
            let state = self.core.state.lock().expect("Session Mutex Poisoned");
            state
                .session
                .as_ref()
                .filter(|session| session.event_ready)
                .map(|session| Arc::clone(&session.client))
        };
        self.core
            .multiplexer
            .subscribe(service_type, client.as_deref())
    }

    pub fn unsubscribe_events(&self, service_type: &str, id: SubscriberId) {
        self.core.multiplexer.unsubscribe(service_type, id);
    }

    /// The live session's action capability, if discovered.
    pub fn client(&self) -> Option<Arc<dyn ControlPointClient>> {
        let state = self.core.state.lock().expect("Session Mutex Poisoned");
        state.session.as_ref().map(|s| Arc::clone(&s.client))
    }

    pub fn device_description(&self) -> Result<xmltree::Element, ControlPointError> {
        let client = self.client().ok_or(ControlPointError::NotDiscovered)?;
        Ok(client.device_description()?)
    }

    pub fn service_description(
        &self,
        service_type: &str,
    ) -> Result<xmltree::Element, ControlPointError> {
        let client = self.client().ok_or(ControlPointError::NotDiscovered)?;
        Ok(client.service_description(service_type)?)
    }

    /// Stops the poll worker and tears the session down.
    pub fn close(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for DeviceSessionManager {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl SessionCore {
    /// One discovery tick.
    fn poll_device(core: &Arc<Self>) {
        let discovered = core.discover();
        let current = {
            let state = core.state.lock().expect("Session Mutex Poisoned");
            state.session.as_ref().map(|s| s.description_url.clone())
        };

        match (discovered, current) {
            (Some(url), Some(current)) if url == current => {}
            (Some(url), current) => {
                if current.is_some() {
                    info!(url = url.as_str(), "Device moved, reconnecting");
                    core.teardown();
                }
                Self::init_device(core, &url);
            }
            (None, Some(_)) => {
                info!("Device no longer answers, tearing session down");
                core.teardown();
            }
            (None, None) => {}
        }
    }

    /// Resolves the target's current description URL, or `None` when the
    /// device is absent. Not finding the device is not an error.
    fn discover(&self) -> Option<String> {
        match &self.config.target {
            DeviceTarget::DescriptionUrl(url) => {
                self.discovery.probe_description(url).then(|| url.clone())
            }
            DeviceTarget::Uuid(uuid) => self.search_for_uuid(uuid),
        }
    }

    fn search_for_uuid(&self, uuid: &str) -> Option<String> {
        let handle = match self.discovery.search(&self.config.search_target) {
            Ok(handle) => handle,
            Err(err) => {
                error!(error = %err, "SSDP search failed to start");
                return None;
            }
        };

        let deadline = Instant::now() + self.config.discovery_timeout;
        let found = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break None;
            }
            match handle.responses().recv_timeout(remaining) {
                Ok(response) => {
                    // USN is `uuid:<device-uuid>::<target>`; the device UUID
                    // starts right after the "uuid:" prefix.
                    if response.usn.find(uuid) == Some(5) {
                        debug!(
                            usn = response.usn.as_str(),
                            location = response.location.as_str(),
                            "Target device answered"
                        );
                        break Some(response.location);
                    }
                }
                Err(_) => break None,
            }
        };
        handle.stop();
        found
    }

    fn init_device(core: &Arc<Self>, description_url: &str) {
        let client = match core.connector.connect(description_url) {
            Ok(client) => client,
            Err(err) => {
                error!(url = description_url, error = %err, "Session connect failed");
                core.status_bus
                    .broadcast(SessionStatus::ClientError(err.to_string()));
                return;
            }
        };

        let notifications = client.notifications();
        {
            let mut state = core.state.lock().expect("Session Mutex Poisoned");
            state.session = Some(DeviceSession {
                description_url: description_url.to_string(),
                client: Arc::clone(&client),
                event_ready: false,
            });
        }

        let drain_core = Arc::clone(core);
        let drain_client = Arc::clone(&client);
        thread::spawn(move || drain_core.drain_notifications(notifications, drain_client));

        info!(url = description_url, "Device session established");
        core.status_bus.broadcast(SessionStatus::Discovered);

        if let Err(err) = client.open_event_channel() {
            error!(error = %err, "Event channel failed to open");
            core.status_bus
                .broadcast(SessionStatus::ClientError(err.to_string()));
        }
    }

    /// Consumes one client's notification stream until the client closes
    /// it on cleanup.
    fn drain_notifications(
        &self,
        notifications: Receiver<ClientNotification>,
        client: Arc<dyn ControlPointClient>,
    ) {
        for notification in notifications.iter() {
            match notification {
                ClientNotification::EventChannelReady => {
                    let still_current = {
                        let mut state = self.state.lock().expect("Session Mutex Poisoned");
                        match &mut state.session {
                            Some(session) if Arc::ptr_eq(&session.client, &client) => {
                                session.event_ready = true;
                                true
                            }
                            _ => false,
                        }
                    };
                    if still_current {
                        debug!("Event channel ready, issuing subscriptions");
                        self.multiplexer.resubscribe_all(&*client);
                    }
                }
                ClientNotification::Event(message) => {
                    self.multiplexer.dispatch(&message);
                }
                ClientNotification::Subscribed { service_type, sid } => {
                    info!(service_type = service_type.as_str(), sid = sid.as_str(), "Subscribed");
                }
                ClientNotification::Unsubscribed { service_type, sid } => {
                    info!(service_type = service_type.as_str(), sid = sid.as_str(), "Unsubscribed");
                }
                ClientNotification::Error(message) => {
                    warn!(message = message.as_str(), "Client fault");
                    self.status_bus
                        .broadcast(SessionStatus::ClientError(message));
                }
            }
        }
    }

    /// Tears the live session down. The network unsubscribe pass is bounded;
    /// past the bound the session is released anyway. Idempotent.
    fn teardown(&self) {
        let session = {
            let mut state = self.state.lock().expect("Session Mutex Poisoned");
            state.session.take()
        };
        let Some(session) = session else {
            return;
        };

        let (done_tx, done_rx) = unbounded::<()>();
        let client = Arc::clone(&session.client);
        let multiplexer = Arc::clone(&self.multiplexer);
        thread::spawn(move || {
            multiplexer.unsubscribe_all(&*client);
            let _ = done_tx.send(());
        });

        match done_rx.recv_timeout(TEARDOWN_TIMEOUT) {
            Ok(()) => debug!("Subscriptions released"),
            Err(_) => warn!("Unsubscribe pass exceeded its bound, releasing session anyway"),
        }

        session.client.cleanup();
        self.status_bus.broadcast(SessionStatus::Lost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{SearchHandle, SearchResponse};

    struct ScriptedSearch {
        rx: Receiver<SearchResponse>,
    }

    impl SearchHandle for ScriptedSearch {
        fn responses(&self) -> &Receiver<SearchResponse> {
            &self.rx
        }

        fn stop(&self) {}
    }

    struct ScriptedDiscovery {
        responses: Vec<SearchResponse>,
        reachable: bool,
    }

    impl DiscoveryClient for ScriptedDiscovery {
        fn search(&self, _target: &str) -> anyhow::Result<Box<dyn SearchHandle>> {
            let (tx, rx) = unbounded();
            for response in &self.responses {
                let _ = tx.send(response.clone());
            }
            Ok(Box::new(ScriptedSearch { rx }))
        }

        fn probe_description(&self, _url: &str) -> bool {
            self.reachable
        }
    }

    struct NoConnector;

    impl SessionConnector for NoConnector {
        fn connect(&self, _description_url: &str) -> anyhow::Result<Arc<dyn ControlPointClient>> {
            anyhow::bail!("unused")
        }
    }

    fn core(target: DeviceTarget, discovery: ScriptedDiscovery) -> Arc<SessionCore> {
        let mut config = SessionConfig::new(target);
        config.discovery_timeout = Duration::from_millis(100);
        Arc::new(SessionCore {
            config,
            discovery: Arc::new(discovery),
            connector: Arc::new(NoConnector),
            multiplexer: Arc::new(SubscriptionMultiplexer::new()),
            status_bus: SessionStatusBus::new(),
            state: Mutex::new(SessionState::default()),
        })
    }

    fn response(usn: &str, location: &str) -> SearchResponse {
        SearchResponse {
            usn: usn.to_string(),
            location: location.to_string(),
            status_code: 200,
            remote: "10.0.0.9:1900".to_string(),
        }
    }

    #[test]
    fn uuid_must_sit_right_after_the_usn_prefix() {
        let discovery = ScriptedDiscovery {
            responses: vec![
                // uuid appears, but not at the fixed offset
                response("uuid:other::uuid:DEV-1", "http://10.0.0.8/desc.xml"),
                response("uuid:DEV-1::upnp:rootdevice", "http://10.0.0.9/desc.xml"),
            ],
            reachable: false,
        };
        let core = core(DeviceTarget::Uuid("DEV-1".to_string()), discovery);

        assert_eq!(core.discover().as_deref(), Some("http://10.0.0.9/desc.xml"));
    }

    #[test]
    fn absent_device_is_not_an_error() {
        let discovery = ScriptedDiscovery {
            responses: vec![response("uuid:OTHER::upnp:rootdevice", "http://x/d.xml")],
            reachable: false,
        };
        let core = core(DeviceTarget::Uuid("DEV-1".to_string()), discovery);

        assert_eq!(core.discover(), None);
    }

    #[test]
    fn static_url_mode_follows_the_probe() {
        let url = "http://10.0.0.5/description.xml";
        let found = core(
            DeviceTarget::DescriptionUrl(url.to_string()),
            ScriptedDiscovery {
                responses: Vec::new(),
                reachable: true,
            },
        );
        assert_eq!(found.discover().as_deref(), Some(url));

        let gone = core(
            DeviceTarget::DescriptionUrl(url.to_string()),
            ScriptedDiscovery {
                responses: Vec::new(),
                reachable: false,
            },
        );
        assert_eq!(gone.discover(), None);
    }
}

//! UPnP control-point core: device session management, event subscription
//! fan-out, content browsing and renderer state tracking.
//!
//! The network edges (SOAP actions, GENA events, SSDP search) live behind
//! the traits in [`client`]; everything here is transport-agnostic and runs
//! on plain worker threads paced by crossbeam stop channels.

pub mod browser;
pub mod client;
pub mod errors;
pub mod events;
pub mod renderer;
pub mod session;
pub mod subscription;

use std::time::Duration;

pub use browser::{
    BrowseMode, BrowseOverrides, BrowseResult, ContainerNode, ContentBrowser, ObjectBrowse,
};
pub use client::{
    ActionInvoker, ActionResponse, ClientNotification, ControlPointClient, DiscoveryClient,
    EventMessage, SearchHandle, SearchResponse, SessionConnector,
};
pub use errors::ControlPointError;
pub use events::{SessionStatus, SessionStatusBus};
pub use renderer::{MediaReference, PlaybackStatus, RendererStateReconciler, TransportState};
pub use session::{DeviceSessionManager, DeviceTarget, SessionConfig};
pub use subscription::{EventSubscription, SubscriberId, SubscriptionMultiplexer};

pub const AVTRANSPORT_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:1";
pub const CONTENT_DIRECTORY_SERVICE: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";

/// SSDP search target when no specific one is configured.
pub const DEFAULT_SEARCH_TARGET: &str = "ssdp:all";

/// Cadence of the device liveness poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long one discovery attempt waits for the target to answer.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the unsubscribe pass during session teardown.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cadence of the playback position poll while a renderer is playing.
pub const RENDERER_POLL_INTERVAL: Duration = Duration::from_secs(1);

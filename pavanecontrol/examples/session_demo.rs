//! Runs the whole control-point core against an in-memory fake device:
//! discovery, event subscription, a content browse and a short playback
//! sequence driven by LastChange events.
//!
//! Run with `RUST_LOG=debug` for the structured log stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use pavanecontrol::{
    AVTRANSPORT_SERVICE, ActionInvoker, ActionResponse, BrowseMode, BrowseOverrides,
    ClientNotification, ContentBrowser, ControlPointClient, DeviceSessionManager, DeviceTarget,
    DiscoveryClient, EventMessage, MediaReference, RendererStateReconciler, SearchHandle,
    SessionConfig, SessionConnector,
};
use pavanedidl::MediaObjectRecord;

const DEMO_DIDL: &str = concat!(
    "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" ",
    "xmlns:dc=\"http://purl.org/dc/elements/1.1/\" ",
    "xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\">",
    "<item id=\"track-1\"><dc:title>Pavane pour une infante defunte</dc:title>",
    "<upnp:artist>Maurice Ravel</upnp:artist>",
    "<res duration=\"0:06:30\">http://fake-device/track-1.mp3</res></item>",
    "</DIDL-Lite>"
);

/// A device that answers Browse and transport actions from memory.
struct FakeDevice {
    notify_tx: Mutex<Option<Sender<ClientNotification>>>,
    notify_rx: Receiver<ClientNotification>,
}

impl FakeDevice {
    fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            notify_tx: Mutex::new(Some(tx)),
            notify_rx: rx,
        })
    }

    fn emit_last_change(&self, fields: &str) {
        let xml = format!(
            "<Event xmlns=\"urn:schemas-upnp-org:metadata-1-0/AVT/\">\
             <InstanceID val=\"0\">{fields}</InstanceID></Event>"
        );
        let mut properties = HashMap::new();
        properties.insert("LastChange".to_string(), xml);
        if let Some(tx) = self.notify_tx.lock().unwrap().as_ref() {
            let _ = tx.send(ClientNotification::Event(EventMessage {
                service_type: AVTRANSPORT_SERVICE.to_string(),
                properties,
            }));
        }
    }
}

impl ActionInvoker for FakeDevice {
    fn invoke_action(
        &self,
        action: &str,
        args: &[(&str, &str)],
        _service_type: &str,
    ) -> anyhow::Result<ActionResponse> {
        println!("  -> action {action} ({} args)", args.len());
        match action {
            "Browse" => Ok([
                ("NumberReturned".to_string(), "1".to_string()),
                ("TotalMatches".to_string(), "1".to_string()),
                ("Result".to_string(), DEMO_DIDL.to_string()),
            ]
            .into_iter()
            .collect()),
            "Play" => {
                self.emit_last_change(
                    "<TransportState val=\"PLAYING\"/>\
                     <CurrentTrackURI val=\"http://fake-device/track-1.mp3\"/>",
                );
                Ok(ActionResponse::default())
            }
            "Stop" => {
                self.emit_last_change("<TransportState val=\"STOPPED\"/>");
                Ok(ActionResponse::default())
            }
            "GetPositionInfo" => Ok([
                ("TrackURI".to_string(), "http://fake-device/track-1.mp3".to_string()),
                ("TrackDuration".to_string(), "0:06:30".to_string()),
                ("RelTime".to_string(), "0:00:03".to_string()),
                ("AbsTime".to_string(), "0:00:03".to_string()),
            ]
            .into_iter()
            .collect()),
            _ => Ok(ActionResponse::default()),
        }
    }
}

impl ControlPointClient for FakeDevice {
    fn open_event_channel(&self) -> anyhow::Result<()> {
        if let Some(tx) = self.notify_tx.lock().unwrap().as_ref() {
            let _ = tx.send(ClientNotification::EventChannelReady);
        }
        Ok(())
    }

    fn subscribe(&self, _service_type: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn unsubscribe(&self, _service_type: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn device_description(&self) -> anyhow::Result<xmltree::Element> {
        Ok(xmltree::Element::new("device"))
    }

    fn service_description(&self, _service_type: &str) -> anyhow::Result<xmltree::Element> {
        Ok(xmltree::Element::new("service"))
    }

    fn notifications(&self) -> Receiver<ClientNotification> {
        self.notify_rx.clone()
    }

    fn cleanup(&self) {
        self.notify_tx.lock().unwrap().take();
    }
}

struct FakeConnector {
    device: Mutex<Option<Arc<FakeDevice>>>,
}

impl SessionConnector for FakeConnector {
    fn connect(&self, _description_url: &str) -> anyhow::Result<Arc<dyn ControlPointClient>> {
        let device = FakeDevice::new();
        *self.device.lock().unwrap() = Some(Arc::clone(&device));
        Ok(device)
    }
}

struct AlwaysPresent;

struct NoSearch;

impl SearchHandle for NoSearch {
    fn responses(&self) -> &Receiver<pavanecontrol::SearchResponse> {
        unreachable!("description-URL mode never searches")
    }

    fn stop(&self) {}
}

impl DiscoveryClient for AlwaysPresent {
    fn search(&self, _target: &str) -> anyhow::Result<Box<dyn SearchHandle>> {
        Ok(Box::new(NoSearch))
    }

    fn probe_description(&self, _url: &str) -> bool {
        true
    }
}

fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut config = SessionConfig::new(DeviceTarget::DescriptionUrl(
        "http://fake-device/description.xml".to_string(),
    ));
    config.poll_interval = Duration::from_millis(250);

    let connector = Arc::new(FakeConnector {
        device: Mutex::new(None),
    });
    let manager = DeviceSessionManager::start(
        config,
        Arc::new(AlwaysPresent),
        Arc::clone(&connector) as Arc<dyn SessionConnector>,
    )?;

    let status = manager.status();
    println!("Waiting for discovery...");
    println!("  session: {:?}", status.recv_timeout(Duration::from_secs(5))?);

    let subscription = manager.subscribe_events(AVTRANSPORT_SERVICE);
    let client = manager
        .client()
        .ok_or_else(|| anyhow::anyhow!("no live session"))?;

    let browser = ContentBrowser::new(Arc::clone(&client) as Arc<dyn ActionInvoker>);
    let listing = browser.browse_content("0", BrowseMode::Children, false, &BrowseOverrides::default())?;
    println!(
        "Browse of root: {} items / {} containers",
        listing.items.len(),
        listing.containers.len()
    );
    let records: Vec<MediaObjectRecord> =
        listing.items.iter().map(MediaObjectRecord::from).collect();
    for record in &records {
        println!("  found \"{}\" ({:?}s)", record.name, record.duration);
    }

    let reconciler = RendererStateReconciler::new(Arc::clone(&client) as Arc<dyn ActionInvoker>);
    let updates = reconciler.updates();
    reconciler.attach(subscription.receiver.clone());
    reconciler.watch_session(manager.status());

    let track = records
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("device returned no track"))?;
    println!("Playing \"{}\"", track.name);
    reconciler.play(Some(MediaReference::Record(track)))?;

    thread::sleep(Duration::from_secs(3));
    while let Ok(snapshot) = updates.try_recv() {
        println!(
            "  status: state={:?} rel={:?}s uri={:?}",
            snapshot.transport_state, snapshot.rel_time, snapshot.file_uri
        );
    }

    reconciler.stop()?;
    thread::sleep(Duration::from_millis(200));
    reconciler.stop_polling();

    println!("Closing session");
    manager.close();
    Ok(())
}

//! Playback-state reconciliation for one media renderer.
//!
//! Two asynchronous sources feed the same [`PlaybackStatus`]: pushed
//! LastChange events from the AVTransport service, and a 1 s GetPositionInfo
//! poll that runs only while the transport is playing. The two are not
//! ordered relative to one another; correctness comes from last-write-wins
//! per field plus a full descriptive reset whenever the track URI changes.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use tracing::{debug, warn};

use pavanedidl::{MediaObjectRecord, decode_item, encode_item, format_upnp_time, parse_upnp_time};

use crate::client::{ActionInvoker, EventMessage};
use crate::errors::ControlPointError;
use crate::events::SessionStatus;
use crate::{AVTRANSPORT_SERVICE, RENDERER_POLL_INTERVAL};

/// AVTransport state, passed through verbatim from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
    Transitioning,
    NoMediaPresent,
    /// Any state string this crate has no name for.
    Other(String),
}

impl TransportState {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "STOPPED" => TransportState::Stopped,
            "PLAYING" => TransportState::Playing,
            "PAUSED_PLAYBACK" => TransportState::Paused,
            "TRANSITIONING" => TransportState::Transitioning,
            "NO_MEDIA_PRESENT" => TransportState::NoMediaPresent,
            other => TransportState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TransportState::Stopped => "STOPPED",
            TransportState::Playing => "PLAYING",
            TransportState::Paused => "PAUSED_PLAYBACK",
            TransportState::Transitioning => "TRANSITIONING",
            TransportState::NoMediaPresent => "NO_MEDIA_PRESENT",
            TransportState::Other(raw) => raw,
        }
    }
}

/// Current playback picture of the renderer, rebuilt field-by-field as data
/// arrives from either source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub file_uri: Option<String>,
    pub transport_state: Option<TransportState>,
    /// Track length in seconds, absent while unknown or zero.
    pub duration: Option<u64>,
    pub rel_time: Option<u64>,
    pub abs_time: Option<u64>,
    /// Descriptive fields of the current track, merged from metadata
    /// payloads. Cleared on track change.
    pub media: MediaObjectRecord,
}

/// What to hand the transport when assigning the current track.
#[derive(Debug, Clone)]
pub enum MediaReference {
    /// Structured record; the URI metadata document is built from it.
    Record(MediaObjectRecord),
    /// Caller-supplied DIDL-Lite metadata, used verbatim.
    RawDidl { uri: String, metadata: String },
}

/// One batch of fields extracted from either source.
#[derive(Debug, Default)]
struct FieldUpdate {
    transport_state: Option<TransportState>,
    track_uri: Option<String>,
    duration: Option<u64>,
    rel_time: Option<u64>,
    abs_time: Option<u64>,
    media: Option<MediaObjectRecord>,
}

struct PollHandle {
    // dropping the sender disconnects the poll thread's pacing channel
    _stop_tx: Sender<()>,
}

struct ReconcilerState {
    status: PlaybackStatus,
    poll: Option<PollHandle>,
}

struct ReconcilerInner {
    invoker: Arc<dyn ActionInvoker>,
    poll_interval: Duration,
    state: Mutex<ReconcilerState>,
    subscribers: Mutex<Vec<Sender<PlaybackStatus>>>,
}

pub struct RendererStateReconciler {
    inner: Arc<ReconcilerInner>,
}

impl RendererStateReconciler {
    pub fn new(invoker: Arc<dyn ActionInvoker>) -> Self {
        Self::with_poll_interval(invoker, RENDERER_POLL_INTERVAL)
    }

    pub fn with_poll_interval(invoker: Arc<dyn ActionInvoker>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                invoker,
                poll_interval,
                state: Mutex::new(ReconcilerState {
                    status: PlaybackStatus::default(),
                    poll: None,
                }),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Stream of status snapshots, one per merge that changed something.
    pub fn updates(&self) -> Receiver<PlaybackStatus> {
        let (tx, rx) = unbounded::<PlaybackStatus>();
        self.inner
            .subscribers
            .lock()
            .expect("Reconciler Mutex Poisoned")
            .push(tx);
        rx
    }

    pub fn status(&self) -> PlaybackStatus {
        self.inner
            .state
            .lock()
            .expect("Reconciler Mutex Poisoned")
            .status
            .clone()
    }

    /// Feeds one pushed event. Non-AVTransport events and events without a
    /// LastChange payload are ignored.
    pub fn handle_event(&self, message: &EventMessage) {
        if message.service_type != AVTRANSPORT_SERVICE {
            return;
        }
        let Some(last_change) = message.properties.get("LastChange") else {
            return;
        };
        match parse_last_change(last_change) {
            Ok(update) => ReconcilerInner::merge(&self.inner, update),
            Err(err) => warn!(error = %err, "Discarding unparseable LastChange event"),
        }
    }

    /// Spawns a drain thread feeding `events` into the reconciler until the
    /// channel closes.
    pub fn attach(&self, events: Receiver<EventMessage>) {
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            for message in events.iter() {
                if message.service_type != AVTRANSPORT_SERVICE {
                    continue;
                }
                let Some(last_change) = message.properties.get("LastChange") else {
                    continue;
                };
                match parse_last_change(last_change) {
                    Ok(update) => ReconcilerInner::merge(&inner, update),
                    Err(err) => warn!(error = %err, "Discarding unparseable LastChange event"),
                }
            }
        });
    }

    /// Ties the poll lifecycle to a session status stream: losing the
    /// device stops the position poll instead of letting it hammer a dead
    /// session. A later PLAYING merge starts it again.
    pub fn watch_session(&self, status: Receiver<SessionStatus>) {
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            for update in status.iter() {
                if update == SessionStatus::Lost {
                    debug!("Session lost, stopping position poll");
                    inner
                        .state
                        .lock()
                        .expect("Reconciler Mutex Poisoned")
                        .poll
                        .take();
                }
            }
        });
    }

    /// Issues Play. When a media reference is given, the track assignment
    /// completes before Play goes out.
    pub fn play(&self, media: Option<MediaReference>) -> Result<(), ControlPointError> {
        if let Some(media) = media {
            self.set_media(media)?;
        }
        self.inner.invoker.invoke_action(
            "Play",
            &[("InstanceID", "0"), ("Speed", "1")],
            AVTRANSPORT_SERVICE,
        )?;
        Ok(())
    }

    pub fn stop(&self) -> Result<(), ControlPointError> {
        self.inner
            .invoker
            .invoke_action("Stop", &[("InstanceID", "0")], AVTRANSPORT_SERVICE)?;
        Ok(())
    }

    pub fn pause(&self) -> Result<(), ControlPointError> {
        self.inner
            .invoker
            .invoke_action("Pause", &[("InstanceID", "0")], AVTRANSPORT_SERVICE)?;
        Ok(())
    }

    /// Relative-time seek to an absolute offset within the current track.
    pub fn seek(&self, seconds: u64) -> Result<(), ControlPointError> {
        let target = format_upnp_time(seconds);
        self.inner.invoker.invoke_action(
            "Seek",
            &[
                ("InstanceID", "0"),
                ("Unit", "REL_TIME"),
                ("Target", target.as_str()),
            ],
            AVTRANSPORT_SERVICE,
        )?;
        Ok(())
    }

    /// Assigns the current track URI and its metadata document.
    pub fn set_media(&self, media: MediaReference) -> Result<(), ControlPointError> {
        let (uri, metadata) = match media {
            MediaReference::Record(record) => {
                let uri = record
                    .file_uri
                    .clone()
                    .ok_or_else(|| ControlPointError::MissingFileUri(record.id.clone()))?;
                (uri, encode_item(&record)?)
            }
            MediaReference::RawDidl { uri, metadata } => (uri, metadata),
        };

        self.inner.invoker.invoke_action(
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", uri.as_str()),
                ("CurrentURIMetaData", metadata.as_str()),
            ],
            AVTRANSPORT_SERVICE,
        )?;
        Ok(())
    }

    /// Stops the position poll if it is running.
    pub fn stop_polling(&self) {
        self.inner
            .state
            .lock()
            .expect("Reconciler Mutex Poisoned")
            .poll
            .take();
    }
}

impl Drop for RendererStateReconciler {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

impl ReconcilerInner {
    /// Applies one field batch, last write wins per field. A changed track
    /// URI first discards the accumulated descriptive fields, transport
    /// state excepted. Emits a snapshot when anything changed, then aligns
    /// the poll timer with the resulting transport state.
    fn merge(inner: &Arc<Self>, update: FieldUpdate) {
        let (changed, snapshot) = {
            let mut state = inner.state.lock().expect("Reconciler Mutex Poisoned");
            let before = state.status.clone();

            if let Some(uri) = &update.track_uri {
                if state.status.file_uri.as_deref() != Some(uri.as_str()) {
                    let carried_state = state.status.transport_state.take();
                    state.status = PlaybackStatus {
                        file_uri: Some(uri.clone()),
                        transport_state: carried_state,
                        ..PlaybackStatus::default()
                    };
                    debug!(uri = uri.as_str(), "Track changed, descriptive fields reset");
                }
            }

            let status = &mut state.status;
            if let Some(transport_state) = update.transport_state {
                status.transport_state = Some(transport_state);
            }
            if let Some(duration) = update.duration {
                status.duration = Some(duration);
            }
            if let Some(rel_time) = update.rel_time {
                status.rel_time = Some(rel_time);
            }
            if let Some(abs_time) = update.abs_time {
                status.abs_time = Some(abs_time);
            }
            if let Some(media) = update.media {
                merge_record(&mut status.media, media);
            }

            (state.status != before, state.status.clone())
        };

        if changed {
            let mut subscribers = inner
                .subscribers
                .lock()
                .expect("Reconciler Mutex Poisoned");
            subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }

        match snapshot.transport_state {
            Some(TransportState::Playing) => {
                // idempotent: a running poll is left alone
                let stopped = inner
                    .state
                    .lock()
                    .expect("Reconciler Mutex Poisoned")
                    .poll
                    .is_none();
                if stopped {
                    Self::restart_poll(inner);
                }
            }
            Some(_) => {
                inner
                    .state
                    .lock()
                    .expect("Reconciler Mutex Poisoned")
                    .poll
                    .take();
            }
            None => {}
        }
    }

    fn restart_poll(inner: &Arc<Self>) {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        {
            let mut state = inner.state.lock().expect("Reconciler Mutex Poisoned");
            state.poll.take();
            state.poll = Some(PollHandle { _stop_tx: stop_tx });
        }

        let poll_inner = Arc::clone(inner);
        thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(poll_inner.poll_interval) {
                    Err(RecvTimeoutError::Timeout) => Self::poll_position(&poll_inner),
                    _ => break,
                }
            }
        });
        debug!("Position poll started");
    }

    fn poll_position(inner: &Arc<Self>) {
        let response = inner.invoker.invoke_action(
            "GetPositionInfo",
            &[("InstanceID", "0")],
            AVTRANSPORT_SERVICE,
        );
        match response {
            Ok(response) => {
                let mut update = FieldUpdate {
                    track_uri: response.get("TrackURI").map(str::to_string),
                    duration: response
                        .get("TrackDuration")
                        .and_then(parse_position)
                        .filter(|&d| d > 0),
                    rel_time: response.get("RelTime").and_then(parse_position),
                    abs_time: response.get("AbsTime").and_then(parse_position),
                    ..FieldUpdate::default()
                };
                if let Some(metadata) = response.get("TrackMetaData") {
                    update.media = decode_track_metadata(metadata);
                }
                Self::merge(inner, update);
            }
            Err(err) => warn!(error = %err, "GetPositionInfo poll failed"),
        }
    }
}

/// Strict position parse: devices report `NOT_IMPLEMENTED`, `-:--:--` or
/// an empty string when a field is unavailable, and a sentinel must not
/// overwrite a previously valid value. Only a fully numeric `H:MM:SS`
/// counts.
fn parse_position(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "NOT_IMPLEMENTED" {
        return None;
    }
    let mut parts = trimmed.splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.split('.').next()?.parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Set-if-present merge of descriptive track fields.
fn merge_record(current: &mut MediaObjectRecord, incoming: MediaObjectRecord) {
    if !incoming.id.is_empty() {
        current.id = incoming.id;
    }
    if !incoming.name.is_empty() {
        current.name = incoming.name;
    }
    macro_rules! take_if_some {
        ($($field:ident),+) => {
            $(if incoming.$field.is_some() {
                current.$field = incoming.$field;
            })+
        };
    }
    take_if_some!(
        creator,
        artist,
        date,
        album,
        genre,
        track_number,
        album_art_uri,
        file_uri,
        duration
    );
}

/// Extracts the transport fields of an AVTransport LastChange document.
/// Values live in `val` attributes under the InstanceID element.
fn parse_last_change(xml: &str) -> Result<FieldUpdate, ControlPointError> {
    let root = xmltree::Element::parse(xml.as_bytes())
        .map_err(|err| ControlPointError::Parse(err.to_string()))?;
    let instance = root
        .children
        .iter()
        .find_map(|node| match node {
            xmltree::XMLNode::Element(elem) if elem.name == "InstanceID" => Some(elem),
            _ => None,
        })
        .ok_or_else(|| ControlPointError::Parse("LastChange has no InstanceID".to_string()))?;

    let mut update = FieldUpdate::default();
    for node in &instance.children {
        let xmltree::XMLNode::Element(elem) = node else {
            continue;
        };
        let Some(value) = elem.attributes.get("val") else {
            continue;
        };
        match elem.name.as_str() {
            "TransportState" => {
                update.transport_state = Some(TransportState::from_wire(value));
            }
            "CurrentTrackURI" => update.track_uri = Some(value.clone()),
            "CurrentTrackDuration" => {
                update.duration = Some(parse_upnp_time(value)).filter(|&d| d > 0);
            }
            "CurrentTrackMetaData" => update.media = decode_track_metadata(value),
            _ => {}
        }
    }
    Ok(update)
}

/// Metadata values are frequently empty or "NOT_IMPLEMENTED"; both decode
/// to nothing rather than an error.
fn decode_track_metadata(value: &str) -> Option<MediaObjectRecord> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "NOT_IMPLEMENTED" {
        return None;
    }
    match decode_item(trimmed) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(error = %err, "Discarding unparseable track metadata");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::client::ActionResponse;

    #[derive(Default)]
    struct RecordingInvoker {
        calls: StdMutex<Vec<String>>,
        position_polls: AtomicUsize,
        position_response: StdMutex<HashMap<String, String>>,
    }

    impl ActionInvoker for RecordingInvoker {
        fn invoke_action(
            &self,
            action: &str,
            args: &[(&str, &str)],
            _service_type: &str,
        ) -> anyhow::Result<ActionResponse> {
            self.calls.lock().unwrap().push(action.to_string());
            if action == "GetPositionInfo" {
                self.position_polls.fetch_add(1, Ordering::SeqCst);
                let values = self.position_response.lock().unwrap().clone();
                return Ok(ActionResponse::new(values));
            }
            let _ = args;
            Ok(ActionResponse::default())
        }
    }

    fn last_change(fields: &[(&str, &str)]) -> EventMessage {
        let body: String = fields
            .iter()
            .map(|(name, value)| {
                format!(
                    "<{name} val=\"{}\"/>",
                    value.replace('<', "&lt;").replace('"', "&quot;")
                )
            })
            .collect();
        let xml = format!(
            "<Event xmlns=\"urn:schemas-upnp-org:metadata-1-0/AVT/\">\
             <InstanceID val=\"0\">{body}</InstanceID></Event>"
        );
        EventMessage {
            service_type: AVTRANSPORT_SERVICE.to_string(),
            properties: [("LastChange".to_string(), xml)].into_iter().collect(),
        }
    }

    const TRACK_ONE_META: &str = concat!(
        "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" ",
        "xmlns:dc=\"http://purl.org/dc/elements/1.1/\" ",
        "xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\">",
        "<item id=\"t1\"><dc:title>One</dc:title>",
        "<upnp:artist>Ana</upnp:artist><upnp:album>Alba</upnp:album>",
        "<res duration=\"0:03:00\">http://m/one.mp3</res></item></DIDL-Lite>"
    );

    fn reconciler() -> (RendererStateReconciler, Arc<RecordingInvoker>) {
        let invoker = Arc::new(RecordingInvoker::default());
        let reconciler = RendererStateReconciler::with_poll_interval(
            Arc::clone(&invoker) as Arc<dyn ActionInvoker>,
            Duration::from_millis(20),
        );
        (reconciler, invoker)
    }

    #[test]
    fn track_change_resets_descriptive_fields_but_keeps_state() {
        let (reconciler, _invoker) = reconciler();

        reconciler.handle_event(&last_change(&[
            ("TransportState", "PAUSED_PLAYBACK"),
            ("CurrentTrackURI", "http://m/one.mp3"),
            ("CurrentTrackDuration", "0:03:00"),
            ("CurrentTrackMetaData", TRACK_ONE_META),
        ]));
        let status = reconciler.status();
        assert_eq!(status.media.artist.as_deref(), Some("Ana"));
        assert_eq!(status.duration, Some(180));

        reconciler.handle_event(&last_change(&[(
            "CurrentTrackURI",
            "http://m/two.mp3",
        )]));
        let status = reconciler.status();
        assert_eq!(status.file_uri.as_deref(), Some("http://m/two.mp3"));
        assert_eq!(status.media.artist, None);
        assert_eq!(status.media.album, None);
        assert_eq!(status.duration, None);
        // transport state is not part of track identity
        assert_eq!(status.transport_state, Some(TransportState::Paused));
    }

    #[test]
    fn last_write_wins_per_field() {
        let (reconciler, invoker) = reconciler();

        reconciler.handle_event(&last_change(&[
            ("CurrentTrackURI", "http://m/one.mp3"),
            ("CurrentTrackDuration", "0:03:00"),
        ]));
        invoker.position_response.lock().unwrap().extend([
            ("TrackURI".to_string(), "http://m/one.mp3".to_string()),
            ("TrackDuration".to_string(), "0:03:05".to_string()),
            ("RelTime".to_string(), "0:00:42".to_string()),
            ("AbsTime".to_string(), "0:00:42".to_string()),
        ]);
        ReconcilerInner::poll_position(&Arc::clone(&reconciler.inner));

        let status = reconciler.status();
        assert_eq!(status.duration, Some(185));
        assert_eq!(status.rel_time, Some(42));
    }

    #[test]
    fn playing_transition_starts_poll_and_leaving_stops_it() {
        let (reconciler, invoker) = reconciler();
        invoker.position_response.lock().unwrap().extend([
            ("TrackURI".to_string(), "http://m/one.mp3".to_string()),
            ("RelTime".to_string(), "0:00:01".to_string()),
        ]);

        reconciler.handle_event(&last_change(&[("TransportState", "PLAYING")]));
        thread::sleep(Duration::from_millis(70));
        let polled = invoker.position_polls.load(Ordering::SeqCst);
        assert!(polled >= 2, "poll never ran, saw {polled}");

        reconciler.handle_event(&last_change(&[("TransportState", "STOPPED")]));
        thread::sleep(Duration::from_millis(40));
        let at_stop = invoker.position_polls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(invoker.position_polls.load(Ordering::SeqCst), at_stop);
    }

    #[test]
    fn session_loss_stops_the_poll() {
        let (reconciler, invoker) = reconciler();
        invoker.position_response.lock().unwrap().extend([
            ("TrackURI".to_string(), "http://m/one.mp3".to_string()),
            ("RelTime".to_string(), "0:00:01".to_string()),
        ]);
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        reconciler.watch_session(status_rx);

        reconciler.handle_event(&last_change(&[("TransportState", "PLAYING")]));
        thread::sleep(Duration::from_millis(70));
        assert!(invoker.position_polls.load(Ordering::SeqCst) >= 2);

        status_tx.send(SessionStatus::Lost).unwrap();
        thread::sleep(Duration::from_millis(40));
        let at_loss = invoker.position_polls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(invoker.position_polls.load(Ordering::SeqCst), at_loss);
    }

    #[test]
    fn playing_merge_restarts_a_stopped_poll() {
        let (reconciler, invoker) = reconciler();
        invoker.position_response.lock().unwrap().extend([
            ("TrackURI".to_string(), "http://m/one.mp3".to_string()),
            ("RelTime".to_string(), "0:00:01".to_string()),
        ]);

        reconciler.handle_event(&last_change(&[("TransportState", "PLAYING")]));
        thread::sleep(Duration::from_millis(50));
        reconciler.stop_polling();
        thread::sleep(Duration::from_millis(40));
        let stopped_at = invoker.position_polls.load(Ordering::SeqCst);

        // transport still reads PLAYING, so a fresh PLAYING merge must
        // bring the poll back
        reconciler.handle_event(&last_change(&[
            ("TransportState", "PLAYING"),
            ("CurrentTrackURI", "http://m/one.mp3"),
        ]));
        thread::sleep(Duration::from_millis(70));
        assert!(
            invoker.position_polls.load(Ordering::SeqCst) > stopped_at,
            "poll was not restarted"
        );
    }

    #[test]
    fn sentinel_positions_do_not_overwrite_valid_ones() {
        let (reconciler, invoker) = reconciler();

        invoker.position_response.lock().unwrap().extend([
            ("TrackURI".to_string(), "http://m/one.mp3".to_string()),
            ("TrackDuration".to_string(), "0:03:00".to_string()),
            ("RelTime".to_string(), "0:00:42".to_string()),
            ("AbsTime".to_string(), "0:00:42".to_string()),
        ]);
        ReconcilerInner::poll_position(&reconciler.inner);
        assert_eq!(reconciler.status().rel_time, Some(42));

        invoker.position_response.lock().unwrap().extend([
            ("TrackDuration".to_string(), "NOT_IMPLEMENTED".to_string()),
            ("RelTime".to_string(), "-:--:--".to_string()),
            ("AbsTime".to_string(), String::new()),
        ]);
        ReconcilerInner::poll_position(&reconciler.inner);

        let status = reconciler.status();
        assert_eq!(status.duration, Some(180));
        assert_eq!(status.rel_time, Some(42));
        assert_eq!(status.abs_time, Some(42));
    }

    #[test]
    fn parse_position_rejects_sentinels() {
        assert_eq!(parse_position("0:00:42"), Some(42));
        assert_eq!(parse_position("1:01:01.500"), Some(3661));
        assert_eq!(parse_position("0:00:00"), Some(0));
        assert_eq!(parse_position("NOT_IMPLEMENTED"), None);
        assert_eq!(parse_position("-:--:--"), None);
        assert_eq!(parse_position(""), None);
        assert_eq!(parse_position("42"), None);
    }

    #[test]
    fn snapshots_only_on_change() {
        let (reconciler, _invoker) = reconciler();
        let updates = reconciler.updates();

        let event = last_change(&[("TransportState", "PAUSED_PLAYBACK")]);
        reconciler.handle_event(&event);
        assert_eq!(
            updates.try_recv().unwrap().transport_state,
            Some(TransportState::Paused)
        );

        // identical event, no new snapshot
        reconciler.handle_event(&event);
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn play_with_media_assigns_uri_first() {
        let (reconciler, invoker) = reconciler();
        let record = MediaObjectRecord {
            id: "t1".to_string(),
            name: "One".to_string(),
            file_uri: Some("http://m/one.mp3".to_string()),
            ..MediaObjectRecord::default()
        };

        reconciler
            .play(Some(MediaReference::Record(record)))
            .unwrap();
        assert_eq!(
            invoker.calls.lock().unwrap().as_slice(),
            ["SetAVTransportURI", "Play"]
        );
    }

    #[test]
    fn play_without_file_uri_is_rejected() {
        let (reconciler, invoker) = reconciler();
        let record = MediaObjectRecord {
            id: "t1".to_string(),
            name: "One".to_string(),
            ..MediaObjectRecord::default()
        };

        let err = reconciler
            .play(Some(MediaReference::Record(record)))
            .unwrap_err();
        assert!(matches!(err, ControlPointError::MissingFileUri(_)));
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn seek_uses_formatted_relative_time() {
        struct SeekCheck;
        impl ActionInvoker for SeekCheck {
            fn invoke_action(
                &self,
                action: &str,
                args: &[(&str, &str)],
                _service_type: &str,
            ) -> anyhow::Result<ActionResponse> {
                assert_eq!(action, "Seek");
                assert!(args.contains(&("Unit", "REL_TIME")));
                assert!(args.contains(&("Target", "1:01:01")));
                Ok(ActionResponse::default())
            }
        }

        let reconciler = RendererStateReconciler::new(Arc::new(SeekCheck));
        reconciler.seek(3661).unwrap();
    }
}

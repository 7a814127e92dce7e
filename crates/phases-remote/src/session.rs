//! Connection lifecycle for one controller: framing of the opening message,
//! acknowledgement handling, the status poll and dispatch of inbound frames.
//!
//! The session never touches the socket. Everything it wants sent goes
//! through the outbound queue, which the transport drains in order.

use std::collections::BTreeSet;
use std::time::Duration;

use phases_core::{
    cache::EntityCache,
    fanout::{Action, FanOut, MasterTransport},
    protocol::{decode_inbound, Inbound, Outbound, ProtocolError},
    surface::{ControlSurface, LinkedInput},
    view::{ConnectionState, ViewRenderer},
    EntityId, StatusData,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Handshake,
    Reconnect,
}

impl Framing {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Reconnect => "reconnect",
        }
    }

    fn message(self) -> Outbound {
        match self {
            Self::Handshake => Outbound::handshake(),
            Self::Reconnect => Outbound::reconnect(),
        }
    }
}

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Connect,
    Control { scope: EntityId, action: Action },
    SetBpm { input: LinkedInput, bpm: f64 },
    StartAll,
    StopAll,
    Show,
    Quit,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Control { action, .. } => action.as_str(),
            Self::SetBpm { .. } => "set_bpm",
            Self::StartAll => "start_all",
            Self::StopAll => "stop_all",
            Self::Show => "show",
            Self::Quit => "quit",
        }
    }
}

/// Periodic `fetch_status`. Dropping the timer stops it.
#[derive(Debug)]
pub struct PollTimer {
    handle: JoinHandle<()>,
}

impl PollTimer {
    pub fn start(period: Duration, outbound: mpsc::Sender<Outbound>) -> Self {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let handle = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if outbound.send(Outbound::FetchStatus).await.is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct Session {
    state: ConnectionState,
    pending: Option<Framing>,
    attempts: u64,
    cache: EntityCache,
    surface: Option<ControlSurface>,
    fanout: FanOut,
    poll: Option<PollTimer>,
    poll_interval: Duration,
    outbound: mpsc::Sender<Outbound>,
    renderer: Box<dyn ViewRenderer + Send>,
}

impl Session {
    pub fn new(
        poll_interval: Duration,
        outbound: mpsc::Sender<Outbound>,
        renderer: Box<dyn ViewRenderer + Send>,
    ) -> Self {
        Self::with_fanout(poll_interval, outbound, renderer, FanOut::new())
    }

    pub fn with_fanout(
        poll_interval: Duration,
        outbound: mpsc::Sender<Outbound>,
        renderer: Box<dyn ViewRenderer + Send>,
        fanout: FanOut,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            pending: None,
            attempts: 0,
            cache: EntityCache::new(),
            surface: None,
            fanout,
            poll: None,
            poll_interval,
            outbound,
            renderer,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn surface(&self) -> Option<&ControlSurface> {
        self.surface.as_ref()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.as_ref().is_some_and(PollTimer::is_active)
    }

    /// Moves to `Connecting` and picks the framing for the opening message:
    /// handshake on the first attempt of the process, reconnect afterwards.
    /// `None` while a connection is pending or established.
    pub fn begin_connect(&mut self) -> Option<Framing> {
        if !self.state.can_connect() {
            debug!(event = "connect_ignored", state = %self.state);
            return None;
        }
        let framing = if self.attempts == 0 {
            Framing::Handshake
        } else {
            Framing::Reconnect
        };
        self.attempts += 1;
        self.pending = Some(framing);
        self.set_state(ConnectionState::Connecting);
        Some(framing)
    }

    /// Socket is open: queue exactly one opening message.
    pub fn on_open(&mut self) {
        match self.pending {
            Some(framing) => {
                info!(event = "socket_open", framing = framing.as_str());
                self.enqueue(framing.message());
            }
            None => warn!(event = "socket_open_without_connect"),
        }
    }

    pub fn on_close(&mut self) {
        self.poll = None;
        self.pending = None;
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    pub fn handle_text(&mut self, text: &str) {
        match decode_inbound(text) {
            Ok(inbound) => self.dispatch(inbound),
            Err(ProtocolError::UnknownType(kind)) => {
                warn!(event = "inbound_dropped", kind = %kind);
            }
            Err(err) => {
                error!(event = "inbound_malformed", error = %err);
            }
        }
    }

    pub fn dispatch(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Status(data) => self.apply_status(&data),
            Inbound::Handshake(data) => self.establish(Framing::Handshake, &data),
            Inbound::Reconnect(data) => self.establish(Framing::Reconnect, &data),
            Inbound::Result(data) => info!(event = "controller_result", data = %data),
            Inbound::Message(data) => info!(event = "controller_message", data = %data),
            Inbound::Error(data) => error!(event = "controller_error", data = %data),
        }
    }

    /// Applies a control or transport intent and queues the resulting
    /// command. Dropped unless connected.
    pub fn submit(&mut self, intent: Intent) {
        let kind = intent.as_str();
        if self.state != ConnectionState::Connected {
            warn!(event = "command_dropped", reason = "not_connected", intent = kind);
            return;
        }
        let Some(surface) = self.surface.as_mut() else {
            warn!(event = "command_dropped", reason = "no_surface", intent = kind);
            return;
        };
        let mut touched = BTreeSet::new();
        let message = match intent {
            Intent::Control { scope, action } => {
                match self.fanout.apply(surface, &scope, &action) {
                    Ok(message) => {
                        touched = mirrored_rows(surface, scope);
                        message
                    }
                    Err(err) => {
                        warn!(event = "control_rejected", action = action.as_str(), error = %err);
                        return;
                    }
                }
            }
            Intent::SetBpm { input, bpm } => {
                touched.insert(EntityId::Master);
                MasterTransport::set_bpm(surface, input, bpm)
            }
            Intent::StartAll => MasterTransport::start_all(),
            Intent::StopAll => MasterTransport::stop_all(),
            Intent::Connect | Intent::Show | Intent::Quit => {
                debug!(event = "intent_not_a_command", intent = kind);
                return;
            }
        };
        if !touched.is_empty() {
            self.renderer.refresh(surface, &touched);
        }
        self.enqueue(message);
    }

    pub fn show(&mut self) {
        match self.surface.as_ref() {
            Some(surface) => self.renderer.rebuild(surface),
            None => info!(event = "nothing_to_show", state = %self.state),
        }
    }

    fn establish(&mut self, framing: Framing, data: &StatusData) {
        match (self.state, self.pending) {
            (ConnectionState::Disconnected, _) => {
                warn!(event = "ack_ignored", reason = "disconnected", framing = framing.as_str());
                return;
            }
            (ConnectionState::Connecting, Some(expected)) if expected != framing => {
                warn!(
                    event = "ack_ignored",
                    reason = "framing_mismatch",
                    expected = expected.as_str(),
                    framing = framing.as_str()
                );
                return;
            }
            _ => {}
        }
        self.pending = None;
        if self.state != ConnectionState::Connected {
            self.set_state(ConnectionState::Connected);
        }

        // Full teardown before rebuilding from the acknowledged roster.
        self.surface = None;
        self.cache.clear();
        self.cache.apply_status_snapshot(data);
        let surface = ControlSurface::build(data);
        self.renderer.rebuild(&surface);
        self.surface = Some(surface);

        // At most one poll timer, whatever the number of acks.
        self.poll.take();
        self.poll = Some(PollTimer::start(self.poll_interval, self.outbound.clone()));
        info!(
            event = "session_established",
            framing = framing.as_str(),
            sequencers = ?data.sequencer_ids()
        );
    }

    fn apply_status(&mut self, data: &StatusData) {
        let changed = self.cache.apply_status_snapshot(data);
        debug!(
            event = "status_applied",
            changed = changed.len(),
            snapshots = self.cache.snapshots_applied()
        );
        match self.surface.as_mut() {
            Some(surface) => {
                surface.apply_snapshot(data);
                self.renderer.refresh(surface, &changed);
            }
            None => debug!(event = "status_before_ack", sequencers = ?data.sequencer_ids()),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        info!(event = "connection_state", state = %state);
        self.renderer.connection_changed(state);
    }

    fn enqueue(&self, message: Outbound) {
        match self.outbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(event = "outbound_queue_full", kind = message.kind());
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                warn!(event = "outbound_queue_closed", kind = message.kind());
            }
        }
    }
}

/// Rows a control edit was mirrored onto.
fn mirrored_rows(surface: &ControlSurface, scope: EntityId) -> BTreeSet<EntityId> {
    match scope {
        EntityId::Master => std::iter::once(EntityId::Master)
            .chain(surface.roster().into_iter().map(EntityId::Sequencer))
            .collect(),
        sequencer => BTreeSet::from([sequencer]),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use phases_core::protocol::Attribute;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    pub(crate) struct RecordingRenderer {
        pub(crate) events: Arc<StdMutex<Vec<String>>>,
    }

    impl RecordingRenderer {
        pub(crate) fn events(&self) -> Vec<String> {
            self.events.lock().expect("events").clone()
        }
    }

    impl ViewRenderer for RecordingRenderer {
        fn rebuild(&mut self, surface: &ControlSurface) {
            self.events
                .lock()
                .expect("events")
                .push(format!("rebuild:{}", surface.roster().join(",")));
        }

        fn refresh(&mut self, _surface: &ControlSurface, changed: &BTreeSet<EntityId>) {
            self.events
                .lock()
                .expect("events")
                .push(format!("refresh:{}", changed.len()));
        }

        fn connection_changed(&mut self, state: ConnectionState) {
            self.events
                .lock()
                .expect("events")
                .push(format!("state:{}", state.as_str()));
        }
    }

    fn status_json(id: &str, index: i64) -> Value {
        json!({
            "id": id,
            "length": 8,
            "index": index,
            "loop_point": 8,
            "state": 0,
            "multiplier": 1.0,
            "sync": false,
            "percentage": 1.0,
            "interval": 0.5
        })
    }

    pub(crate) fn frame(kind: &str, ids: &[&str], index: i64) -> String {
        let statuses: Vec<Value> = ids.iter().map(|id| status_json(id, index)).collect();
        json!({
            "type": kind,
            "data": {
                "master_sequencer_status": status_json("master", index),
                "sequencer_statuses": statuses,
                "is_running": false
            }
        })
        .to_string()
    }

    fn session(period_ms: u64) -> (Session, mpsc::Receiver<Outbound>, RecordingRenderer) {
        let (tx, rx) = mpsc::channel(256);
        let renderer = RecordingRenderer::default();
        let session = Session::with_fanout(
            Duration::from_millis(period_ms),
            tx,
            Box::new(renderer.clone()),
            FanOut::with_seed(3),
        );
        (session, rx, renderer)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn connected(ids: &[&str]) -> (Session, mpsc::Receiver<Outbound>, RecordingRenderer) {
        let (mut session, mut rx, renderer) = session(50);
        session.begin_connect();
        session.on_open();
        session.handle_text(&frame("handshake", ids, 0));
        drain(&mut rx);
        (session, rx, renderer)
    }

    #[tokio::test]
    async fn first_connect_handshakes_and_later_ones_reconnect() {
        let (mut session, mut rx, _) = session(50);
        assert_eq!(session.begin_connect(), Some(Framing::Handshake));
        assert_eq!(session.begin_connect(), None);
        session.on_open();
        assert_eq!(drain(&mut rx), vec![Outbound::handshake()]);

        session.on_close();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.begin_connect(), Some(Framing::Reconnect));
        session.on_open();
        assert_eq!(drain(&mut rx), vec![Outbound::reconnect()]);
    }

    #[tokio::test]
    async fn connect_is_ignored_while_connected() {
        let (mut session, _rx, _) = connected(&["a"]);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.begin_connect(), None);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_acks_keep_a_single_poll_timer() {
        let (mut session, mut rx, _) = session(50);
        session.begin_connect();
        session.on_open();
        session.handle_text(&frame("handshake", &["a", "b"], 0));
        for _ in 0..3 {
            session.handle_text(&frame("reconnect", &["a", "b"], 0));
        }
        assert!(session.is_polling());

        time::sleep(Duration::from_millis(525)).await;
        let polls = drain(&mut rx)
            .into_iter()
            .filter(|message| *message == Outbound::FetchStatus)
            .count();
        assert_eq!(polls, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_polling() {
        let (mut session, mut rx, _) = connected(&["a"]);
        time::sleep(Duration::from_millis(120)).await;
        assert_eq!(drain(&mut rx).len(), 2);

        session.on_close();
        assert!(!session.is_polling());
        time::sleep(Duration::from_millis(500)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn ack_tears_down_and_rebuilds_from_new_roster() {
        let (mut session, _rx, renderer) = connected(&["a", "b"]);
        session.handle_text(&frame("reconnect", &["c"], 0));

        assert_eq!(session.cache().sequencer_ids(), vec!["c".to_string()]);
        let surface = session.surface().expect("surface");
        assert_eq!(surface.roster(), vec!["c".to_string()]);
        let rebuilds: Vec<String> = renderer
            .events()
            .into_iter()
            .filter(|event| event.starts_with("rebuild"))
            .collect();
        assert_eq!(rebuilds, vec!["rebuild:a,b".to_string(), "rebuild:c".to_string()]);
    }

    #[tokio::test]
    async fn mismatched_ack_while_connecting_is_ignored() {
        let (mut session, _rx, _) = session(50);
        session.begin_connect();
        session.handle_text(&frame("reconnect", &["a"], 0));
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.surface().is_none());
        assert!(!session.is_polling());
    }

    #[tokio::test]
    async fn status_updates_cache_and_refreshes_view() {
        let (mut session, _rx, renderer) = connected(&["a", "b"]);
        session.handle_text(&frame("status", &["a", "b"], 3));

        assert_eq!(session.cache().sequencer("a").map(|s| s.index), Some(3));
        let row = session.surface().and_then(|s| s.row("b")).expect("row b");
        assert_eq!(row.current(), Some(3));
        assert_eq!(renderer.events().last().map(String::as_str), Some("refresh:3"));
    }

    #[tokio::test]
    async fn bad_frames_leave_state_untouched() {
        let (mut session, _rx, _) = connected(&["a"]);
        let before = session.cache().clone();
        session.handle_text(r#"{"type":"telemetry","data":{}}"#);
        session.handle_text(r#"{"type":"status","data":{"sequencer_statuses":[]}}"#);
        session.handle_text("not json");
        session.handle_text(r#"{"type":"error","data":"no such sequencer"}"#);
        assert_eq!(session.cache(), &before);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn master_control_queues_one_batched_set() {
        let (mut session, mut rx, renderer) = connected(&["a", "b", "c"]);
        session.submit(Intent::Control {
            scope: EntityId::Master,
            action: Action::SetSync(true),
        });

        assert_eq!(renderer.events().last().map(String::as_str), Some("refresh:4"));
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        let ids: Vec<_> = sent[0]
            .targets()
            .iter()
            .map(|target| target.id.clone().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        for target in sent[0].targets() {
            assert_eq!(target.attributes, vec![Attribute::Sync { value: true }]);
        }
    }

    #[tokio::test]
    async fn rejected_control_sends_nothing() {
        let (mut session, mut rx, _) = connected(&["a"]);
        session.submit(Intent::Control {
            scope: EntityId::sequencer("zz"),
            action: Action::SetSync(true),
        });
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn commands_are_dropped_while_disconnected() {
        let (mut session, mut rx, _) = session(50);
        session.submit(Intent::StartAll);
        assert!(drain(&mut rx).is_empty());

        let (mut session, mut rx, renderer) = connected(&["a"]);
        let seen = renderer.events().len();
        session.submit(Intent::StartAll);
        assert_eq!(drain(&mut rx), vec![Outbound::StartAll]);
        assert_eq!(renderer.events().len(), seen);
    }
}

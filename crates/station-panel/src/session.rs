/// PanelSession: single-owner event loop for one open control panel.
///
/// The session owns the target's ViewState (through the reconciler), the
/// command gate and the debounce timers; no other task touches them.  Every
/// input arrives as a `SessionEvent` on one mpsc channel and is handled in
/// arrival order:
///
///   intents from the front end
///   push frames and link changes from the connection task
///   snapshot results, command settlements and cooldown releases from
///   short-lived request tasks
///   equalizer flushes from the debouncer
///
/// After each event that changes what the panel shows, the session
/// broadcasts a full `ViewFrame`.  A fixed tick repaints the progress while
/// a track is loaded, but only when the displayed second moves.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use station_proto::config::SyncConfig;
use station_proto::protocol::{ControlReply, EqBand, StatusUpdate, TargetId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backend::StationBackend;
use crate::bot_status::BotHealth;
use crate::connection::{spawn_connection, Backoff, LinkState, StreamConnector};
use crate::debounce::Debouncer;
use crate::dispatcher::{command_for, equalizer_command, Command, CommandDispatcher, Intent};
use crate::error::{Result, SyncError};
use crate::gate::{ControlId, Ticket};
use crate::notice::Notice;
use crate::reconciler::{EditField, EditLocks, StateReconciler};
use crate::view_state::{format_clock, ViewState};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into a session loop.  Everything produced by a task carries the
/// target it was started for; events for another target are dropped.
#[derive(Debug)]
pub enum SessionEvent {
    Intent(Intent),
    Link {
        target: TargetId,
        state: LinkState,
    },
    /// Push stream is up; pull a snapshot to fill the gap.
    ChannelOpened {
        target: TargetId,
    },
    /// One text frame from the push stream, still unparsed.
    Inbound {
        target: TargetId,
        payload: String,
    },
    SnapshotLoaded {
        target: TargetId,
        result: Result<StatusUpdate>,
    },
    CommandSettled {
        target: TargetId,
        control: ControlId,
        ticket: Ticket,
        command: Command,
        result: Result<ControlReply>,
    },
    ControlReleased {
        target: TargetId,
        control: ControlId,
        ticket: Ticket,
    },
    EqFlush {
        target: TargetId,
        band: EqBand,
        gain: f64,
    },
    /// Delayed re-pull after `play`.
    ResyncDue {
        target: TargetId,
    },
    Close,
}

impl SessionEvent {
    fn target(&self) -> Option<&str> {
        match self {
            SessionEvent::Intent(_) | SessionEvent::Close => None,
            SessionEvent::Link { target, .. }
            | SessionEvent::ChannelOpened { target }
            | SessionEvent::Inbound { target, .. }
            | SessionEvent::SnapshotLoaded { target, .. }
            | SessionEvent::CommandSettled { target, .. }
            | SessionEvent::ControlReleased { target, .. }
            | SessionEvent::EqFlush { target, .. }
            | SessionEvent::ResyncDue { target } => Some(target),
        }
    }
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Everything a renderer needs for one paint.
#[derive(Debug, Clone)]
pub struct ViewFrame {
    pub target: TargetId,
    pub view: ViewState,
    /// Interpolated elapsed seconds at the moment the frame was built.
    pub displayed_elapsed: f64,
    pub link: LinkState,
    pub busy: Vec<ControlId>,
    /// Slider positions the user holds that the backend has not confirmed.
    /// `view` keeps the authoritative values meanwhile.
    pub drafts: SliderDrafts,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliderDrafts {
    pub volume: Option<u8>,
    pub equalizer: Vec<(EqBand, f64)>,
}

impl SliderDrafts {
    fn from_locks(locks: &EditLocks) -> Self {
        Self {
            volume: locks
                .draft(EditField::Volume)
                .map(|v| v.round().clamp(0.0, 100.0) as u8),
            equalizer: EqBand::ALL
                .into_iter()
                .filter_map(|band| {
                    locks
                        .draft(EditField::Equalizer(band))
                        .map(|gain| (band, gain))
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.equalizer.is_empty()
    }
}

impl ViewFrame {
    pub fn is_busy(&self, control: ControlId) -> bool {
        self.busy.contains(&control)
    }

    /// One-line rendering for logs and the headless front end.
    pub fn summary_line(&self) -> String {
        let view = &self.view;
        let now_playing = match &view.current_track {
            Some(track) => {
                let total = track
                    .duration_seconds
                    .map(format_clock)
                    .unwrap_or_else(|| "live".to_string());
                format!(
                    "{} {} ({}) {}/{}",
                    if view.is_paused { "||" } else { ">" },
                    track.title,
                    track.requester,
                    format_clock(self.displayed_elapsed),
                    total
                )
            }
            None => "idle".to_string(),
        };
        let on_off = |b: bool| if b { "on" } else { "off" };
        let mut line = format!(
            "{} [{}] {} | vol {} | bass {} | auto {} | eq {:+}/{:+}/{:+} | queue {} | played {} top {}",
            self.target,
            self.link.badge_label(),
            now_playing,
            view.volume_percent,
            on_off(view.bass_boost_enabled),
            on_off(view.autoplay_enabled),
            view.equalizer_gains.low,
            view.equalizer_gains.mid,
            view.equalizer_gains.high,
            view.queue.len(),
            view.stats.total_played,
            view.stats.top_track_label,
        );
        if let Some(volume) = self.drafts.volume {
            line.push_str(&format!(" | vol draft {}", volume));
        }
        for (band, gain) in &self.drafts.equalizer {
            line.push_str(&format!(" | eq {} draft {:+}", band.as_str(), gain));
        }
        if !self.busy.is_empty() {
            let busy: Vec<String> = self.busy.iter().map(|c| c.label()).collect();
            line.push_str(&format!(" | busy {}", busy.join(",")));
        }
        line
    }
}

/// Broadcast to everything rendering the dashboard.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// Full state after a change; never a diff.
    Frame(Arc<ViewFrame>),
    Notice { target: TargetId, notice: Notice },
    Bot(BotHealth),
    /// Outcome of a dashboard-wide request such as starting the bot.
    System(Notice),
    Closed { target: TargetId },
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

/// Owner-side handle.  Dropping it does not stop the session; call `close`.
pub struct SessionHandle {
    target: TargetId,
    tx: mpsc::Sender<SessionEvent>,
    broadcast: broadcast::Sender<PanelEvent>,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn send(&self, intent: Intent) -> Result<()> {
        if !self.is_active() {
            return Err(SyncError::SessionClosed);
        }
        self.tx
            .send(SessionEvent::Intent(intent))
            .await
            .map_err(|_| SyncError::SessionClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.broadcast.subscribe()
    }

    /// Tear the session down and wait for its loop to finish.
    pub async fn close(self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("session {}: task failed: {}", self.target, e);
            }
        }
    }
}

// ── PanelSession ──────────────────────────────────────────────────────────────

pub struct PanelSession {
    target: TargetId,
    reconciler: StateReconciler,
    dispatcher: CommandDispatcher,
    debouncer: Debouncer<EqBand, SessionEvent>,
    backend: Arc<dyn StationBackend>,
    events: mpsc::Sender<SessionEvent>,
    broadcast: broadcast::Sender<PanelEvent>,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    link: LinkState,
    tick_interval: Duration,
    /// Whole second shown by the last frame.
    last_second: Option<u64>,
    snapshot_in_flight: bool,
}

impl PanelSession {
    /// Start a session for `target`: connection task, then the event loop.
    pub fn open(
        target: TargetId,
        backend: Arc<dyn StationBackend>,
        connector: Arc<dyn StreamConnector>,
        sync: &SyncConfig,
        broadcast: broadcast::Sender<PanelEvent>,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicBool::new(true));

        let session = PanelSession {
            target: target.clone(),
            reconciler: StateReconciler::new(Instant::now()),
            dispatcher: CommandDispatcher::new(
                target.clone(),
                Arc::clone(&backend),
                tx.clone(),
                cancel.clone(),
                sync,
            ),
            debouncer: Debouncer::new(sync.eq_debounce(), tx.clone()),
            backend,
            events: tx.clone(),
            broadcast: broadcast.clone(),
            cancel: cancel.clone(),
            active: Arc::clone(&active),
            link: LinkState::Connecting,
            tick_interval: sync.tick_interval(),
            last_second: None,
            snapshot_in_flight: false,
        };

        let connection = spawn_connection(
            connector,
            target.clone(),
            tx.clone(),
            cancel.clone(),
            Arc::clone(&active),
            Backoff::from_config(sync),
        );
        let task = tokio::spawn(session.run(rx, connection));

        SessionHandle {
            target,
            tx,
            broadcast,
            cancel,
            active,
            task,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>, connection: JoinHandle<()>) {
        info!("session {}: starting event loop", self.target);

        let cancel = self.cancel.clone();
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.publish_frame(Instant::now());
        // Fill the panel right away; the push stream may take a while or
        // never come up.  The pull after ChannelOpened folds into this one.
        self.request_snapshot();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session {}: cancelled", self.target);
                    break;
                }
                _ = tick.tick(), if self.reconciler.clock_armed() => {
                    self.on_tick(Instant::now());
                }
                event = rx.recv() => match event {
                    None | Some(SessionEvent::Close) => break,
                    Some(event) => self.handle_event(event),
                },
            }
        }

        self.teardown();
        // The connection task may be parked on a full channel; closing the
        // receiver unblocks it.
        drop(rx);
        let _ = connection.await;
    }

    fn handle_event(&mut self, event: SessionEvent) {
        if let Some(target) = event.target() {
            if target != self.target {
                debug!(
                    "session {}: dropping stale event for {}",
                    self.target, target
                );
                return;
            }
        }
        let now = Instant::now();

        match event {
            SessionEvent::Intent(intent) => self.on_intent(intent, now),

            SessionEvent::Link { state, .. } => {
                if state != self.link {
                    debug!("session {}: link {:?}", self.target, state);
                    self.link = state;
                    self.publish_frame(now);
                }
            }

            SessionEvent::ChannelOpened { .. } => self.request_snapshot(),

            SessionEvent::Inbound { payload, .. } => {
                match self.reconciler.apply_raw(&payload, now) {
                    Ok(true) => self.publish_frame(now),
                    Ok(false) => trace!("session {}: push changed nothing", self.target),
                    Err(e) => warn!("session {}: dropping push: {}", self.target, e),
                }
            }

            SessionEvent::SnapshotLoaded { result, .. } => {
                self.snapshot_in_flight = false;
                match result {
                    Ok(update) => {
                        if self.reconciler.apply(update, now) {
                            self.publish_frame(now);
                        }
                    }
                    Err(e @ SyncError::Rejected { .. }) => {
                        warn!("session {}: snapshot rejected: {}", self.target, e);
                        self.notify(Notice::warning(format!("could not load player: {}", e)));
                    }
                    Err(e) => warn!("session {}: snapshot failed: {}", self.target, e),
                }
            }

            SessionEvent::CommandSettled {
                control,
                command,
                result,
                ..
            } => {
                if let Some(notice) = self.dispatcher.settle(control, &command, result) {
                    self.notify(notice);
                }
            }

            SessionEvent::ControlReleased {
                control, ticket, ..
            } => {
                self.dispatcher
                    .release(control, ticket, &mut self.reconciler, now);
                if let ControlId::Equalizer(band) = control {
                    if !self.dispatcher.is_busy(control) && !self.debouncer.is_pending(&band) {
                        self.reconciler.end_edit(EditField::Equalizer(band));
                    }
                }
                self.publish_frame(now);
            }

            SessionEvent::EqFlush { band, gain, .. } => {
                let (control, command) = equalizer_command(band, gain);
                self.dispatcher
                    .dispatch(control, command, &mut self.reconciler, now);
                self.publish_frame(now);
            }

            SessionEvent::ResyncDue { .. } => self.request_snapshot(),

            SessionEvent::Close => {}
        }
    }

    fn on_intent(&mut self, intent: Intent, now: Instant) {
        debug!("session {}: intent {:?}", self.target, intent);
        match &intent {
            Intent::BeginVolumeDrag => self.reconciler.begin_edit(EditField::Volume),
            Intent::EndVolumeDrag => {
                self.reconciler.end_edit(EditField::Volume);
            }
            Intent::SetVolume { level } => {
                self.reconciler
                    .draft_edit(EditField::Volume, f64::from((*level).min(100)));
            }
            Intent::SetEqualizer { band, gain } => {
                self.reconciler.begin_edit(EditField::Equalizer(*band));
                self.reconciler
                    .draft_edit(EditField::Equalizer(*band), *gain);
                let flush = SessionEvent::EqFlush {
                    target: self.target.clone(),
                    band: *band,
                    gain: *gain,
                };
                self.debouncer.schedule(*band, flush);
            }
            Intent::Refresh => self.request_snapshot(),
            _ => {}
        }

        if let Some((control, command)) = command_for(&intent, self.reconciler.view()) {
            self.dispatcher
                .dispatch(control, command, &mut self.reconciler, now);
        }
        self.publish_frame(now);
    }

    fn on_tick(&mut self, now: Instant) {
        let second = self.reconciler.displayed_elapsed(now).floor() as u64;
        if self.last_second != Some(second) {
            self.publish_frame(now);
        }
    }

    /// At most one pull in flight; later requests fold into it.
    fn request_snapshot(&mut self) {
        if self.snapshot_in_flight {
            debug!("session {}: snapshot already in flight", self.target);
            return;
        }
        self.snapshot_in_flight = true;

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let target = self.target.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = backend.status(&target) => result,
            };
            let _ = events
                .send(SessionEvent::SnapshotLoaded { target, result })
                .await;
        });
    }

    fn publish_frame(&mut self, now: Instant) {
        let displayed_elapsed = self.reconciler.displayed_elapsed(now);
        self.last_second = Some(displayed_elapsed.floor() as u64);
        let frame = ViewFrame {
            target: self.target.clone(),
            view: self.reconciler.view().clone(),
            displayed_elapsed,
            link: self.link,
            busy: self.dispatcher.busy_controls(),
            drafts: SliderDrafts::from_locks(self.reconciler.locks()),
        };
        // No subscribers is fine; the next frame carries the full state.
        let _ = self.broadcast.send(PanelEvent::Frame(Arc::new(frame)));
    }

    fn notify(&self, notice: Notice) {
        info!("session {}: notice: {}", self.target, notice.message);
        let _ = self.broadcast.send(PanelEvent::Notice {
            target: self.target.clone(),
            notice,
        });
    }

    fn teardown(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.debouncer.cancel_all();
        self.dispatcher.reset();
        self.reconciler.clear_edits();
        self.link = LinkState::Closed;
        info!("session {}: closed", self.target);
        let _ = self.broadcast.send(PanelEvent::Closed {
            target: self.target.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::StreamFrame;
    use crate::testing::{playing_snapshot, ChannelConnector, MockBackend};
    use station_proto::protocol::{ControlAction, QueueEntry};
    use tokio::sync::broadcast::error::RecvError;

    struct Rig {
        backend: Arc<MockBackend>,
        connector: Arc<ChannelConnector>,
        push: mpsc::UnboundedSender<StreamFrame>,
        handle: SessionHandle,
        rx: broadcast::Receiver<PanelEvent>,
    }

    fn open(snapshot: StatusUpdate) -> Rig {
        let (connector, push) = ChannelConnector::new();
        open_with(snapshot, connector, push)
    }

    fn open_with(
        snapshot: StatusUpdate,
        connector: Arc<ChannelConnector>,
        push: mpsc::UnboundedSender<StreamFrame>,
    ) -> Rig {
        let backend = MockBackend::new(snapshot);
        let (broadcast_tx, rx) = broadcast::channel(256);
        let handle = PanelSession::open(
            "guild-1".to_string(),
            backend.clone(),
            connector.clone(),
            &SyncConfig::default(),
            broadcast_tx,
        );
        Rig {
            backend,
            connector,
            push,
            handle,
            rx,
        }
    }

    fn push_json(rig: &Rig, json: &str) {
        rig.push.send(StreamFrame::Text(json.to_string())).unwrap();
    }

    async fn next_frame(
        rx: &mut broadcast::Receiver<PanelEvent>,
        pred: impl Fn(&ViewFrame) -> bool,
    ) -> Arc<ViewFrame> {
        loop {
            match tokio::time::timeout(Duration::from_secs(30), rx.recv()).await {
                Ok(Ok(PanelEvent::Frame(frame))) if pred(&frame) => return frame,
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => panic!("broadcast closed"),
                Err(_) => panic!("no matching frame within 30s"),
            }
        }
    }

    async fn next_notice(rx: &mut broadcast::Receiver<PanelEvent>) -> Notice {
        loop {
            match tokio::time::timeout(Duration::from_secs(30), rx.recv()).await {
                Ok(Ok(PanelEvent::Notice { notice, .. })) => return notice,
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
                _ => panic!("no notice"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_pulls_snapshot_over_live_stream() {
        let mut rig = open(playing_snapshot(false));
        let frame = next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;

        assert_eq!(frame.link, LinkState::Live);
        assert_eq!(frame.view.volume_percent, 80);
        assert_eq!(frame.view.channel_label.as_deref(), Some("Lounge"));
        assert_eq!(rig.backend.status_pulls(), 1);
        assert_eq!(rig.connector.opens(), 1);
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_advances_display_by_whole_seconds() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;

        let frame = next_frame(&mut rig.rx, |f| f.displayed_elapsed >= 35.0).await;
        assert!(frame.displayed_elapsed < 36.0);
        // ticks never write the authoritative position
        assert_eq!(frame.view.elapsed_seconds, 30.0);
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_applied_and_malformed_push_dropped() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;

        push_json(&rig, "{not json");
        push_json(&rig, r#"{"bass_boost": true}"#);
        let frame = next_frame(&mut rig.rx, |f| f.view.bass_boost_enabled).await;
        assert_eq!(frame.view.volume_percent, 80);
        assert_eq!(frame.view.queue.len(), 1);
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_while_paused_sends_resume() {
        let mut rig = open(playing_snapshot(true));
        next_frame(&mut rig.rx, |f| f.view.is_paused).await;

        rig.handle.send(Intent::Toggle).await.unwrap();
        let frame = next_frame(&mut rig.rx, |f| !f.view.is_paused).await;
        assert!(frame.is_busy(ControlId::Pause));

        next_frame(&mut rig.rx, |f| !f.is_busy(ControlId::Pause)).await;
        assert_eq!(rig.backend.command_names(), vec!["resume"]);
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_pulled_while_stream_is_down() {
        let (connector, push) = ChannelConnector::refusing();
        let mut rig = open_with(playing_snapshot(false), connector, push);

        let frame = next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;
        assert_ne!(frame.link, LinkState::Live);
        assert_eq!(frame.view.volume_percent, 80);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rig.backend.status_pulls(), 1);
        assert!(rig.connector.opens() >= 2);
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_during_volume_drag_keeps_authoritative_volume() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;

        rig.handle.send(Intent::BeginVolumeDrag).await.unwrap();
        rig.handle
            .send(Intent::SetVolume { level: 55 })
            .await
            .unwrap();
        let frame = next_frame(&mut rig.rx, |f| f.drafts.volume == Some(55)).await;
        assert_eq!(frame.view.volume_percent, 80);

        push_json(&rig, r#"{"volume": 12, "auto_play": true}"#);
        let frame = next_frame(&mut rig.rx, |f| f.view.autoplay_enabled).await;
        assert_eq!(frame.view.volume_percent, 80);

        rig.handle.send(Intent::EndVolumeDrag).await.unwrap();
        let frame = next_frame(&mut rig.rx, |f| f.drafts.is_empty()).await;
        assert_eq!(frame.view.volume_percent, 80);

        push_json(&rig, r#"{"volume": 12}"#);
        next_frame(&mut rig.rx, |f| f.view.volume_percent == 12).await;
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_volume_leaves_view_untouched() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;
        rig.backend.reject_with(403, "DJ role required");

        rig.handle
            .send(Intent::SetVolume { level: 12 })
            .await
            .unwrap();
        let notice = next_notice(&mut rig.rx).await;
        assert_eq!(notice.control, Some(ControlId::Volume));

        let frame = next_frame(&mut rig.rx, |f| !f.is_busy(ControlId::Volume)).await;
        assert_eq!(frame.view.volume_percent, 80);
        assert!(frame.drafts.is_empty());
        assert_eq!(
            rig.backend.commands(),
            vec![Command::Control(ControlAction::Volume { level: 12 })]
        );
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_shrinks_after_delete() {
        let mut snapshot = playing_snapshot(false);
        snapshot.queue = Some(
            (0..5)
                .map(|i| QueueEntry {
                    title: format!("q{}", i),
                    ..Default::default()
                })
                .collect(),
        );
        let mut rig = open(snapshot);
        next_frame(&mut rig.rx, |f| f.view.queue.len() == 5).await;

        rig.handle
            .send(Intent::DeleteQueue { index: 2 })
            .await
            .unwrap();
        push_json(
            &rig,
            r#"{"queue": [{"title":"q0"},{"title":"q1"},{"title":"q3"},{"title":"q4"}]}"#,
        );
        let frame = next_frame(&mut rig.rx, |f| f.view.queue.len() == 4).await;
        let titles: Vec<&str> = frame.view.queue.iter().map(|q| q.title.as_str()).collect();
        assert_eq!(titles, vec!["q0", "q1", "q3", "q4"]);
        assert_eq!(
            rig.backend.commands(),
            vec![Command::Control(ControlAction::DeleteQueue { index: 2 })]
        );
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_equalizer_burst_sends_once_per_band() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;

        for gain in [1.0, 2.0, 4.0] {
            rig.handle
                .send(Intent::SetEqualizer {
                    band: EqBand::Low,
                    gain,
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        rig.handle
            .send(Intent::SetEqualizer {
                band: EqBand::High,
                gain: -2.0,
            })
            .await
            .unwrap();
        let frame = next_frame(&mut rig.rx, |f| f.drafts.equalizer.len() == 2).await;
        assert_eq!(frame.drafts.equalizer, vec![(EqBand::Low, 4.0), (EqBand::High, -2.0)]);
        assert_eq!(frame.view.equalizer_gains.low, 0.0);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut sent = rig.backend.commands();
        sent.sort_by_key(|c| format!("{:?}", c));
        assert_eq!(
            sent,
            vec![
                Command::Control(ControlAction::Equalizer {
                    band: EqBand::High,
                    gain: -2
                }),
                Command::Control(ControlAction::Equalizer {
                    band: EqBand::Low,
                    gain: 4
                }),
            ]
        );
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_becomes_notice() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;
        rig.backend.reject_with(400, "Bot not in voice channel");

        rig.handle.send(Intent::Skip).await.unwrap();
        let notice = next_notice(&mut rig.rx).await;
        assert_eq!(notice.message, "Bot not in voice channel");
        assert_eq!(notice.control, Some(ControlId::Skip));
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_re_pulls_snapshot_later() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;
        let pulls = rig.backend.status_pulls();

        rig.handle
            .send(Intent::Play {
                query: "lofi".into(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rig.backend.status_pulls(), pulls);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rig.backend.status_pulls(), pulls + 1);
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_target_events_are_dropped() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;

        rig.handle
            .tx
            .send(SessionEvent::Inbound {
                target: "guild-2".to_string(),
                payload: r#"{"volume": 5}"#.to_string(),
            })
            .await
            .unwrap();
        push_json(&rig, r#"{"volume": 7}"#);
        let frame = next_frame(&mut rig.rx, |f| f.view.volume_percent != 80).await;
        assert_eq!(frame.view.volume_percent, 7);
        rig.handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_everything() {
        let mut rig = open(playing_snapshot(false));
        next_frame(&mut rig.rx, |f| f.view.current_track.is_some()).await;

        // drop the stream; the session goes into backoff
        drop(rig.push);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let tx = rig.handle.tx.clone();
        rig.handle.close().await;

        let mut closed = false;
        while let Ok(event) = rig.rx.try_recv() {
            if let PanelEvent::Closed { target } = event {
                assert_eq!(target, "guild-1");
                closed = true;
            }
        }
        assert!(closed);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(rig.connector.opens(), 1);
        assert!(tx.send(SessionEvent::Close).await.is_err());
    }
}

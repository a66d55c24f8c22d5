//! Command dispatcher: turns user intents into backend commands.
//!
//! Per command:
//!   gate admits → optimistic effect (pause/resume only) → request task
//!   → `CommandSettled` (notice on failure) → cooldown → `ControlReleased`
//!
//! Optimistic effects are never rolled back here; the next authoritative
//! update overwrites them.

use std::sync::Arc;
use std::time::Duration;

use station_proto::config::SyncConfig;
use station_proto::protocol::{ControlAction, ControlReply, EqBand, SettingsUpdate, TargetId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::StationBackend;
use crate::error::Result;
use crate::gate::{Admission, ControlGate, ControlId, Ticket};
use crate::notice::{Notice, Severity};
use crate::reconciler::StateReconciler;
use crate::session::SessionEvent;
use crate::view_state::ViewState;

/// User command entering a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Pause or resume, whichever the display says is the opposite.
    Toggle,
    Pause,
    Resume,
    Skip,
    Stop,
    Leave,
    /// Empties the queue by stopping playback.
    ClearQueue,
    Play { query: String },
    SetVolume { level: u8 },
    BeginVolumeDrag,
    EndVolumeDrag,
    SetBassBoost(bool),
    SetAutoPlay(bool),
    SetEqualizer { band: EqBand, gain: f64 },
    DeleteQueue { index: usize },
    MoveQueue { from: usize, to: usize },
    SaveSettings { volume: u8 },
    /// Pull a fresh snapshot.
    Refresh,
}

/// What actually goes over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Control(ControlAction),
    Settings(SettingsUpdate),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Control(action) => action.name(),
            Command::Settings(_) => "settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    Held,
    Suppressed,
}

/// `pause` while playing, `resume` while paused.
pub fn resolve_toggle(displayed_paused: bool) -> ControlAction {
    if displayed_paused {
        ControlAction::Resume
    } else {
        ControlAction::Pause
    }
}

/// Control and command for intents that talk to the backend.  Local-only
/// intents (drag lock, equalizer, refresh) and a blank `play` map to `None`.
pub fn command_for(intent: &Intent, view: &ViewState) -> Option<(ControlId, Command)> {
    let action = match intent {
        Intent::Toggle => resolve_toggle(view.is_paused),
        Intent::Pause => ControlAction::Pause,
        Intent::Resume => ControlAction::Resume,
        Intent::Skip => ControlAction::Skip,
        Intent::Stop => ControlAction::Stop,
        Intent::Leave => ControlAction::Leave,
        Intent::ClearQueue => {
            return Some((ControlId::ClearQueue, Command::Control(ControlAction::Stop)));
        }
        Intent::Play { query } => {
            let query = query.trim();
            if query.is_empty() {
                return None;
            }
            ControlAction::Play {
                query: query.to_string(),
            }
        }
        Intent::SetVolume { level } => ControlAction::Volume {
            level: (*level).min(100),
        },
        Intent::SetBassBoost(enabled) => ControlAction::BassBoost { enabled: *enabled },
        Intent::SetAutoPlay(enabled) => ControlAction::AutoPlay { enabled: *enabled },
        Intent::DeleteQueue { index } => ControlAction::DeleteQueue { index: *index },
        Intent::MoveQueue { from, to } => ControlAction::MoveQueue {
            from_index: *from,
            to_index: *to,
        },
        Intent::SaveSettings { volume } => {
            let settings = SettingsUpdate {
                volume: (*volume).min(100),
            };
            return Some((ControlId::Settings, Command::Settings(settings)));
        }
        Intent::BeginVolumeDrag
        | Intent::EndVolumeDrag
        | Intent::SetEqualizer { .. }
        | Intent::Refresh => return None,
    };
    Some((ControlId::for_action(&action), Command::Control(action)))
}

/// Equalizer command for a flushed band value.  The backend takes whole dB.
pub fn equalizer_command(band: EqBand, gain: f64) -> (ControlId, Command) {
    let gain = if gain.is_finite() { gain.round() as i32 } else { 0 };
    (
        ControlId::Equalizer(band),
        Command::Control(ControlAction::Equalizer { band, gain }),
    )
}

fn optimistic_pause(command: &Command) -> Option<bool> {
    match command {
        Command::Control(ControlAction::Pause) => Some(true),
        Command::Control(ControlAction::Resume) => Some(false),
        _ => None,
    }
}

async fn send_command(
    backend: &dyn StationBackend,
    target: &str,
    command: &Command,
) -> Result<ControlReply> {
    match command {
        Command::Control(action) => backend.control(target, action).await,
        Command::Settings(settings) => backend.update_settings(target, settings).await,
    }
}

pub struct CommandDispatcher {
    target: TargetId,
    backend: Arc<dyn StationBackend>,
    gate: ControlGate,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    cooldown: Duration,
    play_resync: Duration,
}

impl CommandDispatcher {
    pub fn new(
        target: TargetId,
        backend: Arc<dyn StationBackend>,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
        sync: &SyncConfig,
    ) -> Self {
        Self {
            target,
            backend,
            gate: ControlGate::new(),
            events,
            cancel,
            cooldown: sync.command_cooldown(),
            play_resync: sync.play_resync(),
        }
    }

    pub fn busy_controls(&self) -> Vec<ControlId> {
        self.gate.busy_controls()
    }

    pub fn is_busy(&self, control: ControlId) -> bool {
        self.gate.is_busy(control)
    }

    pub fn dispatch(
        &mut self,
        control: ControlId,
        command: Command,
        reconciler: &mut StateReconciler,
        now: Instant,
    ) -> Dispatch {
        match self.gate.admit(control, &command, now) {
            Admission::Suppressed => {
                debug!("{} busy, dropping {}", control.label(), command.name());
                Dispatch::Suppressed
            }
            Admission::Held => {
                debug!("{} busy, holding {}", control.label(), command.name());
                Dispatch::Held
            }
            Admission::Send(ticket) => {
                if let Some(paused) = optimistic_pause(&command) {
                    reconciler.apply_optimistic_pause(paused, now);
                }
                info!("{}: sending {}", self.target, command.name());
                self.spawn_request(control, ticket, command);
                Dispatch::Sent
            }
        }
    }

    /// Outcome of a request.  The control stays busy until its release.
    pub fn settle(
        &mut self,
        control: ControlId,
        command: &Command,
        result: Result<ControlReply>,
    ) -> Option<Notice> {
        match result {
            Ok(reply) => {
                debug!("{}: {} accepted", self.target, command.name());
                if matches!(command, Command::Control(ControlAction::Play { .. })) {
                    self.schedule_resync();
                }
                reply
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .map(|m| Notice::new(Severity::Success, m).with_control(control))
            }
            Err(e) => {
                warn!("{}: {} failed: {}", self.target, command.name(), e);
                Some(Notice::command_failed(control, command.name(), &e))
            }
        }
    }

    /// Cooldown over.  A value held while busy is sent right away.
    pub fn release(
        &mut self,
        control: ControlId,
        ticket: Ticket,
        reconciler: &mut StateReconciler,
        now: Instant,
    ) -> Option<Dispatch> {
        let held = self.gate.release(control, ticket)?;
        debug!("{} released, sending held {}", control.label(), held.name());
        Some(self.dispatch(control, held, reconciler, now))
    }

    pub fn reset(&mut self) {
        self.gate.clear();
    }

    fn spawn_request(&self, control: ControlId, ticket: Ticket, command: Command) {
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let target = self.target.clone();
        let cooldown = self.cooldown;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = send_command(backend.as_ref(), &target, &command) => result,
            };
            let settled = SessionEvent::CommandSettled {
                target: target.clone(),
                control,
                ticket,
                command,
                result,
            };
            if events.send(settled).await.is_err() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(cooldown) => {}
            }
            let _ = events
                .send(SessionEvent::ControlReleased {
                    target,
                    control,
                    ticket,
                })
                .await;
        });
    }

    /// Resolving a search takes the backend a moment; pull again later.
    fn schedule_resync(&self) {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let target = self.target.clone();
        let delay = self.play_resync;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(SessionEvent::ResyncDue { target }).await;
                }
            }
        });
    }
}

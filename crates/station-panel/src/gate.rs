//! Per-control busy tracking for commands with confirmation latency.
//!
//! A control is busy from the moment its command is sent until a cooldown
//! after the backend answers.  While busy:
//! ```text
//!  trigger control (skip, delete, ...)  : further presses are dropped
//!  value control (volume, eq, ...)      : the newest value is held and
//!                                         sent when the control frees up
//! ```
//! Each acquisition carries a ticket so a late release from an earlier
//! command cannot free a control that was re-acquired since.

use std::collections::BTreeMap;

use station_proto::protocol::{ControlAction, EqBand};
use tokio::time::Instant;
use tracing::trace;

use crate::dispatcher::Command;

/// One interactive control on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControlId {
    Play,
    /// Shared by toggle, pause and resume.
    Pause,
    Skip,
    Stop,
    Leave,
    ClearQueue,
    Volume,
    BassBoost,
    AutoPlay,
    Equalizer(EqBand),
    QueueItem(usize),
    MoveQueue,
    Settings,
}

impl ControlId {
    /// Control that owns an action.  `ClearQueue` sends `stop` but is its own
    /// control, so callers pass it explicitly.
    pub fn for_action(action: &ControlAction) -> Self {
        match action {
            ControlAction::Play { .. } => ControlId::Play,
            ControlAction::Pause | ControlAction::Resume => ControlId::Pause,
            ControlAction::Skip => ControlId::Skip,
            ControlAction::Stop => ControlId::Stop,
            ControlAction::Leave => ControlId::Leave,
            ControlAction::Volume { .. } => ControlId::Volume,
            ControlAction::BassBoost { .. } => ControlId::BassBoost,
            ControlAction::AutoPlay { .. } => ControlId::AutoPlay,
            ControlAction::Equalizer { band, .. } => ControlId::Equalizer(*band),
            ControlAction::DeleteQueue { index } => ControlId::QueueItem(*index),
            ControlAction::MoveQueue { .. } => ControlId::MoveQueue,
        }
    }

    /// Value controls coalesce while busy instead of dropping input.
    pub fn holds_latest(self) -> bool {
        matches!(
            self,
            ControlId::Volume | ControlId::BassBoost | ControlId::AutoPlay | ControlId::Equalizer(_)
        )
    }

    pub fn label(self) -> String {
        match self {
            ControlId::Play => "play".into(),
            ControlId::Pause => "pause".into(),
            ControlId::Skip => "skip".into(),
            ControlId::Stop => "stop".into(),
            ControlId::Leave => "leave".into(),
            ControlId::ClearQueue => "clear".into(),
            ControlId::Volume => "volume".into(),
            ControlId::BassBoost => "bass".into(),
            ControlId::AutoPlay => "autoplay".into(),
            ControlId::Equalizer(band) => format!("eq-{}", band.as_str()),
            ControlId::QueueItem(index) => format!("queue#{}", index),
            ControlId::MoveQueue => "move".into(),
            ControlId::Settings => "settings".into(),
        }
    }
}

/// Identifies one acquisition of a control.
pub type Ticket = u64;

#[derive(Debug, Clone)]
struct BusySlot {
    ticket: Ticket,
    since: Instant,
    held: Option<Command>,
}

/// Outcome of pressing a control.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Control was idle and is now busy; send the command.
    Send(Ticket),
    /// Control busy; the value was kept for later.
    Held,
    /// Control busy; the press was dropped.
    Suppressed,
}

#[derive(Debug, Default)]
pub struct ControlGate {
    busy: BTreeMap<ControlId, BusySlot>,
    next_ticket: Ticket,
}

impl ControlGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self, control: ControlId) -> bool {
        self.busy.contains_key(&control)
    }

    /// Try to take `control` for `command`.
    pub fn admit(&mut self, control: ControlId, command: &Command, now: Instant) -> Admission {
        if let Some(slot) = self.busy.get_mut(&control) {
            if control.holds_latest() {
                slot.held = Some(command.clone());
                return Admission::Held;
            }
            return Admission::Suppressed;
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.busy.insert(
            control,
            BusySlot {
                ticket,
                since: now,
                held: None,
            },
        );
        Admission::Send(ticket)
    }

    /// Free `control` if `ticket` still owns it.  Returns the value held
    /// while busy, if any; the caller re-admits it.
    pub fn release(&mut self, control: ControlId, ticket: Ticket) -> Option<Command> {
        match self.busy.get(&control) {
            Some(slot) if slot.ticket == ticket => {}
            _ => return None,
        }
        let slot = self.busy.remove(&control)?;
        trace!("{} free after {:?}", control.label(), slot.since.elapsed());
        slot.held
    }

    /// Busy controls in a stable order.
    pub fn busy_controls(&self) -> Vec<ControlId> {
        self.busy.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.busy.clear();
    }
}

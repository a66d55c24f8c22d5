//! Clock interpolation. Projects elapsed playback time forward between
//! authoritative syncs.
//!
//! The projection is a pure function of the view and `now`; the session's
//! tick only asks for it and repaints.  Nothing here writes
//! `elapsed_seconds` or `elapsed_synced_at`.

use tokio::time::Instant;

use crate::view_state::ViewState;

/// `min(duration, elapsed + (now - synced_at))` while playing, `elapsed`
/// while paused.
pub fn project(
    elapsed: f64,
    synced_at: Instant,
    paused: bool,
    duration: Option<f64>,
    now: Instant,
) -> f64 {
    let raw = if paused {
        elapsed
    } else {
        elapsed + now.saturating_duration_since(synced_at).as_secs_f64()
    };
    let raw = raw.max(0.0);
    match duration {
        Some(duration) => raw.min(duration),
        None => raw,
    }
}

#[derive(Debug, Default)]
pub struct ClockInterpolator {
    armed: bool,
}

impl ClockInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Elapsed time to show at `now`.  Zero while disarmed.
    pub fn displayed(&self, view: &ViewState, now: Instant) -> f64 {
        if !self.armed || view.current_track.is_none() {
            return 0.0;
        }
        project(
            view.elapsed_seconds,
            view.elapsed_synced_at,
            view.is_paused,
            view.track_duration(),
            now,
        )
    }
}

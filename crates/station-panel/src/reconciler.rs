//! State reconciler. Merges snapshots and pushed deltas into the ViewState.
//!
//! Merge rules:
//! - absent field → unchanged
//! - `current_song`, `queue`, `history` → replaced wholesale when present
//! - a field under a local-edit lock → skipped for this update
//! - track appears/disappears → clock armed/disarmed, `elapsed_synced_at` rebased
//!
//! The reconciler never renders; callers emit a frame when `apply` reports a
//! change.

use std::collections::HashMap;
use std::sync::Arc;

use station_proto::protocol::{EqBand, StatusUpdate};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::clock::ClockInterpolator;
use crate::error::Result;
use crate::view_state::{HistoryItem, QueueItem, Stats, Track, ViewState};

/// A control the user can be actively manipulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditField {
    Volume,
    Equalizer(EqBand),
}

/// Advisory flags set on press/drag-start and cleared on release.  Nothing
/// ever waits on them; the reconciler just skips the guarded field.
///
/// A held lock may carry the value the user is currently pointing at.  That
/// draft is for display only and never enters the `ViewState`.
#[derive(Debug, Default)]
pub struct EditLocks {
    held: HashMap<EditField, Option<f64>>,
}

impl EditLocks {
    pub fn begin(&mut self, field: EditField) {
        self.held.entry(field).or_insert(None);
    }

    /// Returns false when the lock was not held.
    pub fn end(&mut self, field: EditField) -> bool {
        self.held.remove(&field).is_some()
    }

    pub fn is_held(&self, field: EditField) -> bool {
        self.held.contains_key(&field)
    }

    /// Ignored unless the lock is held.
    pub fn set_draft(&mut self, field: EditField, value: f64) {
        if let Some(draft) = self.held.get_mut(&field) {
            *draft = Some(value);
        }
    }

    pub fn draft(&self, field: EditField) -> Option<f64> {
        self.held.get(&field).copied().flatten()
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}

pub struct StateReconciler {
    view: ViewState,
    clock: ClockInterpolator,
    locks: EditLocks,
}

impl StateReconciler {
    pub fn new(now: Instant) -> Self {
        Self {
            view: ViewState::empty(now),
            clock: ClockInterpolator::new(),
            locks: EditLocks::default(),
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn clock_armed(&self) -> bool {
        self.clock.is_armed()
    }

    pub fn displayed_elapsed(&self, now: Instant) -> f64 {
        self.clock.displayed(&self.view, now)
    }

    pub fn locks(&self) -> &EditLocks {
        &self.locks
    }

    pub fn begin_edit(&mut self, field: EditField) {
        debug!("edit lock taken: {:?}", field);
        self.locks.begin(field);
    }

    pub fn end_edit(&mut self, field: EditField) -> bool {
        debug!("edit lock released: {:?}", field);
        self.locks.end(field)
    }

    pub fn clear_edits(&mut self) {
        self.locks.clear();
    }

    /// Remember where the user's slider is.  Only kept while `field` is
    /// locked; the view keeps the last authoritative value.
    pub fn draft_edit(&mut self, field: EditField, value: f64) {
        if value.is_finite() {
            self.locks.set_draft(field, value);
        }
    }

    /// Parse boundary for stream frames.  A payload that fails to parse
    /// leaves the view untouched.
    pub fn apply_raw(&mut self, raw: &str, now: Instant) -> Result<bool> {
        let update = StatusUpdate::from_json(raw)?;
        Ok(self.apply(update, now))
    }

    /// Merge one update.  Returns true when the view changed.
    pub fn apply(&mut self, update: StatusUpdate, now: Instant) -> bool {
        let before = self.view.clone();
        let shown_before = self.clock.displayed(&self.view, now);
        let had_track = self.view.current_track.is_some();
        let view = &mut self.view;

        if let Some(connected) = update.connected {
            view.connected = connected;
        }
        if let Some(channel) = update.channel {
            view.channel_label = channel;
        }

        // Where to rebase the clock, if anywhere.
        let mut rebase_at: Option<f64> = None;

        if let Some(song) = update.current_song {
            let next = song.map(Track::from);
            if next != view.current_track {
                rebase_at = Some(0.0);
            }
            view.current_track = next;
        }
        if let Some(paused) = update.is_paused {
            if paused != view.is_paused && rebase_at.is_none() {
                rebase_at = Some(shown_before);
            }
            view.is_paused = paused;
        }
        if let Some(elapsed) = update.elapsed {
            rebase_at = Some(elapsed);
        }
        if let Some(elapsed) = rebase_at {
            view.elapsed_seconds = view.clamp_elapsed(elapsed);
            view.elapsed_synced_at = now;
        } else {
            // duration may have changed under a kept position
            view.elapsed_seconds = view.clamp_elapsed(view.elapsed_seconds);
        }

        match (had_track, view.current_track.is_some()) {
            (false, true) => {
                trace!("track appeared, arming clock");
                self.clock.arm();
                view.elapsed_synced_at = now;
            }
            (true, false) => {
                trace!("track cleared, disarming clock");
                self.clock.disarm();
                view.elapsed_seconds = 0.0;
                view.elapsed_synced_at = now;
            }
            _ => {}
        }

        if let Some(volume) = update.volume {
            if self.locks.is_held(EditField::Volume) {
                debug!("volume {} skipped: slider is being dragged", volume);
            } else {
                view.volume_percent = volume.clamp(0, 100) as u8;
            }
        }
        if let Some(enabled) = update.bass_boost {
            view.bass_boost_enabled = enabled;
        }
        if let Some(enabled) = update.auto_play {
            view.autoplay_enabled = enabled;
        }
        if let Some(gains) = update.eq_gains {
            for band in EqBand::ALL {
                let Some(gain) = gains.get(band) else {
                    continue;
                };
                if self.locks.is_held(EditField::Equalizer(band)) {
                    debug!("eq {} skipped: band is being edited", band.as_str());
                    continue;
                }
                view.equalizer_gains.set(band, gain);
            }
        }
        if let Some(queue) = update.queue {
            view.queue = Arc::from(queue.into_iter().map(QueueItem::from).collect::<Vec<_>>());
        }
        if let Some(history) = update.history {
            view.history = Arc::from(
                history
                    .into_iter()
                    .map(HistoryItem::from)
                    .collect::<Vec<_>>(),
            );
        }
        if let Some(stats) = update.stats.as_ref() {
            view.stats = Stats::from(stats);
        }
        if let Some(listeners) = update.listeners {
            view.listeners = listeners;
        }
        if let Some(role) = update.dj_role {
            view.dj_role = Some(role);
        }

        self.view != before
    }

    /// Optimistic pause/resume.  Rebases at the displayed position so the
    /// progress neither snaps back on pause nor leaps ahead on resume.
    pub fn apply_optimistic_pause(&mut self, paused: bool, now: Instant) -> bool {
        if self.view.is_paused == paused {
            return false;
        }
        let shown = self.clock.displayed(&self.view, now);
        self.view.elapsed_seconds = self.view.clamp_elapsed(shown);
        self.view.elapsed_synced_at = now;
        self.view.is_paused = paused;
        true
    }
}

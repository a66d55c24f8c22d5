//! ViewState: the locally held projection of one target's player.
//!
//! Only the reconciler (authoritative updates) and the dispatcher's
//! optimistic step write to it.  Renderers receive clones inside a
//! [`ViewFrame`](crate::session::ViewFrame) and never mutate it.

use std::sync::Arc;

use station_proto::protocol::{EqBand, HistoryEntry, PlayStats, QueueEntry, TrackInfo};
use tokio::time::Instant;

/// Label shown when no track has been played yet.
pub const NO_TOP_TRACK: &str = "-";

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub requester: String,
    pub thumbnail_url: Option<String>,
    /// `None` for live streams; such tracks have no upper bound on elapsed.
    pub duration_seconds: Option<f64>,
}

impl From<TrackInfo> for Track {
    fn from(info: TrackInfo) -> Self {
        Self {
            title: info.title,
            requester: info.requester,
            thumbnail_url: info.thumbnail,
            duration_seconds: info.duration.filter(|d| d.is_finite() && *d > 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub title: String,
    pub requester: String,
    pub duration_seconds: Option<f64>,
}

impl From<QueueEntry> for QueueItem {
    fn from(entry: QueueEntry) -> Self {
        Self {
            title: entry.title,
            requester: entry.requester,
            duration_seconds: entry.duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub title: String,
    pub requester: String,
    pub thumbnail_url: Option<String>,
}

impl From<HistoryEntry> for HistoryItem {
    fn from(entry: HistoryEntry) -> Self {
        Self {
            title: entry.title,
            requester: entry.requester,
            thumbnail_url: entry.thumbnail,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub total_played: u64,
    pub top_track_label: String,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_played: 0,
            top_track_label: NO_TOP_TRACK.to_string(),
        }
    }
}

impl From<&PlayStats> for Stats {
    fn from(stats: &PlayStats) -> Self {
        Self {
            total_played: stats.total_played,
            top_track_label: top_track_label(&stats.tracks),
        }
    }
}

/// Label with the highest play count.  On a tie the label listed first in the
/// payload wins; the pick is deterministic but carries no meaning beyond that.
pub fn top_track_label(tracks: &[(String, u64)]) -> String {
    tracks
        .iter()
        .fold(None::<(&String, u64)>, |best, (label, count)| match best {
            Some((_, best_count)) if best_count >= *count => best,
            _ => Some((label, *count)),
        })
        .map(|(label, _)| label.clone())
        .unwrap_or_else(|| NO_TOP_TRACK.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EqGains {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl EqGains {
    pub fn get(&self, band: EqBand) -> f64 {
        match band {
            EqBand::Low => self.low,
            EqBand::Mid => self.mid,
            EqBand::High => self.high,
        }
    }

    pub fn set(&mut self, band: EqBand, gain: f64) {
        match band {
            EqBand::Low => self.low = gain,
            EqBand::Mid => self.mid = gain,
            EqBand::High => self.high = gain,
        }
    }
}

/// Full view of one target.  Queue and history are shared immutable slices:
/// an update swaps in a new slice, nothing patches one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub connected: bool,
    pub channel_label: Option<String>,
    pub current_track: Option<Track>,
    /// Last authoritative elapsed time, clamped to the track duration.
    pub elapsed_seconds: f64,
    /// Moment `elapsed_seconds` was last rebased.
    pub elapsed_synced_at: Instant,
    pub is_paused: bool,
    pub volume_percent: u8,
    pub bass_boost_enabled: bool,
    pub autoplay_enabled: bool,
    pub equalizer_gains: EqGains,
    pub queue: Arc<[QueueItem]>,
    pub history: Arc<[HistoryItem]>,
    pub stats: Stats,
    pub listeners: u32,
    pub dj_role: Option<String>,
}

impl ViewState {
    pub fn empty(now: Instant) -> Self {
        Self {
            connected: false,
            channel_label: None,
            current_track: None,
            elapsed_seconds: 0.0,
            elapsed_synced_at: now,
            is_paused: false,
            volume_percent: 100,
            bass_boost_enabled: false,
            autoplay_enabled: false,
            equalizer_gains: EqGains::default(),
            queue: Arc::from(Vec::new()),
            history: Arc::from(Vec::new()),
            stats: Stats::default(),
            listeners: 0,
            dj_role: None,
        }
    }

    pub fn track_duration(&self) -> Option<f64> {
        self.current_track
            .as_ref()
            .and_then(|track| track.duration_seconds)
    }

    /// Clamp a candidate elapsed value against the current track.
    pub fn clamp_elapsed(&self, elapsed: f64) -> f64 {
        if self.current_track.is_none() {
            return 0.0;
        }
        let elapsed = if elapsed.is_finite() { elapsed.max(0.0) } else { 0.0 };
        match self.track_duration() {
            Some(duration) => elapsed.min(duration),
            None => elapsed,
        }
    }
}

/// `m:ss`, the way progress is printed everywhere.
pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

/// Identifier of a remote player (a guild/server id on the backend).
pub type TargetId = String;

pub const BOT_STATUS_PATH: &str = "/api/bot/status";
pub const BOT_START_PATH: &str = "/api/bot/start";
pub const BOT_STOP_PATH: &str = "/api/bot/stop";

pub fn status_path(target: &str) -> String {
    format!("/api/server/{}/status", target)
}

pub fn control_path(target: &str) -> String {
    format!("/api/server/{}/control", target)
}

pub fn settings_path(target: &str) -> String {
    format!("/api/server/{}/settings", target)
}

pub fn stream_path(target: &str) -> String {
    format!("/ws/{}", target)
}

/// Keeps `null` distinct from a missing key: missing → `None`,
/// `null` → `Some(None)`.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// State record pushed by the backend, either as a full snapshot (status
/// endpoint, most stream frames) or as a partial delta.  Every field is
/// optional: an absent key means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    /// Voice channel name.  `Some(None)` clears it.
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel: Option<Option<String>>,
    /// `Some(None)` means the player is idle.
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_song: Option<Option<TrackInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
    /// Percent.  The backend does not clamp, so the client does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<Vec<QueueEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bass_boost: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_play: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listeners: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dj_role: Option<String>,
    /// Seconds into the current track at the moment the backend built the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PlayStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq_gains: Option<EqGainsUpdate>,
}

impl StatusUpdate {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Live streams report no duration.
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub title: String,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Play counters.  On the wire `tracks` is an object of track label to play
/// count; it is kept as pairs in the order the payload lists them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayStats {
    #[serde(default)]
    pub total_played: u64,
    #[serde(
        default,
        deserialize_with = "counts_in_order",
        serialize_with = "counts_as_map"
    )]
    pub tracks: Vec<(String, u64)>,
}

fn counts_in_order<'de, D>(deserializer: D) -> Result<Vec<(String, u64)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Counts;

    impl<'de> Visitor<'de> for Counts {
        type Value = Vec<(String, u64)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of track label to play count")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut counts = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((label, count)) = map.next_entry::<String, u64>()? {
                counts.push((label, count));
            }
            Ok(counts)
        }
    }

    deserializer.deserialize_map(Counts)
}

fn counts_as_map<S: Serializer>(counts: &[(String, u64)], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(counts.iter().map(|(label, count)| (label, count)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EqGainsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

impl EqGainsUpdate {
    pub fn get(&self, band: EqBand) -> Option<f64> {
        match band {
            EqBand::Low => self.low,
            EqBand::Mid => self.mid,
            EqBand::High => self.high,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    pub fn as_str(self) -> &'static str {
        match self {
            EqBand::Low => "low",
            EqBand::Mid => "mid",
            EqBand::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(EqBand::Low),
            "mid" => Some(EqBand::Mid),
            "high" => Some(EqBand::High),
            _ => None,
        }
    }
}

/// Actions accepted by the control endpoint.  The action name travels in the
/// query string, the parameters in the JSON body next to the token.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    Play { query: String },
    Pause,
    Resume,
    Skip,
    Stop,
    Leave,
    Volume { level: u8 },
    BassBoost { enabled: bool },
    AutoPlay { enabled: bool },
    Equalizer { band: EqBand, gain: i32 },
    DeleteQueue { index: usize },
    MoveQueue { from_index: usize, to_index: usize },
}

impl ControlAction {
    pub fn name(&self) -> &'static str {
        match self {
            ControlAction::Play { .. } => "play",
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Skip => "skip",
            ControlAction::Stop => "stop",
            ControlAction::Leave => "leave",
            ControlAction::Volume { .. } => "volume",
            ControlAction::BassBoost { .. } => "bass_boost",
            ControlAction::AutoPlay { .. } => "auto_play",
            ControlAction::Equalizer { .. } => "equalizer",
            ControlAction::DeleteQueue { .. } => "delete_queue",
            ControlAction::MoveQueue { .. } => "move_queue",
        }
    }

    /// Request body: the action parameters plus the session token.
    pub fn body(&self, token: &str) -> Value {
        let mut body = match self {
            ControlAction::Play { query } => json!({ "query": query }),
            ControlAction::Volume { level } => json!({ "level": level }),
            ControlAction::BassBoost { enabled } | ControlAction::AutoPlay { enabled } => {
                json!({ "enabled": enabled })
            }
            ControlAction::Equalizer { band, gain } => {
                json!({ "band": band.as_str(), "gain": gain })
            }
            ControlAction::DeleteQueue { index } => json!({ "index": index }),
            ControlAction::MoveQueue {
                from_index,
                to_index,
            } => json!({ "from_index": from_index, "to_index": to_index }),
            ControlAction::Pause
            | ControlAction::Resume
            | ControlAction::Skip
            | ControlAction::Stop
            | ControlAction::Leave => json!({}),
        };
        body["token"] = Value::String(token.to_string());
        body
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub volume: u8,
}

/// Reply body of a successful control/settings call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body.  `detail` is usually a string but validation failures send a
/// list of objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Value,
}

impl ErrorBody {
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(s) => s.clone(),
            Value::Null => "unknown error".to_string(),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.get("msg")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| item.to_string())
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

/// Bot process control.  Replies carry `status`: `starting`,
/// `already_running`, `stopped` or `not_found`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Stop,
}

impl BotCommand {
    pub fn name(self) -> &'static str {
        match self {
            BotCommand::Start => "start",
            BotCommand::Stop => "stop",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            BotCommand::Start => BOT_START_PATH,
            BotCommand::Stop => BOT_STOP_PATH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub bot_ready: bool,
}

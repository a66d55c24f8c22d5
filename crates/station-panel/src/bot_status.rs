//! Bot process health, polled independently of any open panel.
//!
//!   Unknown -> Online | Starting | Offline | Unreachable -> ...
//!
//! Only transitions are broadcast.  Starting or stopping the bot wakes the
//! poller early so the badge follows without waiting a full interval.

use std::sync::Arc;
use std::time::Duration;

use station_proto::protocol::{BotCommand, BotStatus, ControlReply};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::StationBackend;
use crate::error::{Result, SyncError};
use crate::notice::{Notice, Severity};
use crate::session::PanelEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BotHealth {
    /// No answer yet.
    #[default]
    Unknown,
    /// Running and connected to the voice gateway.
    Online,
    /// Process is up but not ready.
    Starting,
    Offline,
    /// The status request itself failed.
    Unreachable,
}

impl BotHealth {
    pub fn from_status(status: &BotStatus) -> Self {
        match (status.is_running, status.bot_ready) {
            (true, true) => BotHealth::Online,
            (true, false) => BotHealth::Starting,
            (false, _) => BotHealth::Offline,
        }
    }

    pub fn badge_label(&self) -> &'static str {
        match self {
            BotHealth::Unknown => "...",
            BotHealth::Online => "ONLINE",
            BotHealth::Starting => "INITIALIZING",
            BotHealth::Offline => "OFFLINE",
            BotHealth::Unreachable => "UNREACHABLE",
        }
    }
}

/// What the user sees after a start/stop request.
pub fn bot_command_notice(command: BotCommand, result: &Result<ControlReply>) -> Notice {
    match result {
        Ok(reply) => match reply.status.as_deref() {
            Some("starting") => Notice::new(Severity::Success, "bot starting"),
            Some("already_running") => Notice::new(Severity::Info, "bot already running"),
            Some("stopped") => Notice::new(Severity::Success, "bot stopped"),
            Some("not_found") => Notice::warning("bot was not running"),
            _ => Notice::new(Severity::Success, format!("bot {} sent", command.name())),
        },
        Err(SyncError::Rejected { detail, .. }) => Notice::error(detail.clone()),
        Err(e) => Notice::warning(format!("bot {} failed: {}", command.name(), e)),
    }
}

/// Poll every `interval`, or right away when `wake` fires, until `cancel`
/// fires.
pub fn spawn_bot_status_poller(
    backend: Arc<dyn StationBackend>,
    interval: Duration,
    broadcast: broadcast::Sender<PanelEvent>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = BotHealth::Unknown;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = wake.notified() => {
                    debug!("bot status poll requested");
                    ticker.reset();
                }
            }
            let health = tokio::select! {
                _ = cancel.cancelled() => break,
                result = backend.bot_status() => match result {
                    Ok(status) => BotHealth::from_status(&status),
                    Err(e) => {
                        debug!("bot status poll failed: {}", e);
                        BotHealth::Unreachable
                    }
                },
            };
            if health != last {
                info!("bot status: {} -> {}", last.badge_label(), health.badge_label());
                last = health;
                let _ = broadcast.send(PanelEvent::Bot(health));
            }
        }
        debug!("bot status poller stopped");
    })
}

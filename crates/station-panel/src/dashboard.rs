//! Dashboard: owns at most one open panel session plus the bot status
//! poller.  Opening a panel always tears the previous one down first.
//! Starting and stopping the bot process also goes through here.

use std::sync::Arc;

use station_proto::config::{Config, SyncConfig};
use station_proto::protocol::{BotCommand, TargetId};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{HttpBackend, StationBackend};
use crate::bot_status::{bot_command_notice, spawn_bot_status_poller};
use crate::connection::{StreamConnector, WsConnector};
use crate::dispatcher::Intent;
use crate::error::{Result, SyncError};
use crate::session::{PanelEvent, PanelSession, SessionHandle};

const BROADCAST_CAPACITY: usize = 1024;

pub struct Dashboard {
    backend: Arc<dyn StationBackend>,
    connector: Arc<dyn StreamConnector>,
    sync: SyncConfig,
    broadcast: broadcast::Sender<PanelEvent>,
    current: Option<SessionHandle>,
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    poll_now: Arc<Notify>,
}

impl Dashboard {
    pub fn new(
        backend: Arc<dyn StationBackend>,
        connector: Arc<dyn StreamConnector>,
        sync: SyncConfig,
    ) -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        let cancel = CancellationToken::new();
        let poll_now = Arc::new(Notify::new());
        let poller = spawn_bot_status_poller(
            Arc::clone(&backend),
            sync.bot_status_interval(),
            broadcast.clone(),
            cancel.clone(),
            Arc::clone(&poll_now),
        );
        Self {
            backend,
            connector,
            sync,
            broadcast,
            current: None,
            cancel,
            poller,
            poll_now,
        }
    }

    /// HTTP backend and WebSocket push stream from the config file.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend)?;
        let connector = WsConnector::new(backend.base_url().clone());
        Ok(Self::new(
            Arc::new(backend),
            Arc::new(connector),
            config.sync.clone(),
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.broadcast.subscribe()
    }

    pub fn current_target(&self) -> Option<&str> {
        self.current.as_ref().map(|session| session.target())
    }

    /// Close whatever is open, then start a session for `target`.
    pub async fn open_panel(&mut self, target: TargetId) {
        self.back().await;
        info!("dashboard: opening panel {}", target);
        let session = PanelSession::open(
            target,
            Arc::clone(&self.backend),
            Arc::clone(&self.connector),
            &self.sync,
            self.broadcast.clone(),
        );
        self.current = Some(session);
    }

    /// Close the open panel, if any.
    pub async fn back(&mut self) {
        if let Some(session) = self.current.take() {
            info!("dashboard: closing panel {}", session.target());
            session.close().await;
        }
    }

    pub async fn send(&self, intent: Intent) -> Result<()> {
        match &self.current {
            Some(session) => session.send(intent).await,
            None => Err(SyncError::SessionClosed),
        }
    }

    pub async fn start_bot(&self) {
        self.control_bot(BotCommand::Start).await;
    }

    pub async fn stop_bot(&self) {
        self.control_bot(BotCommand::Stop).await;
    }

    /// Send the request, report the outcome as a system notice and re-poll
    /// the bot status right away.
    pub async fn control_bot(&self, command: BotCommand) {
        info!("dashboard: bot {}", command.name());
        let result = self.backend.bot_command(command).await;
        if let Err(e) = &result {
            warn!("bot {} failed: {}", command.name(), e);
        }
        let notice = bot_command_notice(command, &result);
        let _ = self.broadcast.send(PanelEvent::System(notice));
        self.poll_now.notify_one();
    }

    pub async fn shutdown(mut self) {
        self.back().await;
        self.cancel.cancel();
        let _ = (&mut self.poller).await;
    }
}

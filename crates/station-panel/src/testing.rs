//! In-memory backend and push stream for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use station_proto::protocol::{
    BotCommand, BotStatus, ControlAction, ControlReply, QueueEntry, SettingsUpdate, StatusUpdate, TrackInfo,
};
use tokio::sync::mpsc;

use crate::backend::StationBackend;
use crate::connection::{FrameStream, StreamConnector, StreamFrame};
use crate::dispatcher::Command;
use crate::error::{Result, SyncError};

pub fn playing_snapshot(paused: bool) -> StatusUpdate {
    StatusUpdate {
        online: Some(true),
        connected: Some(true),
        channel: Some(Some("Lounge".to_string())),
        current_song: Some(Some(TrackInfo {
            title: "Song A".to_string(),
            requester: "ana".to_string(),
            thumbnail: None,
            duration: Some(200.0),
        })),
        is_paused: Some(paused),
        volume: Some(80),
        elapsed: Some(30.0),
        queue: Some(vec![QueueEntry {
            title: "Next up".to_string(),
            requester: "bo".to_string(),
            duration: Some(180.0),
        }]),
        ..Default::default()
    }
}

pub struct MockBackend {
    snapshot: Mutex<StatusUpdate>,
    commands: Mutex<Vec<Command>>,
    status_pulls: AtomicUsize,
    reject: Mutex<Option<(u16, String)>>,
    bot: Mutex<Result<BotStatus>>,
    bot_polls: AtomicUsize,
    bot_commands: Mutex<Vec<BotCommand>>,
}

impl MockBackend {
    pub fn new(snapshot: StatusUpdate) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(snapshot),
            commands: Mutex::new(Vec::new()),
            status_pulls: AtomicUsize::new(0),
            reject: Mutex::new(None),
            bot: Mutex::new(Ok(BotStatus::default())),
            bot_polls: AtomicUsize::new(0),
            bot_commands: Mutex::new(Vec::new()),
        })
    }

    pub fn reject_with(&self, status: u16, detail: &str) {
        *self.reject.lock().unwrap() = Some((status, detail.to_string()));
    }

    pub fn set_bot(&self, bot: Result<BotStatus>) {
        *self.bot.lock().unwrap() = bot;
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands().iter().map(Command::name).collect()
    }

    pub fn bot_polls(&self) -> usize {
        self.bot_polls.load(Ordering::SeqCst)
    }

    pub fn bot_commands(&self) -> Vec<BotCommand> {
        self.bot_commands.lock().unwrap().clone()
    }

    pub fn status_pulls(&self) -> usize {
        self.status_pulls.load(Ordering::SeqCst)
    }

    fn answer(&self, command: Command) -> Result<ControlReply> {
        self.commands.lock().unwrap().push(command);
        match self.reject.lock().unwrap().clone() {
            Some((status, detail)) => Err(SyncError::Rejected { status, detail }),
            None => Ok(ControlReply {
                status: Some("success".to_string()),
                message: None,
            }),
        }
    }
}

#[async_trait]
impl StationBackend for MockBackend {
    async fn status(&self, _target: &str) -> Result<StatusUpdate> {
        self.status_pulls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn control(&self, _target: &str, action: &ControlAction) -> Result<ControlReply> {
        self.answer(Command::Control(action.clone()))
    }

    async fn update_settings(
        &self,
        _target: &str,
        settings: &SettingsUpdate,
    ) -> Result<ControlReply> {
        self.answer(Command::Settings(settings.clone()))
    }

    async fn bot_status(&self) -> Result<BotStatus> {
        self.bot_polls.fetch_add(1, Ordering::SeqCst);
        match &*self.bot.lock().unwrap() {
            Ok(status) => Ok(*status),
            Err(e) => Err(SyncError::Transport(e.to_string())),
        }
    }

    async fn bot_command(&self, command: BotCommand) -> Result<ControlReply> {
        self.bot_commands.lock().unwrap().push(command);
        if let Some((status, detail)) = self.reject.lock().unwrap().clone() {
            return Err(SyncError::Rejected { status, detail });
        }
        let status = match command {
            BotCommand::Start => "starting",
            BotCommand::Stop => "stopped",
        };
        Ok(ControlReply {
            status: Some(status.to_string()),
            message: None,
        })
    }
}

/// Push stream fed from the test through an mpsc sender.  Only the first
/// open succeeds; later opens fail so the session sits in backoff.
pub struct ChannelConnector {
    frames: Mutex<Option<mpsc::UnboundedReceiver<StreamFrame>>>,
    opens: AtomicUsize,
}

impl ChannelConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<StreamFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            frames: Mutex::new(Some(rx)),
            opens: AtomicUsize::new(0),
        });
        (connector, tx)
    }

    /// Every open fails.
    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedSender<StreamFrame>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            frames: Mutex::new(None),
            opens: AtomicUsize::new(0),
        });
        (connector, tx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn open(&self, _target: &str) -> Result<FrameStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .frames
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SyncError::Transport("connection refused".into()))?;
        let frames = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        Ok(Box::pin(frames))
    }
}

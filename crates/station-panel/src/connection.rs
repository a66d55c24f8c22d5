//! Connection manager. Owns the push stream of one session.
//!
//! Loop per session:
//!   open → Live → forward text frames → stream ends → back off → open ...
//!
//! Delays grow `base, 2×base, 4×base, ...` capped at `max`; the attempt
//! counter resets on every successful open.  Cancellation (session teardown)
//! wins over everything: a cancelled task never opens again.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use station_proto::config::SyncConfig;
use station_proto::protocol::TargetId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::stream_url;
use crate::error::Result;
use crate::session::SessionEvent;

/// Push channel state as shown next to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Live,
    Retrying { attempt: u32, delay: Duration },
    Closed,
}

impl LinkState {
    pub fn badge_label(&self) -> String {
        match self {
            LinkState::Connecting => "connecting".to_string(),
            LinkState::Live => "live".to_string(),
            LinkState::Retrying { attempt, delay } => {
                format!("retry #{} in {}s", attempt, delay.as_secs())
            }
            LinkState::Closed => "closed".to_string(),
        }
    }
}

/// What the push stream delivers after transport framing is stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Text(String),
    Close(Option<String>),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame>> + Send>>;

#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn open(&self, target: &str) -> Result<FrameStream>;
}

/// WebSocket push stream at `{ws base}/ws/{target}`.
pub struct WsConnector {
    base: Url,
}

impl WsConnector {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn open(&self, target: &str) -> Result<FrameStream> {
        let url = stream_url(&self.base, target)?;
        debug!("opening push stream {}", url);
        let (ws, _) = connect_async(url.as_str()).await?;
        // Receive-only: the write half is never used.
        let frames = ws.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(StreamFrame::Text(text))),
                Ok(Message::Close(frame)) => Some(Ok(StreamFrame::Close(
                    frame.map(|f| format!("{} {}", f.code, f.reason)),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            }
        });
        Ok(Box::pin(frames))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn from_config(sync: &SyncConfig) -> Self {
        Self {
            base: sync.reconnect_base(),
            max: sync.reconnect_max(),
        }
    }

    /// `min(2^attempt × base, max)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Start the connection task for `target`.  It ends when `cancel` fires,
/// `active` is cleared or the session's event channel closes.
pub fn spawn_connection(
    connector: Arc<dyn StreamConnector>,
    target: TargetId,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    backoff: Backoff,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_connection(connector, target, events, cancel, active, backoff).await;
    })
}

async fn run_connection(
    connector: Arc<dyn StreamConnector>,
    target: TargetId,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    backoff: Backoff,
) {
    let link = |state: LinkState| SessionEvent::Link {
        target: target.clone(),
        state,
    };
    let mut attempt: u32 = 0;

    'session: loop {
        if cancel.is_cancelled() || !active.load(Ordering::SeqCst) {
            break;
        }
        if events.send(link(LinkState::Connecting)).await.is_err() {
            break;
        }

        let opened = tokio::select! {
            _ = cancel.cancelled() => break 'session,
            opened = connector.open(&target) => opened,
        };

        match opened {
            Ok(mut frames) => {
                info!("push stream for {} is live", target);
                attempt = 0;
                if events.send(link(LinkState::Live)).await.is_err() {
                    break;
                }
                let opened = SessionEvent::ChannelOpened {
                    target: target.clone(),
                };
                if events.send(opened).await.is_err() {
                    break;
                }

                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break 'session,
                        frame = frames.next() => frame,
                    };
                    match frame {
                        Some(Ok(StreamFrame::Text(payload))) => {
                            let inbound = SessionEvent::Inbound {
                                target: target.clone(),
                                payload,
                            };
                            if events.send(inbound).await.is_err() {
                                break 'session;
                            }
                        }
                        Some(Ok(StreamFrame::Close(reason))) => {
                            info!(
                                "push stream for {} closed by peer: {}",
                                target,
                                reason.as_deref().unwrap_or("no reason")
                            );
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("push stream for {} failed: {}", target, e);
                            break;
                        }
                        None => {
                            info!("push stream for {} ended", target);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("push stream for {} did not open: {}", target, e);
            }
        }

        if cancel.is_cancelled() || !active.load(Ordering::SeqCst) {
            break;
        }
        let delay = backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!("reconnecting {} in {:?} (attempt {})", target, delay, attempt);
        let retrying = LinkState::Retrying { attempt, delay };
        if events.send(link(retrying)).await.is_err() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("connection task for {} finished", target);
    let _ = events.try_send(link(LinkState::Closed));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Plays back a fixed list of open outcomes, then fails forever.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Vec<StreamFrame>>>,
        fail_first: Mutex<u32>,
        opens: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn failing() -> Arc<Self> {
            Self::new(u32::MAX, Vec::new())
        }

        fn new(fail_first: u32, script: Vec<Vec<StreamFrame>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fail_first: Mutex::new(fail_first),
                opens: Mutex::new(Vec::new()),
            })
        }

        fn opens(&self) -> Vec<Instant> {
            self.opens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn open(&self, _target: &str) -> Result<FrameStream> {
            self.opens.lock().unwrap().push(Instant::now());
            {
                let mut fail = self.fail_first.lock().unwrap();
                if *fail > 0 {
                    *fail = fail.saturating_sub(1);
                    return Err(SyncError::Transport("connection refused".into()));
                }
            }
            let frames = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SyncError::Transport("script exhausted".into()))?;
            Ok(Box::pin(futures_util::stream::iter(frames.into_iter().map(Ok))))
        }
    }

    fn start(
        connector: Arc<ScriptedConnector>,
    ) -> (
        JoinHandle<()>,
        mpsc::Receiver<SessionEvent>,
        CancellationToken,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicBool::new(true));
        let handle = spawn_connection(
            connector,
            "guild-1".to_string(),
            tx,
            cancel.clone(),
            Arc::clone(&active),
            Backoff::default(),
        );
        (handle, rx, cancel, active)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|a| backoff.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_wait_1_2_4() {
        let connector = ScriptedConnector::failing();
        let (handle, _rx, cancel, _active) = start(Arc::clone(&connector));

        tokio::time::sleep(Duration::from_millis(7_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        let opens = connector.opens();
        assert_eq!(opens.len(), 4);
        let gaps: Vec<Duration> = opens.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_reopening() {
        let connector = ScriptedConnector::failing();
        let (handle, _rx, cancel, active) = start(Arc::clone(&connector));

        tokio::time::sleep(Duration::from_millis(500)).await;
        active.store(false, Ordering::SeqCst);
        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.opens().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_forwarded_and_attempt_resets() {
        let connector = ScriptedConnector::new(
            2,
            vec![vec![
                StreamFrame::Text("{\"volume\":10}".into()),
                StreamFrame::Text("{\"volume\":20}".into()),
                StreamFrame::Close(None),
            ]],
        );
        let (handle, mut rx, cancel, _active) = start(Arc::clone(&connector));

        let mut payloads = Vec::new();
        let mut links = Vec::new();
        let mut opened = 0;
        while links.len() < 8 {
            match rx.recv().await {
                Some(SessionEvent::Inbound { payload, .. }) => payloads.push(payload),
                Some(SessionEvent::Link { state, .. }) => links.push(state),
                Some(SessionEvent::ChannelOpened { .. }) => opened += 1,
                Some(_) => {}
                None => break,
            }
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(opened, 1);
        assert_eq!(payloads, vec!["{\"volume\":10}", "{\"volume\":20}"]);
        assert_eq!(
            links,
            vec![
                LinkState::Connecting,
                LinkState::Retrying {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                },
                LinkState::Connecting,
                LinkState::Retrying {
                    attempt: 2,
                    delay: Duration::from_secs(2)
                },
                LinkState::Connecting,
                LinkState::Live,
                // after the live stream closes the counter starts over
                LinkState::Retrying {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                },
                LinkState::Connecting,
            ]
        );
    }

    #[test]
    fn test_link_badge() {
        let state = LinkState::Retrying {
            attempt: 3,
            delay: Duration::from_secs(4),
        };
        assert_eq!(state.badge_label(), "retry #3 in 4s");
        assert_eq!(LinkState::Live.badge_label(), "live");
    }
}

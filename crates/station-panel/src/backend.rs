//! HTTP side of the backend: snapshot pulls, control commands, settings and
//! bot status.  The push stream lives in `connection`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use station_proto::config::BackendConfig;
use station_proto::protocol::{
    self, BotCommand, BotStatus, ControlAction, ControlReply, ErrorBody, SettingsUpdate,
    StatusUpdate,
};
use tracing::debug;
use url::Url;

use crate::error::{Result, SyncError};

/// Request/response operations the engine needs from a backend.
#[async_trait]
pub trait StationBackend: Send + Sync + 'static {
    /// Full snapshot of one target.
    async fn status(&self, target: &str) -> Result<StatusUpdate>;

    async fn control(&self, target: &str, action: &ControlAction) -> Result<ControlReply>;

    async fn update_settings(&self, target: &str, settings: &SettingsUpdate)
        -> Result<ControlReply>;

    async fn bot_status(&self) -> Result<BotStatus>;

    /// Start or stop the bot process.  Not tied to any target.
    async fn bot_command(&self, command: BotCommand) -> Result<ControlReply>;
}

pub struct HttpBackend {
    http: Client,
    base: Url,
    token: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base = parse_base_url(&config.base_url)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(format!("station-panel/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base,
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        join_path(&self.base, path)
    }
}

#[async_trait]
impl StationBackend for HttpBackend {
    async fn status(&self, target: &str) -> Result<StatusUpdate> {
        let url = self.endpoint(&protocol::status_path(target))?;
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await?;
        read_reply(response).await
    }

    async fn control(&self, target: &str, action: &ControlAction) -> Result<ControlReply> {
        let url = self.endpoint(&protocol::control_path(target))?;
        debug!("POST {} action={}", url, action.name());
        let response = self
            .http
            .post(url)
            .query(&[("action", action.name())])
            .json(&action.body(&self.token))
            .send()
            .await?;
        read_reply(response).await
    }

    async fn update_settings(
        &self,
        target: &str,
        settings: &SettingsUpdate,
    ) -> Result<ControlReply> {
        let url = self.endpoint(&protocol::settings_path(target))?;
        debug!("POST {} volume={}", url, settings.volume);
        let response = self
            .http
            .post(url)
            .query(&[("token", self.token.as_str())])
            .json(settings)
            .send()
            .await?;
        read_reply(response).await
    }

    async fn bot_status(&self) -> Result<BotStatus> {
        let url = self.endpoint(protocol::BOT_STATUS_PATH)?;
        let response = self
            .http
            .get(url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await?;
        read_reply(response).await
    }

    async fn bot_command(&self, command: BotCommand) -> Result<ControlReply> {
        let url = self.endpoint(command.path())?;
        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await?;
        read_reply(response).await
    }
}

/// Non-success → `Rejected` carrying the `detail` text when the body has
/// one.  Success with an empty body decodes as `null`.
async fn read_reply<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        let detail = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message())
            .unwrap_or_else(|_| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    trimmed.to_string()
                }
            });
        return Err(SyncError::Rejected {
            status: status.as_u16(),
            detail,
        });
    }
    let body = if text.trim().is_empty() { "null" } else { text.as_str() };
    Ok(serde_json::from_str(body)?)
}

pub fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| SyncError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SyncError::InvalidUrl(format!(
            "{}: scheme must be http or https, got {}",
            raw, other
        ))),
    }
}

/// Append an absolute API path to the base, keeping any base path prefix.
fn join_path(base: &Url, path: &str) -> Result<Url> {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{}{}", prefix, path));
    url.set_query(None);
    Ok(url)
}

/// WebSocket URL of a target's push stream: same host, `ws`/`wss` scheme.
pub fn stream_url(base: &Url, target: &str) -> Result<Url> {
    let mut url = join_path(base, &protocol::stream_path(target))?;
    let scheme = match base.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::InvalidUrl(format!("cannot derive stream url from {}", base)))?;
    Ok(url)
}

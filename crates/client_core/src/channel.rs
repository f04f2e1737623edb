//! Live order channels.
//!
//! [`ChannelManager`] owns the single live connection of the process. It
//! opens the socket for a [`ChannelKey`], spawns a reader task that turns
//! every inbound frame into a [`FeedCommand::ReplaceData`] for the owning
//! slice, and tears the previous connection down before a new one opens.
//! Unexpected drops are retried with a bounded exponential backoff
//! described by [`ReconnectPolicy`].

use std::{fmt, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::StreamExt;
use shared::protocol::FeedFrame;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    credentials::strip_bearer,
    error::{ChannelError, ProtocolError},
    feed::FeedCommand,
    state::Command,
};

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    PublicFeed,
    UserFeed,
}

impl ChannelKey {
    /// Wraps a feed command for the slice this channel delivers into.
    pub fn command(self, command: FeedCommand) -> Command {
        match self {
            ChannelKey::PublicFeed => Command::Feed(command),
            ChannelKey::UserFeed => Command::UserFeed(command),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelKey::PublicFeed => "public-feed",
            ChannelKey::UserFeed => "user-feed",
        })
    }
}

/// Parses one inbound text frame.
pub fn parse_frame(text: &str) -> Result<FeedFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Addresses of the two live channels, derived from one base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoints {
    base: Url,
}

impl ChannelEndpoints {
    pub fn new(feed_url: &str) -> Result<Self, ChannelError> {
        let base = Url::parse(feed_url)
            .map_err(|err| ChannelError::InvalidEndpoint(format!("{feed_url}: {err}")))?;
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidEndpoint(format!(
                "{feed_url}: scheme must be ws or wss"
            )));
        }
        if base.cannot_be_a_base() {
            return Err(ChannelError::InvalidEndpoint(feed_url.to_string()));
        }
        Ok(Self { base })
    }

    /// Maps the REST base URL onto the websocket host: `http`/`https`
    /// become `ws`/`wss` and a trailing `/api` becomes `/orders`.
    pub fn from_api_url(api_url: &str) -> Result<Self, ChannelError> {
        let ws_url = if let Some(rest) = api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ChannelError::InvalidEndpoint(format!(
                "{api_url}: api url must start with http:// or https://"
            )));
        };
        let ws_url = ws_url.trim_end_matches('/');
        let ws_url = match ws_url.strip_suffix("/api") {
            Some(host) => format!("{host}/orders"),
            None => format!("{ws_url}/orders"),
        };
        Self::new(&ws_url)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Public feed lives under `/all`; the user feed carries the access
    /// credential, minus any `Bearer ` scheme, as the `token` query value.
    pub fn address(&self, key: ChannelKey, auth_token: Option<&str>) -> Result<Url, ChannelError> {
        let mut url = self.base.clone();
        match key {
            ChannelKey::PublicFeed => {
                url.path_segments_mut()
                    .map_err(|_| ChannelError::InvalidEndpoint(self.base.to_string()))?
                    .pop_if_empty()
                    .push("all");
            }
            ChannelKey::UserFeed => {
                let token = auth_token
                    .map(strip_bearer)
                    .filter(|token| !token.is_empty())
                    .ok_or(ChannelError::MissingToken)?;
                url.query_pairs_mut().append_pair("token", token);
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Opens live connections. Swapped out in tests.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn open(&self, endpoint: &Url) -> anyhow::Result<Box<dyn FeedSocket>>;
}

#[async_trait]
pub trait FeedSocket: Send {
    /// Next text frame. `None` once the peer has closed the connection.
    async fn next_frame(&mut self) -> Option<anyhow::Result<String>>;
    async fn close(&mut self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn open(&self, endpoint: &Url) -> anyhow::Result<Box<dyn FeedSocket>> {
        let (stream, _) = connect_async(endpoint.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", redacted(endpoint)))?;
        Ok(Box::new(WebSocketFeed { stream }))
    }
}

struct WebSocketFeed {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedSocket for WebSocketFeed {
    async fn next_frame(&mut self) -> Option<anyhow::Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("channel: dropping non-utf8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(anyhow!("websocket receive failed: {err}"))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "channel: close handshake failed");
        }
    }
}

/// Endpoint for logs, with the user token masked.
fn redacted(endpoint: &Url) -> String {
    if endpoint.query().is_none() {
        return endpoint.to_string();
    }
    let mut url = endpoint.clone();
    url.set_query(Some("token=***"));
    url.to_string()
}

struct ActiveChannel {
    key: ChannelKey,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owner of the one live connection. Callers serialize access (the
/// coordinator keeps it behind a mutex), so `start` and `stop` never
/// overlap on the connection.
pub struct ChannelManager {
    transport: Arc<dyn FeedTransport>,
    endpoints: ChannelEndpoints,
    policy: ReconnectPolicy,
    close_timeout: Duration,
    sink: mpsc::UnboundedSender<Command>,
    active: Option<ActiveChannel>,
}

impl ChannelManager {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        endpoints: ChannelEndpoints,
        policy: ReconnectPolicy,
        sink: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            transport,
            endpoints,
            policy,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            sink,
            active: None,
        }
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Channel whose reader task is still running.
    pub fn active(&self) -> Option<ChannelKey> {
        self.active
            .as_ref()
            .filter(|active| !active.task.is_finished())
            .map(|active| active.key)
    }

    /// Opens `key`, closing whatever connection was open before. The
    /// address is validated first, so a refused start leaves the current
    /// connection alone.
    pub async fn start(
        &mut self,
        key: ChannelKey,
        auth_token: Option<&str>,
    ) -> Result<(), ChannelError> {
        let endpoint = self.endpoints.address(key, auth_token)?;
        self.close_active().await;

        info!(channel = %key, endpoint = %redacted(&endpoint), "channel: opening");
        let socket = match self.transport.open(&endpoint).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(channel = %key, error = %err, "channel: open failed");
                self.emit(key.command(FeedCommand::ChannelFailed { message: None }));
                return Err(ChannelError::Open {
                    key,
                    source: err.into(),
                });
            }
        };
        self.emit(key.command(FeedCommand::ChannelOpened));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let reader = ChannelReader {
            key,
            endpoint,
            transport: Arc::clone(&self.transport),
            policy: self.policy,
            sink: self.sink.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(reader.run(socket));
        self.active = Some(ActiveChannel {
            key,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Closes the connection if `key` is the active channel. Returns
    /// whether anything was closed.
    pub async fn stop(&mut self, key: ChannelKey) -> bool {
        match &self.active {
            Some(active) if active.key == key => {
                self.close_active().await;
                true
            }
            _ => {
                debug!(channel = %key, "channel: stop for inactive channel ignored");
                false
            }
        }
    }

    /// Closes whatever is open and waits for the reader to finish, so the
    /// socket is gone by the time this returns.
    pub async fn close_active(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        let _ = active.shutdown.send(true);
        if tokio::time::timeout(self.close_timeout, &mut active.task)
            .await
            .is_err()
        {
            warn!(channel = %active.key, "channel: reader did not stop in time, aborting");
            active.task.abort();
            let _ = (&mut active.task).await;
        }
        info!(channel = %active.key, "channel: closed");
        self.emit(active.key.command(FeedCommand::ChannelClosed));
    }

    fn emit(&self, command: Command) {
        if self.sink.send(command).is_err() {
            debug!("channel: command sink closed");
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(true);
            active.task.abort();
        }
    }
}

enum ReadOutcome {
    Shutdown,
    Dropped(String),
}

struct ChannelReader {
    key: ChannelKey,
    endpoint: Url,
    transport: Arc<dyn FeedTransport>,
    policy: ReconnectPolicy,
    sink: mpsc::UnboundedSender<Command>,
    shutdown: watch::Receiver<bool>,
}

impl ChannelReader {
    async fn run(mut self, mut socket: Box<dyn FeedSocket>) {
        loop {
            match self.read(socket.as_mut()).await {
                ReadOutcome::Shutdown => {
                    socket.close().await;
                    return;
                }
                ReadOutcome::Dropped(reason) => {
                    warn!(channel = %self.key, reason = %reason, "channel: connection dropped");
                    self.emit(FeedCommand::ChannelClosed);
                }
            }

            // The dead socket goes before a replacement opens.
            drop(socket);
            socket = match self.reconnect().await {
                Some(next) => next,
                None => return,
            };
        }
    }

    async fn read(&mut self, socket: &mut dyn FeedSocket) -> ReadOutcome {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return ReadOutcome::Shutdown,
                frame = socket.next_frame() => match frame {
                    Some(Ok(text)) => {
                        if !self.deliver(&text) {
                            return ReadOutcome::Shutdown;
                        }
                    }
                    Some(Err(err)) => return ReadOutcome::Dropped(err.to_string()),
                    None => return ReadOutcome::Dropped("closed by peer".to_string()),
                },
            }
        }
    }

    /// Routes one frame. Malformed frames are logged and dropped; the
    /// connection stays up. Returns `false` once nobody is listening.
    fn deliver(&self, text: &str) -> bool {
        match parse_frame(text) {
            Ok(frame) => {
                debug!(channel = %self.key, orders = frame.orders.len(), "channel: frame received");
                self.sink
                    .send(self.key.command(FeedCommand::ReplaceData(frame)))
                    .is_ok()
            }
            Err(err) => {
                warn!(channel = %self.key, error = %err, "channel: dropping malformed frame");
                true
            }
        }
    }

    async fn reconnect(&mut self) -> Option<Box<dyn FeedSocket>> {
        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay_for(attempt);
            debug!(
                channel = %self.key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "channel: reconnect scheduled"
            );
            tokio::select! {
                _ = self.shutdown.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                _ = self.shutdown.changed() => return None,
                opened = self.transport.open(&self.endpoint) => opened,
            };
            match opened {
                Ok(socket) => {
                    info!(channel = %self.key, attempt, "channel: reconnected");
                    self.emit(FeedCommand::ChannelOpened);
                    return Some(socket);
                }
                Err(err) => {
                    warn!(channel = %self.key, attempt, error = %err, "channel: reconnect failed");
                }
            }
        }

        self.emit(FeedCommand::ChannelFailed {
            message: Some(format!(
                "live feed lost after {} reconnect attempts",
                self.policy.max_attempts
            )),
        });
        None
    }

    fn emit(&self, command: FeedCommand) {
        if self.sink.send(self.key.command(command)).is_err() {
            debug!(channel = %self.key, "channel: command sink closed");
        }
    }
}

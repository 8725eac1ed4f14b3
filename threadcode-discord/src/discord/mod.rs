//! Discord channel for threadcode.
//!
//! Connects via Discord Gateway WebSocket for real-time messages and uses the
//! REST API for replies, typing indicators, and thread lookups.

pub mod format;

use crate::message::{InboundMessage, ParentChannel, ThreadChannel};
use crate::traits::{ChannelError, ChannelResult, Gateway, ThreadReplies};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio_tungstenite::tungstenite::Message;

/// Default Discord REST API base.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | (1 << 9) | (1 << 15);

/// Channel types that are threads (announcement, public, private).
const THREAD_CHANNEL_TYPES: [u8; 3] = [10, 11, 12];

/// Subset of a Discord channel object.
#[derive(Debug, Clone, Deserialize)]
struct ChannelInfo {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
}

impl ChannelInfo {
    fn is_thread(&self) -> bool {
        THREAD_CHANNEL_TYPES.contains(&self.kind)
    }
}

/// Discord channel using Gateway WebSocket for real-time messaging.
pub struct DiscordChannel {
    bot_token: String,
    api_base: String,
    client: Client,
    bot_user_id: Option<String>,
    connected: Arc<RwLock<bool>>,
    channels: DashMap<String, ChannelInfo>,
    shutdown_signal: Arc<Notify>,
}

impl DiscordChannel {
    /// Create a new Discord channel.
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: Client::new(),
            bot_user_id: None,
            connected: Arc::new(RwLock::new(false)),
            channels: DashMap::new(),
            shutdown_signal: Arc::new(Notify::new()),
        }
    }

    /// Point REST calls at a different API base.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Our own user ID, known after `init`.
    pub fn bot_user_id(&self) -> Option<&str> {
        self.bot_user_id.as_deref()
    }

    /// Whether `init` succeeded and `shutdown` has not been called.
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    /// Fetch a channel object, caching the result.
    async fn channel_info(&self, channel_id: &str) -> ChannelResult<ChannelInfo> {
        if let Some(info) = self.channels.get(channel_id) {
            return Ok(info.value().clone());
        }

        let resp = self
            .client
            .get(format!("{}/channels/{}", self.api_base, channel_id))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Discord channel lookup error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Internal(format!(
                "Discord API error ({status}) fetching channel {channel_id}: {error}"
            )));
        }

        let info: ChannelInfo = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse channel: {e}")))?;

        self.channels.insert(channel_id.to_string(), info.clone());
        Ok(info)
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> ChannelResult<()> {
        let resp = self
            .client
            .post(url)
            .header("Authorization", self.auth_header())
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("Discord send error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "Discord API error ({status}): {error}"
            )));
        }

        Ok(())
    }
}

/// Build an `InboundMessage` from a `MESSAGE_CREATE` payload.
fn parse_message_create(d: &serde_json::Value) -> Option<InboundMessage> {
    let author = d.get("author")?;

    Some(InboundMessage {
        id: d.get("id")?.as_str()?.to_string(),
        channel_id: d.get("channel_id")?.as_str()?.to_string(),
        author_id: author.get("id")?.as_str()?.to_string(),
        author_is_bot: author
            .get("bot")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        content: d
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}

#[async_trait]
impl Gateway for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn init(&mut self) -> ChannelResult<()> {
        // Verify token and learn our own user ID
        let resp = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Auth(format!("Failed to verify Discord token: {e}")))?;

        if !resp.status().is_success() {
            return Err(ChannelError::Auth("Invalid Discord bot token".into()));
        }

        let me: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Auth(format!("Invalid user response: {e}")))?;

        let id = me
            .get("id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ChannelError::Auth("Discord user response has no id".into()))?;

        self.bot_user_id = Some(id.to_string());
        *self.connected.write().await = true;
        tracing::info!(bot_user_id = %id, "Discord channel initialized");
        Ok(())
    }

    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        if !self.is_connected().await {
            return Err(ChannelError::NotReady);
        }

        // Get Gateway URL
        let gw_resp: serde_json::Value = self
            .client
            .get(format!("{}/gateway/bot", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to get gateway: {e}")))?
            .json()
            .await
            .map_err(|e| ChannelError::Connection(format!("Invalid gateway response: {e}")))?;

        let gw_url = gw_resp
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| ChannelError::Connection(format!("WebSocket connection failed: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        // Read Hello (opcode 10)
        let hello = read
            .next()
            .await
            .ok_or_else(|| ChannelError::Connection("No hello from gateway".into()))?
            .map_err(|e| ChannelError::Connection(format!("WebSocket error: {e}")))?;

        let hello_data: serde_json::Value = serde_json::from_str(&hello.to_string())
            .map_err(|e| ChannelError::Connection(format!("Invalid hello: {e}")))?;

        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(41250);

        // Send Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "threadcode",
                    "device": "threadcode"
                }
            }
        });

        write
            .send(Message::Text(identify.to_string()))
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to identify: {e}")))?;

        tracing::info!("Discord: connected and identified");

        let mut heartbeat =
            tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval));
        let mut sequence: Option<u64> = None;

        // Only an explicit shutdown ends the loop with `Ok`.
        let outcome = loop {
            tokio::select! {
                _ = self.shutdown_signal.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }
                _ = heartbeat.tick() => {
                    let hb = json!({"op": 1, "d": sequence});
                    if let Err(e) = write.send(Message::Text(hb.to_string())).await {
                        break Err(ChannelError::Connection(format!("Failed to send heartbeat: {e}")));
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::warn!(frame = ?frame, "Discord: gateway closed the connection");
                            break Err(ChannelError::Connection(format!(
                                "Gateway closed the connection: {frame:?}"
                            )));
                        }
                        None => {
                            break Err(ChannelError::Connection("Gateway stream ended".into()));
                        }
                        Some(Err(e)) => {
                            break Err(ChannelError::Connection(format!("WebSocket error: {e}")));
                        }
                        _ => continue,
                    };

                    let event: serde_json::Value = match serde_json::from_str(&msg) {
                        Ok(e) => e,
                        Err(_) => continue,
                    };

                    if let Some(s) = event.get("s").and_then(serde_json::Value::as_u64) {
                        sequence = Some(s);
                    }

                    match event.get("op").and_then(serde_json::Value::as_u64).unwrap_or(0) {
                        1 => {
                            let hb = json!({"op": 1, "d": sequence});
                            if let Err(e) = write.send(Message::Text(hb.to_string())).await {
                                break Err(ChannelError::Connection(format!(
                                    "Failed to send heartbeat: {e}"
                                )));
                            }
                            continue;
                        }
                        7 | 9 => {
                            break Err(ChannelError::Connection(
                                "Gateway requested reconnect or invalidated the session".into(),
                            ));
                        }
                        0 => {}
                        _ => continue,
                    }

                    let event_type = event.get("t").and_then(|t| t.as_str()).unwrap_or("");
                    let Some(d) = event.get("d") else {
                        continue;
                    };

                    match event_type {
                        "READY" => {
                            let tag = d
                                .get("user")
                                .and_then(|u| u.get("username"))
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or("unknown");
                            let guilds = d
                                .get("guilds")
                                .and_then(serde_json::Value::as_array)
                                .map_or(0, Vec::len);
                            tracing::info!(bot = %tag, guilds, "Discord: logged in");
                        }
                        "MESSAGE_CREATE" => {
                            if let Some(message) = parse_message_create(d) {
                                tracing::debug!(
                                    channel = "discord",
                                    user_id = %message.author_id,
                                    chat_id = %message.channel_id,
                                    "IM message received"
                                );
                                callback(message);
                            }
                        }
                        _ => {}
                    }
                }
            }
        };

        *self.connected.write().await = false;
        outcome
    }

    async fn health_check(&self) -> ChannelResult<()> {
        let resp = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Health check failed: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Auth("Discord authentication failed".into()))
        }
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        *self.connected.write().await = false;
        self.shutdown_signal.notify_one();
        tracing::info!("Discord channel shutdown");
        Ok(())
    }
}

#[async_trait]
impl ThreadReplies for DiscordChannel {
    async fn resolve_thread(&self, channel_id: &str) -> ChannelResult<Option<ThreadChannel>> {
        let info = self.channel_info(channel_id).await?;
        if !info.is_thread() {
            return Ok(None);
        }

        let parent = match info.parent_id.as_deref() {
            Some(parent_id) => match self.channel_info(parent_id).await {
                Ok(p) => Some(ParentChannel {
                    id: p.id,
                    name: p.name.unwrap_or_default(),
                }),
                Err(e) => {
                    tracing::warn!(thread_id = %info.id, parent_id, error = %e, "Parent channel lookup failed");
                    None
                }
            },
            None => None,
        };

        Ok(Some(ThreadChannel {
            id: info.id,
            name: info.name.unwrap_or_default(),
            parent,
        }))
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> ChannelResult<()> {
        let url = format!("{}/channels/{}/messages", self.api_base, message.channel_id);
        let body = json!({
            "content": text,
            "message_reference": { "message_id": message.id },
            "allowed_mentions": { "replied_user": false },
        });
        self.post_json(&url, &body).await
    }

    async fn send_typing(&self, channel_id: &str) -> ChannelResult<()> {
        let url = format!("{}/channels/{}/typing", self.api_base, channel_id);
        self.post_json(&url, &json!({})).await
    }
}

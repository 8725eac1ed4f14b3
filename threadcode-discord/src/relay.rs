//! Message relay between chat threads and opencode sessions.
//!
//! Handles the complete message flow:
//! 1. Filter out bot messages and anything outside a thread
//! 2. Activate the thread on its first mention of the bot
//! 3. Forward the mention-stripped text to the thread's session
//! 4. Reply with the assistant's answer, split to the platform limit

use crate::discord::format::split_message;
use crate::message::{InboundMessage, ThreadChannel};
use crate::opencode::OpencodeClient;
use crate::session::{Session, SessionRegistry};
use crate::traits::ThreadReplies;
use anyhow::Result;
use regex::Regex;
use std::sync::Arc;
use tracing::Instrument;

/// Reply sent when a session could not be created.
pub const ACTIVATION_FAILED_REPLY: &str =
    "❌ Failed to create OpenCode session. Check if the directory exists.";
/// Reply sent once a thread is bound to a session.
pub const ACTIVATED_REPLY: &str = "✅ OpenCode session activated! You can now chat with me.";
/// Reply sent when forwarding a message fails.
pub const RELAY_ERROR_REPLY: &str = "❌ Error communicating with OpenCode server.";

/// Terminal state of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Bot author, not a thread, or an unactivated thread without a mention
    Ignored,
    /// Session creation failed; the user was told
    ActivationFailed,
    /// Nothing left after stripping the mention
    Dropped,
    /// The assistant's answer was delivered in `chunks` replies
    Replied { chunks: usize },
    /// Forwarding failed; the user got an error reply
    Failed,
}

/// Routes thread messages to opencode and answers back.
pub struct MessageRelay {
    registry: SessionRegistry,
    client: Arc<OpencodeClient>,
    bot_user_id: String,
    mention_pattern: Regex,
}

impl MessageRelay {
    /// Create a relay answering as `bot_user_id`.
    pub fn new(client: Arc<OpencodeClient>, bot_user_id: impl Into<String>) -> Self {
        let bot_user_id = bot_user_id.into();
        let mention_pattern = mention_regex(&bot_user_id);

        Self {
            registry: SessionRegistry::new(client.clone()),
            client,
            bot_user_id,
            mention_pattern,
        }
    }

    /// The session registry owned by this relay.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    /// Remove every `<@id>` / `<@!id>` mention of the bot and trim.
    pub fn strip_mentions(&self, content: &str) -> String {
        self.mention_pattern.replace_all(content, "").trim().to_string()
    }

    /// Handle one inbound message to completion.
    pub async fn handle<P>(&self, platform: &P, message: &InboundMessage) -> RelayOutcome
    where
        P: ThreadReplies + ?Sized,
    {
        if message.author_is_bot {
            return RelayOutcome::Ignored;
        }

        let thread = match platform.resolve_thread(&message.channel_id).await {
            Ok(Some(thread)) => thread,
            Ok(None) => return RelayOutcome::Ignored,
            Err(e) => {
                tracing::warn!(
                    channel_id = %message.channel_id,
                    error = %e,
                    "Could not resolve channel, ignoring message"
                );
                return RelayOutcome::Ignored;
            }
        };

        let session = match self.registry.get(&thread.id) {
            Some(session) => session,
            None => match self.activate(platform, message, &thread).await {
                Ok(Some(session)) => session,
                Ok(None) => return RelayOutcome::Ignored,
                Err(outcome) => return outcome,
            },
        };

        if let Err(e) = platform.send_typing(&thread.id).await {
            tracing::debug!(thread_id = %thread.id, error = %e, "Typing indicator failed");
        }

        let content = self.strip_mentions(&message.content);
        if content.is_empty() {
            return RelayOutcome::Dropped;
        }

        match self.forward(platform, message, &session, &content).await {
            Ok(chunks) => {
                tracing::info!(
                    thread_id = %thread.id,
                    session_id = %session.session_id,
                    chunks,
                    "Relayed opencode response"
                );
                RelayOutcome::Replied { chunks }
            }
            Err(e) => {
                tracing::error!(
                    thread_id = %thread.id,
                    session_id = %session.session_id,
                    directory = %session.directory,
                    error = %e,
                    "Error sending message to opencode"
                );
                self.reply_or_log(platform, message, RELAY_ERROR_REPLY).await;
                RelayOutcome::Failed
            }
        }
    }

    /// Spawn `handle` on its own task, tagged with a trace ID.
    pub fn spawn_handle<P>(
        self: &Arc<Self>,
        platform: Arc<P>,
        message: InboundMessage,
    ) -> tokio::task::JoinHandle<RelayOutcome>
    where
        P: ThreadReplies + 'static,
    {
        let relay = Arc::clone(self);
        let span = tracing::info_span!(
            "relay",
            trace_id = %threadcode_common::logging::generate_trace_id(),
            message_id = %message.id,
            channel_id = %message.channel_id,
        );

        tokio::spawn(
            async move { relay.handle(platform.as_ref(), &message).await }.instrument(span),
        )
    }

    /// Bind an unactivated thread to a new session.
    ///
    /// `Ok(None)` means the message did not mention the bot.
    async fn activate<P>(
        &self,
        platform: &P,
        message: &InboundMessage,
        thread: &ThreadChannel,
    ) -> std::result::Result<Option<Session>, RelayOutcome>
    where
        P: ThreadReplies + ?Sized,
    {
        if !message.mentions(&self.bot_user_id) {
            return Ok(None);
        }

        match self.registry.activate(thread).await {
            Ok(activation) => {
                if activation.created {
                    self.reply_or_log(platform, message, ACTIVATED_REPLY).await;
                }
                Ok(Some(activation.session))
            }
            Err(e) => {
                tracing::warn!(thread_id = %thread.id, error = %e, "Thread activation failed");
                self.reply_or_log(platform, message, ACTIVATION_FAILED_REPLY)
                    .await;
                Err(RelayOutcome::ActivationFailed)
            }
        }
    }

    /// Send the prompt and deliver every chunk of the answer, in order.
    async fn forward<P>(
        &self,
        platform: &P,
        message: &InboundMessage,
        session: &Session,
        content: &str,
    ) -> Result<usize>
    where
        P: ThreadReplies + ?Sized,
    {
        let response = self
            .client
            .send_message(&session.session_id, content, &session.directory)
            .await?;

        let chunks = split_message(&response);
        for chunk in &chunks {
            platform.reply(message, chunk).await?;
        }

        Ok(chunks.len())
    }

    async fn reply_or_log<P>(&self, platform: &P, message: &InboundMessage, text: &str)
    where
        P: ThreadReplies + ?Sized,
    {
        if let Err(e) = platform.reply(message, text).await {
            tracing::error!(message_id = %message.id, error = %e, "Failed to send reply");
        }
    }
}

fn mention_regex(bot_user_id: &str) -> Regex {
    let pattern = format!("<@!?{}>", regex::escape(bot_user_id));
    Regex::new(&pattern).expect("escaped mention pattern is valid")
}

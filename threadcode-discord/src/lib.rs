//! threadcode - Discord threads bridged to opencode sessions.
//!
//! Each Discord thread is bound to one opencode session rooted at a directory
//! derived from the thread's parent channel name (`svc-api` → `/svc/api`).
//!
//! ## Architecture
//!
//! ```text
//! Discord gateway → MessageRelay → SessionRegistry → OpencodeClient
//!                        ↓                                  ↓
//! Discord thread  ←── reply chunks ←──────────────── assembled text
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod discord;
pub mod message;
pub mod opencode;
pub mod relay;
pub mod session;
pub mod traits;

// Re-export commonly used types
pub use discord::DiscordChannel;
pub use message::{InboundMessage, ParentChannel, ThreadChannel};
pub use opencode::{OpencodeClient, OpencodeError, PromptResponse, SessionInfo};
pub use relay::{MessageRelay, RelayOutcome};
pub use session::{channel_to_directory, Activation, Session, SessionError, SessionRegistry};
pub use traits::{ChannelError, ChannelResult, Gateway, ThreadReplies};

use std::sync::Arc;
use std::time::Duration;
use threadcode_common::config::Config;

/// Connect to Discord and relay thread messages until Ctrl-C.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let mut discord = DiscordChannel::new(config.discord.bot_token.clone())
        .with_api_base(config.discord.api_base.clone());
    discord.init().await?;

    let bot_user_id = discord
        .bot_user_id()
        .ok_or(ChannelError::NotReady)?
        .to_string();
    let discord = Arc::new(discord);

    let client = Arc::new(OpencodeClient::with_connect_timeout(
        Some(&config.opencode.base_url),
        Duration::from_secs(config.opencode.connect_timeout_secs),
    )?);
    let relay = Arc::new(MessageRelay::new(client, bot_user_id));

    tracing::info!(
        opencode = %config.opencode.base_url,
        "Relaying Discord threads to opencode"
    );

    let platform = discord.clone();
    let listener = discord.listen(move |message| {
        relay.spawn_handle(platform.clone(), message);
    });

    tokio::pin!(listener);

    tokio::select! {
        result = &mut listener => {
            result?;
            anyhow::bail!("Discord gateway connection ended without a shutdown request");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            discord.shutdown().await?;
            // Let the gateway loop send its close frame.
            listener.await?;
        }
    }

    Ok(())
}

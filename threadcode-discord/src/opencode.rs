//! opencode client - HTTP client for opencode server sessions.
//!
//! Two calls are used: `POST /session` to open a session rooted at a
//! directory, and `POST /session/{id}/message` to send a prompt. The prompt
//! response arrives as a streamed body holding a single JSON document, so it
//! is drained completely before decoding.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default opencode server endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4096";
/// Header carrying the working directory for every request.
pub const DIRECTORY_HEADER: &str = "x-opencode-directory";
/// Maximum characters of an undecodable body kept in the error.
const PREVIEW_CHARS: usize = 200;
/// TCP connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// opencode client error type.
#[derive(Debug, thiserror::Error)]
pub enum OpencodeError {
    #[error("Failed to create session: {status} {reason}")]
    CreateSession { status: u16, reason: String },

    #[error("Failed to send prompt: {status} {reason} - {body}")]
    SendPrompt {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("No response body")]
    NoBody,

    #[error("Invalid JSON response: {preview}")]
    InvalidResponse { preview: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl OpencodeError {
    /// HTTP status reported by the server, if the failure came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::CreateSession { status, .. } | Self::SendPrompt { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Request body for creating a session.
#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    title: &'a str,
    directory: &'a str,
}

/// Session descriptor returned by `POST /session`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
}

/// Request body for sending a prompt.
#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    parts: Vec<PromptPart<'a>>,
}

#[derive(Debug, Serialize)]
struct PromptPart<'a> {
    #[serde(rename = "type")]
    part_type: &'static str,
    text: &'a str,
}

/// Response to `POST /session/{id}/message`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptResponse {
    #[serde(default)]
    pub info: Option<MessageInfo>,
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

/// Assistant message metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub role: String,
}

/// One part of an assistant message.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsePart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl PromptResponse {
    /// Join the non-empty text parts with newlines, in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.part_type == "text")
            .filter_map(|p| p.text.as_deref())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for an opencode server.
pub struct OpencodeClient {
    endpoint: String,
    client: reqwest::Client,
}

impl OpencodeClient {
    /// Create a new client against `endpoint` (default: `http://localhost:4096`).
    pub fn new(endpoint: Option<&str>) -> Self {
        Self::with_connect_timeout(endpoint, Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "HTTP client builder failed, connecting without a timeout");
                Self::from_parts(endpoint, reqwest::Client::new())
            })
    }

    /// Create a new client with an explicit connect timeout.
    ///
    /// No overall request timeout is set: a prompt may run for a long time.
    pub fn with_connect_timeout(
        endpoint: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, OpencodeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self::from_parts(endpoint, client))
    }

    fn from_parts(endpoint: Option<&str>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }

    /// The configured base endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open a session titled `title`, rooted at `directory`.
    pub async fn create_session(
        &self,
        title: &str,
        directory: &str,
    ) -> Result<SessionInfo, OpencodeError> {
        let url = format!("{}/session", self.endpoint);

        tracing::debug!(endpoint = %url, directory = %directory, "Creating opencode session");

        let resp = self
            .client
            .post(&url)
            .header(DIRECTORY_HEADER, directory)
            .json(&CreateSessionRequest { title, directory })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OpencodeError::CreateSession {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        Ok(resp.json().await?)
    }

    /// Send `content` to a session and decode the full response.
    pub async fn send_prompt(
        &self,
        session_id: &str,
        content: &str,
        directory: &str,
    ) -> Result<PromptResponse, OpencodeError> {
        let url = format!("{}/session/{}/message", self.endpoint, session_id);

        tracing::debug!(
            endpoint = %url,
            session_id = %session_id,
            directory = %directory,
            "Sending prompt to opencode"
        );

        let request = PromptRequest {
            parts: vec![PromptPart {
                part_type: "text",
                text: content,
            }],
        };

        let resp = self
            .client
            .post(&url)
            .header(DIRECTORY_HEADER, directory)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OpencodeError::SendPrompt {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        let raw = drain_body(resp).await?;
        if raw.is_empty() {
            return Err(OpencodeError::NoBody);
        }

        parse_prompt_response(&raw)
    }

    /// Send `content` and return the assembled reply text.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        directory: &str,
    ) -> Result<String, OpencodeError> {
        let response = self.send_prompt(session_id, content, directory).await?;
        Ok(response.text())
    }
}

/// Read every chunk of a streamed body, then decode it as UTF-8.
async fn drain_body(resp: reqwest::Response) -> Result<String, OpencodeError> {
    let mut stream = resp.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }

    // Decoding once at the end keeps multi-byte characters split across
    // chunks intact.
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn parse_prompt_response(raw: &str) -> Result<PromptResponse, OpencodeError> {
    serde_json::from_str(raw).map_err(|e| {
        let preview: String = raw.chars().take(PREVIEW_CHARS).collect();
        tracing::error!(error = %e, preview = %preview, "Failed to parse opencode response");
        tracing::debug!(raw = %raw, "Full opencode response text");
        OpencodeError::InvalidResponse { preview }
    })
}

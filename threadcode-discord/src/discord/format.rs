//! Discord message sizing.
//!
//! Discord rejects messages longer than 2000 characters, so long assistant
//! replies are cut into consecutive chunks before sending.

/// Maximum message length for Discord.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Split a message into chunks that fit Discord's character limit.
///
/// Chunks are cut at character boundaries only: concatenating them gives back
/// `text` exactly. An empty input yields a single empty chunk.
pub fn split_message(text: &str) -> Vec<String> {
    split_at_chars(text, MAX_MESSAGE_LENGTH)
}

/// Split `text` into runs of at most `max_chars` characters.
pub fn split_at_chars(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let cut = remaining
            .char_indices()
            .nth(max_chars)
            .map_or(remaining.len(), |(idx, _)| idx);
        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }

    chunks
}

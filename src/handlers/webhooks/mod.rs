//! Inbound webhooks: Moralis Streams and the Telegram bot.

mod moralis;
mod telegram;

pub(super) use moralis::moralis;
pub(super) use telegram::telegram;

use axum::http::HeaderMap;

/// Header value as a string, if present and valid UTF-8.
fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Compare secrets without short-circuiting on the first mismatch.
pub(super) fn secrets_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

//! Converting binary data to and from `data:` URLs.

use std::sync::LazyLock;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use regex::Regex;

/// Convert binary data to a `data:` URL.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    let base64_data = BASE64_STANDARD.encode(data);
    format!("data:{};base64,{}", mime_type, base64_data)
}

/// Regex for parsing a `data:` URL.
static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime_type>[^;,]+);base64,(?P<data>.*)$")
        .expect("failed to compile data URL regex")
});

/// Parse a `data:` URL into a MIME type and Base64-encoded data.
pub fn parse_data_url(data_url: &str) -> Option<(&str, &str)> {
    let caps = DATA_URL_RE.captures(data_url)?;
    let mime_type = caps.name("mime_type")?.as_str();
    let data = caps.name("data")?.as_str();
    Some((mime_type, data))
}

/// Describe an image payload for logging, without including the image
/// itself. The payload may be bare Base64 or a `data:` URL.
pub fn describe_payload(payload: &str) -> String {
    let (mime_type, data) = match parse_data_url(payload) {
        Some((mime_type, data)) => (mime_type, data),
        None => ("unknown", payload),
    };
    if data.is_empty() {
        return "empty".to_owned();
    }
    // Base64 packs 3 bytes into every 4 characters, minus padding.
    let padding = data.bytes().rev().take_while(|&b| b == b'=').count();
    let decoded_len = (data.len() / 4 * 3).saturating_sub(padding);
    format!("{mime_type}, ~{decoded_len} bytes")
}

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::DecodeError;

const SNIPPET_CHARS: usize = 100;

/// Normalize a raw gateway response body into JSON.
///
/// Some firmware revisions answer with the JSON text spelled out as
/// whitespace-separated decimal character codes (`"123 34 ..."`), and none of
/// them set a reliable Content-Type, so every body goes through here first.
pub fn decode(raw: &[u8]) -> Result<Value, DecodeError> {
    let text = bytes_to_text(raw);
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    let recovered;
    let json_text = if is_char_code_stream(trimmed) {
        recovered = char_codes_to_text(trimmed)?;
        trace!(decoded = %recovered, "recovered JSON from character codes");
        recovered.as_str()
    } else {
        trimmed
    };

    parse_first_value(json_text)
}

fn bytes_to_text(raw: &[u8]) -> String {
    if raw.is_ascii() {
        // ASCII is a strict subset of UTF-8
        raw.iter().map(|b| *b as char).collect()
    } else {
        String::from_utf8_lossy(raw).into_owned()
    }
}

fn is_char_code_stream(text: &str) -> bool {
    if text.is_empty() || text.starts_with('{') || text.starts_with('[') {
        return false;
    }
    text.chars().all(|c| c.is_ascii_digit() || c.is_whitespace())
}

/// Codes are the body's bytes; multi-byte UTF-8 names arrive split across
/// several codes. Codes above 255 are taken as whole code points.
fn char_codes_to_text(text: &str) -> Result<String, DecodeError> {
    let codes = text
        .split_whitespace()
        .map(|token| {
            token.parse::<u32>().map_err(|_| DecodeError {
                message: format!("invalid character code {token}"),
                snippet: snippet(text),
            })
        })
        .collect::<Result<Vec<u32>, _>>()?;

    if let Some(bytes) = codes
        .iter()
        .map(|c| u8::try_from(*c).ok())
        .collect::<Option<Vec<u8>>>()
    {
        return Ok(bytes_to_text(&bytes));
    }

    codes
        .iter()
        .map(|c| {
            char::from_u32(*c).ok_or_else(|| DecodeError {
                message: format!("invalid character code {c}"),
                snippet: snippet(text),
            })
        })
        .collect()
}

fn parse_first_value(text: &str) -> Result<Value, DecodeError> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => {
            let consumed = stream.byte_offset();
            if !text[consumed..].trim().is_empty() {
                debug!(
                    trailing = %snippet(&text[consumed..]),
                    "ignoring trailing bytes after JSON body"
                );
            }
            Ok(value)
        }
        Some(Err(e)) => Err(DecodeError {
            message: e.to_string(),
            snippet: snippet(text),
        }),
        None => Err(DecodeError {
            message: "empty response body".to_string(),
            snippet: String::new(),
        }),
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

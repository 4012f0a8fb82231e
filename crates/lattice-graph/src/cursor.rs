//! Opaque pagination cursors (spec §4.10 "Cursors", §9 "Opaque cursors").

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CursorPayload {
    offset: usize,
}

/// Encode an offset into an opaque, base64-of-JSON token. Internal shape is
/// never exposed to callers.
pub fn encode_cursor(offset: usize) -> String {
    let json = serde_json::to_vec(&CursorPayload { offset }).expect("cursor payload always serializes");
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a cursor previously produced by `encode_cursor`. An invalid or
/// missing cursor restarts from zero rather than erroring (spec §8 "invalid
/// cursor ⇒ restart from zero").
pub fn decode_cursor(cursor: Option<&str>) -> usize {
    let Some(cursor) = cursor else { return 0 };
    URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<CursorPayload>(&bytes).ok())
        .map(|p| p.offset)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_offset() {
        let cursor = encode_cursor(42);
        assert_eq!(decode_cursor(Some(&cursor)), 42);
    }

    #[test]
    fn invalid_cursor_restarts_at_zero() {
        assert_eq!(decode_cursor(Some("not-a-valid-cursor!!")), 0);
        assert_eq!(decode_cursor(None), 0);
    }

    #[test]
    fn cursor_is_not_a_bare_offset_string() {
        let cursor = encode_cursor(7);
        assert_ne!(cursor, "7");
    }
}

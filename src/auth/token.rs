//! Expiry inspection for self-describing (JWT-shaped) auth tokens.
//!
//! Only the payload segment is looked at; signatures are the server's
//! business. Every failure mode collapses to "no expiry" / "not valid".

use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
#[inline]
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Decode one token segment. Padding and whitespace are optional, and both
/// the URL-safe and the standard alphabet are accepted.
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let normalized: String = segment
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect();
    if normalized.is_empty() {
        return None;
    }
    URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(normalized.as_bytes()))
        .ok()
}

/// Extract the `exp` claim (seconds since epoch) from a token.
///
/// Returns `None` for empty tokens, tokens without exactly three segments,
/// undecodable payloads and payloads without an integer `exp`. Values
/// outside the `i64` range saturate to `i64::MIN`/`i64::MAX`.
pub fn token_expiry(token: &str) -> Option<i64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let payload = decode_segment(parts[1])?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    let exp: i128 = match claims.get("exp")? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))?,
        serde_json::Value::String(s) => s.trim().parse::<i128>().ok()?,
        _ => return None,
    };
    Some(exp.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
}

/// `true` when `token` carries an expiry later than `now` (Unix seconds).
pub(crate) fn is_token_valid_at(token: &str, now: i64) -> bool {
    if token.is_empty() {
        return false;
    }
    token_expiry(token).map_or(false, |exp| exp > now)
}

/// `true` when `token` is well formed and not yet expired.
pub fn is_token_valid(token: &str) -> bool {
    is_token_valid_at(token, now_secs())
}

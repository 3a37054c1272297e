//! Shared helpers for the wiremock-backed integration tests.

#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use pocket_link::{ConnectionOptions, EventHandlers, PocketLinkClient, PocketLinkTimeouts};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wiremock::MockServer;

/// Unsigned token expiring `offset_secs` from now (negative for expired).
pub fn token_expiring_in(offset_secs: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({ "id": "user1", "exp": now + offset_secs });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.sig", header, payload)
}

/// Event-stream body: each `(event, id, data)` becomes one SSE block.
pub fn sse_body(events: &[(&str, &str, &str)]) -> String {
    events
        .iter()
        .map(|(event, id, data)| format!("event:{}\nid:{}\ndata:{}\n\n", event, id, data))
        .collect()
}

pub fn connect_body(connection_id: &str) -> String {
    sse_body(&[(
        "PB_CONNECT",
        connection_id,
        &format!(r#"{{"clientId":"{}"}}"#, connection_id),
    )])
}

/// No reconnection after the first stream ends.
pub fn one_shot_options() -> ConnectionOptions {
    ConnectionOptions::new().with_auto_reconnect(false)
}

/// Client for `server` with fast timeouts.
pub fn client_for(server: &MockServer, options: ConnectionOptions) -> PocketLinkClient {
    client_with_handlers(server, options, EventHandlers::new())
}

pub fn client_with_handlers(
    server: &MockServer,
    options: ConnectionOptions,
    handlers: EventHandlers,
) -> PocketLinkClient {
    PocketLinkClient::builder()
        .base_url(server.uri())
        .timeouts(
            PocketLinkTimeouts::builder()
                .connection_timeout(Duration::from_secs(2))
                .request_timeout(Duration::from_secs(2))
                .subscribe_timeout(Duration::from_secs(3))
                .submit_timeout(Duration::from_secs(2))
                .build(),
        )
        .connection_options(options)
        .event_handlers(handlers)
        .build()
        .unwrap()
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

//! `text/event-stream` decoding.
//!
//! [`SseDecoder`] is a push parser: feed it arbitrary byte chunks as they
//! arrive and it returns every event completed by that chunk. Lines may be
//! split across chunks, including a CRLF pair split between two chunks.

use crate::connection::EventStream;
use crate::error::{PocketLinkError, Result};
use crate::models::RealtimeEvent;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;

const DEFAULT_EVENT_NAME: &str = "message";

/// Upper bound for a single line and for the data of one pending event.
pub const DEFAULT_MAX_LINE_LEN: usize = 4 * 1024 * 1024;

/// Incremental server-sent-events decoder.
///
/// ```rust
/// use pocket_link::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert!(decoder.push(b"event: PB_CONNECT\nid: abc\nda").unwrap().is_empty());
/// let events = decoder.push(b"ta: {\"clientId\":\"abc\"}\n\n").unwrap();
/// assert_eq!(events[0].event, "PB_CONNECT");
/// assert_eq!(events[0].id.as_deref(), Some("abc"));
/// ```
#[derive(Debug)]
pub struct SseDecoder {
    max_line_len: usize,
    line: Vec<u8>,
    skip_lf: bool,
    event: Option<String>,
    data: Option<String>,
    last_id: Option<String>,
    retry: Option<u64>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder rejecting lines (and accumulated event data) longer than
    /// `max_line_len` bytes.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            max_line_len,
            line: Vec::new(),
            skip_lf: false,
            event: None,
            data: None,
            last_id: None,
            retry: None,
        }
    }

    /// Feed `chunk` and collect the events it completes.
    ///
    /// Fails with [`PocketLinkError::StreamError`] once a line or the data of
    /// the pending event exceeds the length limit. The decoder is reset and
    /// events completed earlier in the same chunk are dropped; the caller is
    /// expected to abandon the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RealtimeEvent>> {
        let mut out = Vec::new();
        for &byte in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' => {
                    self.skip_lf = true;
                    self.end_line(&mut out);
                },
                b'\n' => self.end_line(&mut out),
                _ => self.line.push(byte),
            }
            if self.line.len() > self.max_line_len
                || self.data.as_ref().is_some_and(|d| d.len() > self.max_line_len)
            {
                self.reset();
                return Err(PocketLinkError::StreamError(format!(
                    "Event stream line exceeds {} bytes",
                    self.max_line_len
                )));
            }
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.line = Vec::new();
        self.skip_lf = false;
        self.event = None;
        self.data = None;
    }

    /// Last `retry:` value seen on the stream, in milliseconds.
    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    fn end_line(&mut self, out: &mut Vec<RealtimeEvent>) {
        let raw = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&raw);

        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                out.push(event);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            },
            None => (&*line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                },
                None => self.data = Some(value.to_string()),
            },
            "id" => {
                if !value.contains('\0') {
                    self.last_id = if value.is_empty() {
                        None
                    } else {
                        Some(value.to_string())
                    };
                }
            },
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok();
                }
            },
            _ => {},
        }
    }

    fn dispatch(&mut self) -> Option<RealtimeEvent> {
        let event = self.event.take();
        let data = self.data.take()?;
        Some(RealtimeEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            id: self.last_id.clone(),
            data: Some(data),
            retry: self.retry,
        })
    }
}

/// Turn a response body into a stream of decoded events.
///
/// A transport error is yielded once as an `Err` item. An incomplete event at
/// the end of the body is discarded.
pub fn decode_event_stream<S, E>(body: S) -> EventStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
    PocketLinkError: From<E>,
{
    let state = (Box::pin(body), SseDecoder::new(), VecDeque::new(), false);
    futures_util::stream::unfold(state, |(mut body, mut decoder, mut ready, done)| async move {
        loop {
            if let Some(event) = ready.pop_front() {
                return Some((Ok(event), (body, decoder, ready, done)));
            }
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) => match decoder.push(&chunk) {
                    Ok(events) => ready.extend(events),
                    Err(e) => return Some((Err(e), (body, decoder, ready, true))),
                },
                Some(Err(e)) => {
                    return Some((Err(PocketLinkError::from(e)), (body, decoder, ready, true)));
                },
                None => return None,
            }
        }
    })
    .boxed()
}

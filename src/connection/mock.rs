//! Scripted in-memory transport for unit tests.

use crate::connection::{EventStream, RealtimeTransport};
use crate::error::{PocketLinkError, Result};
use crate::models::{RealtimeEvent, SubmitSubscriptionsRequest};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `cond` until it holds, panicking after about two seconds.
pub(crate) async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[derive(Default)]
pub(crate) struct MockTransport {
    streams: Mutex<Vec<mpsc::UnboundedSender<Result<RealtimeEvent>>>>,
    opened_paths: Mutex<Vec<String>>,
    open_attempts: AtomicUsize,
    failing_opens: AtomicUsize,
    submissions: Mutex<Vec<SubmitSubscriptionsRequest>>,
    failing_submits: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` `open_stream` calls fail.
    pub(crate) fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` submissions fail.
    pub(crate) fn fail_next_submits(&self, count: usize) {
        self.failing_submits.store(count, Ordering::SeqCst);
    }

    /// Push an event on the most recently opened stream.
    pub(crate) fn emit(&self, event: RealtimeEvent) {
        if let Some(tx) = self.streams.lock().unwrap().last() {
            let _ = tx.send(Ok(event));
        }
    }

    /// End the most recently opened stream as if the server closed it.
    pub(crate) fn close_stream(&self) {
        self.streams.lock().unwrap().pop();
    }

    pub(crate) fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn opened_paths(&self) -> Vec<String> {
        self.opened_paths.lock().unwrap().clone()
    }

    pub(crate) fn submissions(&self) -> Vec<SubmitSubscriptionsRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    /// Wait until `count` streams were successfully opened.
    pub(crate) async fn wait_for_opens(&self, count: usize) {
        eventually(|| self.opened_paths.lock().unwrap().len() >= count).await;
    }

    pub(crate) async fn wait_for_submissions(&self, count: usize) {
        eventually(|| self.submission_count() >= count).await;
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    async fn open_stream(&self, path: &str) -> Result<EventStream> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_opens) {
            return Err(PocketLinkError::NetworkError("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push(tx);
        self.opened_paths.lock().unwrap().push(path.to_string());

        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn submit(&self, _path: &str, request: &SubmitSubscriptionsRequest) -> Result<()> {
        self.submissions.lock().unwrap().push(request.clone());
        if take_failure(&self.failing_submits) {
            return Err(PocketLinkError::ServerError {
                status_code: 400,
                url: "http://mock/api/realtime".to_string(),
                data: None,
            });
        }
        Ok(())
    }
}

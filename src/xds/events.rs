//! Lossy notification surface between a session's receive loop and callers.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::type_url::ResourceType;
use crate::errors::{AdscError, Result};

/// Something a caller can wait for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A push of this type was processed
    Update(ResourceType),
    /// The session terminated
    Close,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Update(kind) => write!(f, "{}", kind),
            Event::Close => f.write_str("close"),
        }
    }
}

impl FromStr for Event {
    type Err = AdscError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "close" {
            return Ok(Event::Close);
        }
        s.parse().map(Event::Update)
    }
}

/// Bounded event queue. Producers never block: update events are dropped
/// when the buffer is full, and the close event is latched separately so it
/// can never be lost.
#[derive(Debug)]
pub struct EventChannel {
    tx: mpsc::Sender<ResourceType>,
    rx: Mutex<mpsc::Receiver<ResourceType>>,
    closed: CancellationToken,
    close_delivered: AtomicBool,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
            close_delivered: AtomicBool::new(false),
        }
    }

    /// Returns false if the event was dropped. Nothing is queued once the
    /// close event has been latched.
    pub fn publish(&self, resource_type: ResourceType) -> bool {
        if self.closed.is_cancelled() {
            trace!(event = %resource_type, "Session closed, dropping event");
            return false;
        }
        match self.tx.try_send(resource_type) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(event = %resource_type, "Event buffer full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Latch the close event. Only the first call has any effect; returns
    /// whether this call was it.
    pub fn publish_close(&self) -> bool {
        let first = !self.closed.is_cancelled();
        self.closed.cancel();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait for the next event matching `want` (any event when `None`).
    ///
    /// Buffered updates are delivered before the close event, and the close
    /// event is delivered to exactly one waiter. Once it has been consumed,
    /// further waits fail with `Closed`; waiting for a specific type on a
    /// closed session fails with `Closed` as well.
    pub async fn wait(&self, want: Option<Event>, timeout: Duration) -> Result<Event> {
        let wait = async {
            let mut rx = self.rx.lock().await;
            loop {
                let next = tokio::select! {
                    biased;
                    Some(kind) = rx.recv() => Event::Update(kind),
                    _ = self.closed.cancelled() => {
                        // Drain anything that raced with the close
                        match rx.try_recv() {
                            Ok(kind) => Event::Update(kind),
                            Err(_) => return self.take_close(want),
                        }
                    }
                };
                if want.map_or(true, |want| want == next) {
                    return Ok(next);
                }
                trace!(event = %next, "Discarding event while waiting");
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| AdscError::timeout(wait_operation(want), timeout.as_millis() as u64))?
    }

    fn take_close(&self, want: Option<Event>) -> Result<Event> {
        let wants_close = matches!(want, None | Some(Event::Close));
        if wants_close && !self.close_delivered.swap(true, Ordering::AcqRel) {
            Ok(Event::Close)
        } else {
            Err(AdscError::Closed)
        }
    }

    /// Discard everything buffered; returns how many events were dropped
    pub async fn wait_clear(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

fn wait_operation(want: Option<Event>) -> String {
    match want {
        Some(event) => format!("wait for {}", event),
        None => "wait for any event".to_string(),
    }
}

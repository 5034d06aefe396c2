/// Stream production
///
/// One `StreamProducer` runs per open stream connection. It drains the
/// session's response queue with a bounded wait, turns each entry into a frame,
/// and emits keepalive comments while the queue is idle. It ends when the
/// session closes, the queue fails for good, the server shuts down, or the
/// connection goes away (the producer is dropped); in every case the session is
/// closed and its queue storage released.

pub mod frame;

pub use frame::{Frame, ENDPOINT_EVENT, MESSAGE_EVENT};

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures::Stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::SessionId;
use crate::queue::ResponseQueue;
use crate::session::{SessionError, SessionManager};

/// Tunables of the producer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Longest single wait on the queue; bounds how stale a keepalive decision can be
    pub poll_interval: Duration,
    /// Idle time after which a keepalive frame is written; `None` disables them
    pub keepalive_interval: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            keepalive_interval: Some(Duration::from_secs(15)),
        }
    }
}

/// Per-session loop draining the response queue into frames
pub struct StreamProducer {
    session_id: SessionId,
    sessions: Arc<SessionManager>,
    queue: Arc<dyn ResponseQueue>,
    settings: StreamSettings,
    shutdown: CancellationToken,
    endpoint: Option<String>,
    last_write: Instant,
    last_refresh: Instant,
    finished: bool,
}

impl StreamProducer {
    /// Start streaming an open session
    ///
    /// `endpoint_url` is sent as the first frame. Fails if the session is not
    /// in the Open state (already streaming or closed).
    pub fn new(
        session_id: SessionId,
        endpoint_url: String,
        sessions: Arc<SessionManager>,
        queue: Arc<dyn ResponseQueue>,
        settings: StreamSettings,
        shutdown: CancellationToken,
    ) -> Result<Self, SessionError> {
        sessions.begin_streaming(&session_id)?;
        let now = Instant::now();

        Ok(Self {
            session_id,
            sessions,
            queue,
            settings,
            shutdown,
            endpoint: Some(endpoint_url),
            last_write: now,
            last_refresh: now,
            finished: false,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Produce the next frame, or `None` once the stream is over
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if let Some(endpoint) = self.endpoint.take() {
            self.last_write = Instant::now();
            return Some(Frame::Endpoint(endpoint));
        }

        loop {
            if self.finished {
                return None;
            }

            if self.shutdown.is_cancelled() {
                tracing::info!("Server shutting down, ending stream for session {}", self.session_id);
                self.finish().await;
                return None;
            }

            if !self.sessions.is_open(&self.session_id).await {
                tracing::info!("Session {} is closed, ending stream", self.session_id);
                self.finish().await;
                return None;
            }

            self.refresh_if_due().await;

            let popped = tokio::select! {
                _ = self.shutdown.cancelled() => continue,
                popped = self.queue.pop(&self.session_id, self.settings.poll_interval) => popped,
            };

            match popped {
                Ok(Some(message)) => {
                    tracing::debug!("Streaming response {} to session {}", message.id, self.session_id);
                    self.last_write = Instant::now();
                    return Some(Frame::Message(message));
                }
                Ok(None) => {
                    if let Some(interval) = self.settings.keepalive_interval {
                        if self.last_write.elapsed() >= interval {
                            self.last_write = Instant::now();
                            return Some(Frame::KeepAlive);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Queue pop failed for session {}, ending stream: {}", self.session_id, e);
                    self.finish().await;
                    return None;
                }
            }
        }
    }

    /// Keep the shared open marker alive while streaming
    ///
    /// Refreshing every quarter TTL leaves room for a few missed refreshes.
    async fn refresh_if_due(&mut self) {
        let due = self.sessions.ttl() / 4;
        if self.last_refresh.elapsed() < due {
            return;
        }
        match self.sessions.refresh(&self.session_id).await {
            Ok(()) => self.last_refresh = Instant::now(),
            Err(e) => tracing::warn!("Could not refresh session {}: {}", self.session_id, e),
        }
    }

    /// Close the session and release its storage; runs at most once
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.sessions.close_session(&self.session_id).await {
            tracing::error!("Failed to tear down session {}: {}", self.session_id, e);
        }
    }

    /// Adapt into the event stream axum's `Sse` response expects
    pub fn into_event_stream(self) -> impl Stream<Item = Result<Event, Infallible>> + Send {
        let mut producer = self;
        async_stream::stream! {
            while let Some(frame) = producer.next_frame().await {
                match frame.to_event() {
                    Ok(event) => yield Ok(event),
                    Err(e) => tracing::error!("Failed to encode frame for session {}: {}", producer.session_id, e),
                }
            }
        }
    }
}

impl Drop for StreamProducer {
    /// The connection went away mid-stream: tear the session down in the background
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let session_id = self.session_id.clone();
        let sessions = self.sessions.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::info!("Stream for session {} disconnected", session_id);
                handle.spawn(async move {
                    if let Err(e) = sessions.close_session(&session_id).await {
                        tracing::error!("Failed to tear down session {}: {}", session_id, e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("No runtime to tear down session {}; its marker will expire", session_id);
            }
        }
    }
}

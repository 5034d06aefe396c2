/// Event frames written to the stream
///
/// Frames are Server-Sent Events: blank-line terminated, so a client can parse
/// one event at a time off a continuous byte stream.

use axum::response::sse::Event;

use crate::domain::OutboundMessage;

/// SSE event name of the first frame, carrying the message-posting URL
pub const ENDPOINT_EVENT: &str = "endpoint";

/// SSE event name of every response frame
pub const MESSAGE_EVENT: &str = "message";

/// One unit of stream output
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Tells the client where to post requests for this session
    Endpoint(String),
    /// One queued response
    Message(OutboundMessage),
    /// No-op comment keeping intermediaries from closing an idle connection
    KeepAlive,
}

impl Frame {
    /// Encode as an SSE event
    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        let event = match self {
            Frame::Endpoint(url) => Event::default().event(ENDPOINT_EVENT).data(url),
            Frame::Message(message) => Event::default()
                .event(MESSAGE_EVENT)
                .data(serde_json::to_string(message)?),
            Frame::KeepAlive => Event::default().comment("keep-alive"),
        };
        Ok(event)
    }
}

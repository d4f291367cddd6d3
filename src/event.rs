use crate::reconnect::ReconnectEvent;
use crate::state::ConnectionState;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Heartbeat-side notifications, per §4.5: a consecutive-timeout escalation,
/// recovery from one, or a fresh RTT sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeartbeatEvent {
    Timeout,
    Restored,
    RttUpdated(Duration),
}

/// Everything a caller can subscribe to: connection lifecycle, heartbeat
/// health, and reconnect progress, unified into one stream so a consumer
/// doesn't have to juggle three channels if it only cares about logging them.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    State(ConnectionState),
    Heartbeat(HeartbeatEvent),
    Reconnect(ReconnectEvent),
}

/// A `futures::Stream` over a client's event channel, mirroring the teacher's
/// `event.rs::EventStream` — an mpsc receiver wrapped so end-users don't have
/// to depend on tokio's channel types directly. Built on
/// `tokio_stream::wrappers::UnboundedReceiverStream` rather than a hand-rolled
/// `poll_next`, the way the teacher's `split.rs::WSReader` wraps
/// `ReceiverStream` instead of polling the channel itself.
pub struct EventStream {
    inner: UnboundedReceiverStream<ClientEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<ClientEvent>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(receiver),
        }
    }
}

impl Stream for EventStream {
    type Item = ClientEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::Response;

/// Things the dispatcher reports outside of request/response pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// A link was opened. Request ids restart from zero.
    Connected,
    /// The link dropped. Queued and in-flight requests were discarded.
    Disconnected,
    /// Reply to the `get_info` sent on connect.
    Info(Response),
    /// Reply to an opportunistic idle-time `get_status`.
    Status(Response),
    /// Inbound object that matched no in-flight request.
    Unsolicited(Value),
}

/// Receiving side of the dispatcher event channel.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<DispatchEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<DispatchEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<DispatchEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already waiting.
    pub fn try_recv(&mut self) -> Option<DispatchEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = DispatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

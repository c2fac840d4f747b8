//! Channel-backed [`ClientPipe`].
//!
//! The dispatcher must never block on a slow local client, so its pipe calls
//! just push [`PipeEvent`]s onto an unbounded channel.  The hyper service
//! handling the local connection owns the receiver and turns the events into
//! a response head, a streaming body, or writes on an upgraded socket.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::application::{ClientPipe, PipeClosed};
use crate::domain::ResponseHead;

/// One pipe call, as seen by the local connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeEvent {
    Head(ResponseHead),
    Data(Bytes),
    End,
    Fail,
}

/// Sending half handed to the dispatcher.
#[derive(Debug)]
pub struct ChannelPipe {
    events: mpsc::UnboundedSender<PipeEvent>,
}

impl ChannelPipe {
    /// Creates a pipe and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl ClientPipe for ChannelPipe {
    fn write_head(&mut self, head: ResponseHead) -> Result<(), PipeClosed> {
        self.events.send(PipeEvent::Head(head)).map_err(|_| PipeClosed)
    }

    fn write(&mut self, data: Bytes) -> Result<(), PipeClosed> {
        self.events.send(PipeEvent::Data(data)).map_err(|_| PipeClosed)
    }

    fn end(&mut self) {
        let _ = self.events.send(PipeEvent::End);
    }

    fn fail(&mut self) {
        let _ = self.events.send(PipeEvent::Fail);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

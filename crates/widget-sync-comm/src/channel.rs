//! Channel abstraction for the comm layer.
//!
//! A channel connects one model to its remote peer. Implementations may sit
//! on a kernel websocket, a postMessage bridge, or anything else that keeps
//! messages in order.

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{ChannelEvent, CommMessage};
use crate::types::ModelId;

/// Ordered, bidirectional message pipe between a model and its peer.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Channel: Send + Sync {
    /// The comm id, which is also the model id.
    fn comm_id(&self) -> &ModelId;

    /// Send a message to the peer.
    ///
    /// Success means the message was enqueued locally, nothing more.
    async fn send(&self, message: CommMessage) -> Result<()>;

    /// Receive the next event from the peer.
    ///
    /// Returns `None` once the channel is exhausted.
    async fn recv(&self) -> Option<ChannelEvent>;

    /// Ask the peer to close the channel.
    async fn close(&self) -> Result<()>;

    /// Whether the channel still accepts sends.
    fn is_open(&self) -> bool;
}

/// An in-memory channel pair for testing.
///
/// One side is a [`Channel`] handed to the model, the other a [`RemoteEnd`]
/// that plays the kernel: it observes what the model sends and injects
/// updates, status changes and close notifications.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;
    use serde_json::{Map, Value as JsonValue};
    use tokio::sync::{mpsc, Mutex};

    use crate::error::CommError;
    use crate::messages::{ExecutionState, InboundData, StatusMessage};

    /// What the remote end sees coming from the front end.
    #[derive(Debug, Clone, PartialEq)]
    pub enum PeerFrame {
        /// A message sent by the model.
        Message(CommMessage),
        /// The model closed the channel.
        Closed,
    }

    /// Create a connected channel pair for `id`.
    pub fn pair(id: ModelId) -> (MemoryChannel, RemoteEnd) {
        let (to_peer, from_front) = mpsc::unbounded_channel();
        let (to_front, from_peer) = mpsc::unbounded_channel();

        let channel = MemoryChannel {
            id: id.clone(),
            outgoing: to_peer,
            incoming: Mutex::new(from_peer),
            open: AtomicBool::new(true),
        };
        let remote = RemoteEnd {
            id,
            outgoing: to_front,
            incoming: Mutex::new(from_front),
        };
        (channel, remote)
    }

    /// Front-end side of an in-memory pair.
    pub struct MemoryChannel {
        id: ModelId,
        outgoing: mpsc::UnboundedSender<PeerFrame>,
        incoming: Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
        open: AtomicBool,
    }

    #[async_trait]
    impl Channel for MemoryChannel {
        fn comm_id(&self) -> &ModelId {
            &self.id
        }

        async fn send(&self, message: CommMessage) -> Result<()> {
            if !self.is_open() {
                return Err(CommError::Closed(self.id.clone()));
            }
            self.outgoing
                .send(PeerFrame::Message(message))
                .map_err(|_| CommError::Disconnected(self.id.clone()))
        }

        async fn recv(&self) -> Option<ChannelEvent> {
            let mut rx = self.incoming.lock().await;
            rx.recv().await
        }

        async fn close(&self) -> Result<()> {
            if self.open.swap(false, Ordering::SeqCst) {
                // The peer may already be gone; closing is still complete locally.
                if self.outgoing.send(PeerFrame::Closed).is_err() {
                    tracing::debug!(comm_id = %self.id, "peer gone before close frame");
                }
            }
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    /// Kernel side of an in-memory pair.
    pub struct RemoteEnd {
        id: ModelId,
        outgoing: mpsc::UnboundedSender<ChannelEvent>,
        incoming: Mutex<mpsc::UnboundedReceiver<PeerFrame>>,
    }

    impl RemoteEnd {
        /// The comm id this end is attached to.
        pub fn comm_id(&self) -> &ModelId {
            &self.id
        }

        /// Deliver a raw event to the front end.
        pub fn deliver(&self, event: ChannelEvent) -> Result<()> {
            self.outgoing
                .send(event)
                .map_err(|_| CommError::Disconnected(self.id.clone()))
        }

        /// Send an `update` message.
        pub fn send_update(
            &self,
            state: Map<String, JsonValue>,
            buffer_keys: Vec<String>,
            buffers: Vec<Bytes>,
        ) -> Result<()> {
            let msg = CommMessage::inbound(&InboundData::Update { state, buffer_keys }, buffers)?;
            self.deliver(ChannelEvent::Message(msg))
        }

        /// Send a `custom` message.
        pub fn send_custom(&self, content: JsonValue, buffers: Vec<Bytes>) -> Result<()> {
            let msg = CommMessage::inbound(&InboundData::Custom { content }, buffers)?;
            self.deliver(ChannelEvent::Message(msg))
        }

        /// Send a `display` message.
        pub fn send_display(&self, payload: Map<String, JsonValue>) -> Result<()> {
            let msg = CommMessage::inbound(&InboundData::Display { payload }, vec![])?;
            self.deliver(ChannelEvent::Message(msg))
        }

        /// Report an execution state change.
        pub fn send_status(&self, state: ExecutionState) -> Result<()> {
            self.deliver(StatusMessage { state }.into())
        }

        /// Report a status message given in its wire shape.
        pub fn send_status_json(&self, status: JsonValue) -> Result<()> {
            let status: StatusMessage = serde_json::from_value(status)?;
            self.deliver(status.into())
        }

        /// Close the channel from the kernel side.
        pub fn close(&self) -> Result<()> {
            self.deliver(ChannelEvent::Closed)
        }

        /// Wait for the next frame from the front end.
        pub async fn recv(&self) -> Option<PeerFrame> {
            let mut rx = self.incoming.lock().await;
            rx.recv().await
        }

        /// Take the next frame if one is already queued.
        pub fn try_recv(&self) -> Option<PeerFrame> {
            let mut rx = self.incoming.try_lock().ok()?;
            rx.try_recv().ok()
        }

        /// Drain every frame queued so far.
        pub fn drain(&self) -> Vec<PeerFrame> {
            let mut frames = Vec::new();
            while let Some(frame) = self.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }
}

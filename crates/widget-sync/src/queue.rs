//! Per-model task queue.
//!
//! Every unit of work that must observe the model in order goes through one
//! FIFO with a single consumer: outgoing sends, incoming updates and display
//! requests. A unit runs only after every unit queued before it has finished,
//! and a failing unit is reported without stopping the queue.

use std::sync::Weak;

use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::{mpsc, oneshot};
use widget_sync_comm::SyncMode;

use crate::model::{ModelInner, SyncedModel};
use crate::value::State;

/// One unit of queued work.
pub(crate) enum Task {
    /// Encode and send a sync message.
    Sync { mode: SyncMode, attrs: State },
    /// Send a custom message.
    Custom {
        content: JsonValue,
        buffers: Vec<Bytes>,
    },
    /// Decode and apply an `update` from the peer.
    Update {
        state: Map<String, JsonValue>,
        buffer_keys: Vec<String>,
        buffers: Vec<Bytes>,
    },
    /// Hand a `display` request to the manager.
    Display { payload: Map<String, JsonValue> },
    /// Resolves once everything queued before it is done.
    Barrier(oneshot::Sender<()>),
}

/// Sending half of a model's queue.
pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// Create a queue; the receiver goes to [`spawn_worker`].
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a unit. Returns false if the worker is gone.
    pub(crate) fn push(&self, task: Task) -> bool {
        self.tx.send(task).is_ok()
    }
}

/// Start the single consumer for a model's queue.
///
/// The worker holds only a weak handle and exits once the model is dropped.
pub(crate) fn spawn_worker(mut rx: mpsc::UnboundedReceiver<Task>, model: Weak<ModelInner>) {
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            let Some(inner) = model.upgrade() else {
                break;
            };
            SyncedModel::from_inner(inner).run_task(task).await;
        }
    });
}

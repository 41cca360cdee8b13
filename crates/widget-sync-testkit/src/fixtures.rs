//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use serde_json::{Map, Value as JsonValue};
use widget_sync::{
    InMemoryManager, ModelClass, ModelId, State, SyncConfig, SyncedModel, View,
};
use widget_sync_comm::{pair, OutboundData, PeerFrame, RemoteEnd, SyncMode};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A manager plus helpers for building models wired to a remote end.
pub struct TestBench {
    pub manager: Arc<InMemoryManager>,
    removed: Arc<Mutex<Vec<ModelId>>>,
}

impl TestBench {
    /// Create a bench with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Create a bench with a custom configuration.
    ///
    /// Views are [`RecordingView`]s unless a test installs its own factory.
    pub fn with_config(config: SyncConfig) -> Self {
        init_tracing();
        let manager = InMemoryManager::new(config);
        let removed = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&removed);
        manager.set_view_factory(move |model| {
            let view: Arc<dyn View> = Arc::new(RecordingView {
                model_id: model.id().clone(),
                removed: Arc::clone(&log),
            });
            async move { Ok(view) }.boxed()
        });

        Self { manager, removed }
    }

    /// Create a model with a channel; the other end is returned for driving it.
    pub fn live_model(
        &self,
        class: &'static ModelClass,
        id: &str,
        initial: State,
    ) -> (SyncedModel, RemoteEnd) {
        let (channel, remote) = pair(ModelId::new(id));
        let model = self
            .manager
            .create_model(class, ModelId::new(id), Some(Arc::new(channel)), initial);
        (model, remote)
    }

    /// Create a model with no channel.
    pub fn local_model(&self, class: &'static ModelClass, id: &str, initial: State) -> SyncedModel {
        self.manager
            .create_model(class, ModelId::new(id), None, initial)
    }

    /// Ids of every recorded view removed so far, in removal order.
    pub fn removed_views(&self) -> Vec<ModelId> {
        self.removed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for TestBench {
    fn default() -> Self {
        Self::new()
    }
}

/// View that records its removal.
pub struct RecordingView {
    pub model_id: ModelId,
    removed: Arc<Mutex<Vec<ModelId>>>,
}

impl View for RecordingView {
    fn remove(&self) {
        self.removed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.model_id.clone());
    }
}

/// A sync message observed at the remote end.
#[derive(Debug, Clone, PartialEq)]
pub struct SentSync {
    pub mode: SyncMode,
    pub data: Map<String, JsonValue>,
    pub buffer_keys: Vec<String>,
    pub buffers: Vec<Bytes>,
}

/// Drain the remote end and keep the sync messages, in send order.
pub fn sent_syncs(remote: &RemoteEnd) -> Vec<SentSync> {
    remote
        .drain()
        .into_iter()
        .filter_map(|frame| match frame {
            PeerFrame::Message(msg) => match msg.parse_outbound() {
                Ok(OutboundData::Sync {
                    mode,
                    data,
                    buffer_keys,
                }) => Some(SentSync {
                    mode,
                    data,
                    buffer_keys,
                    buffers: msg.buffers,
                }),
                _ => None,
            },
            PeerFrame::Closed => None,
        })
        .collect()
}

/// Poll `condition` until it holds, letting spawned tasks run in between.
///
/// Panics after one second.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within one second");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Build a state from name/value pairs.
pub fn state_of<V>(pairs: impl IntoIterator<Item = (&'static str, V)>) -> State
where
    V: Into<widget_sync::Value>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.into()))
        .collect()
}

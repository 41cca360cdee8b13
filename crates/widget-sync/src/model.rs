//! Synced models.
//!
//! A [`SyncedModel`] is the front-end half of one remote-backed entity. It
//! owns the attribute state, the running diff of local changes, the throttle
//! accounting for outgoing messages and the echo lock that keeps values just
//! received from the peer from being sent straight back.
//!
//! ## Outgoing
//!
//! ```text
//! set() ──► buffered diff ──► flush ──► echo filter ──► throttle gate
//!                                                         │        │
//!                                              pending < limit   pending >= limit
//!                                                         │        │
//!                                                    task queue   message buffer
//!                                                         │        ▲ released on idle
//!                                                   encode + send ─┘
//! ```
//!
//! ## Incoming
//!
//! `update` and `display` go through the same task queue so they apply in
//! receipt order. `custom` is re-emitted right away.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use widget_sync_comm::{
    Channel, ChannelEvent, CommMessage, ExecutionState, InboundData, ModelId, OutboundData,
    SyncMode,
};

use crate::class::ModelClass;
use crate::codec::{decode_state, encode_state, reassemble_state};
use crate::config::SyncConfig;
use crate::error::{Result, WidgetError};
use crate::events::{Change, ChangeOrigin, Listener, ModelEvent, SubscriptionId, Subscribers};
use crate::manager::WidgetManager;
use crate::queue::{spawn_worker, Task, TaskQueue};
use crate::value::{State, Value};
use crate::view::ViewFuture;

/// What a flush did with its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queued for sending.
    Sent,
    /// Held in the message buffer until the peer goes idle.
    Buffered,
    /// Nothing left to send after echo suppression.
    Empty,
}

/// The single outgoing message held back by the throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    pub mode: SyncMode,
    pub attrs: State,
}

/// Front-end model kept in sync with a remote peer.
///
/// Cheap to clone; clones share the same model. Equality of two handles is
/// identity, see [`SyncedModel::ptr_eq`].
#[derive(Clone)]
pub struct SyncedModel {
    inner: Arc<ModelInner>,
}

pub(crate) struct ModelInner {
    id: ModelId,
    class: &'static ModelClass,
    config: SyncConfig,
    manager: Weak<dyn WidgetManager>,
    state: Mutex<ModelState>,
    subscribers: Mutex<Subscribers>,
    queue: TaskQueue,
    pump: Mutex<Option<JoinHandle<()>>>,
}

struct ModelState {
    attributes: State,
    buffered_diff: State,
    pending: u32,
    msg_buffer: Option<BufferedMessage>,
    echo_lock: Option<State>,
    channel: Option<Arc<dyn Channel>>,
    live: bool,
    closed: bool,
    views: Vec<ViewFuture>,
}

impl SyncedModel {
    /// Create a model and start its task queue.
    ///
    /// Attributes start as the class defaults overlaid with `initial`; none
    /// of them count as local changes. If a channel is given, its events are
    /// routed into the model until it closes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        id: ModelId,
        class: &'static ModelClass,
        config: SyncConfig,
        manager: Weak<dyn WidgetManager>,
        channel: Option<Arc<dyn Channel>>,
        initial: State,
    ) -> Self {
        let mut attributes = class.defaults();
        attributes.extend(initial);

        let (queue, rx) = TaskQueue::new();
        let live = channel.is_some();
        let inner = Arc::new(ModelInner {
            id,
            class,
            config,
            manager,
            state: Mutex::new(ModelState {
                attributes,
                buffered_diff: State::new(),
                pending: 0,
                msg_buffer: None,
                echo_lock: None,
                channel: channel.clone(),
                live,
                closed: false,
                views: Vec::new(),
            }),
            subscribers: Mutex::new(Subscribers::default()),
            queue,
            pump: Mutex::new(None),
        });

        spawn_worker(rx, Arc::downgrade(&inner));
        if let Some(channel) = channel {
            let pump = tokio::spawn(pump_channel(channel, Arc::downgrade(&inner)));
            *lock(&inner.pump) = Some(pump);
        }

        tracing::debug!(model_id = %inner.id, class = inner.class.name, live, "model created");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ModelInner>) -> Self {
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, ModelState> {
        lock(&self.inner.state)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &ModelId {
        &self.inner.id
    }

    pub fn class(&self) -> &'static ModelClass {
        self.inner.class
    }

    /// Whether two handles refer to the same model.
    pub fn ptr_eq(&self, other: &SyncedModel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The token this model serializes as inside other models' state.
    pub fn to_reference(&self) -> String {
        self.inner.id.to_reference()
    }

    /// Whether the model was created with a channel and is not closed.
    pub fn is_live(&self) -> bool {
        self.state().live
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// The bound channel, if any.
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.state().channel.clone()
    }

    fn manager(&self) -> Option<Arc<dyn WidgetManager>> {
        self.inner.manager.upgrade()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attribute access
    // ─────────────────────────────────────────────────────────────────────────

    /// Current value of an attribute.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.state().attributes.get(name).cloned()
    }

    /// Snapshot of every attribute.
    pub fn attributes(&self) -> State {
        self.state().attributes.clone()
    }

    /// Snapshot of the serializable state.
    ///
    /// With `drop_defaults`, attributes equal to their class default are left out.
    pub fn get_state(&self, drop_defaults: bool) -> State {
        let st = self.state();
        if drop_defaults {
            without_defaults(self.inner.class, &st.attributes)
        } else {
            st.attributes.clone()
        }
    }

    /// Set one attribute locally.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let mut values = State::new();
        values.insert(name.into(), value.into());
        self.set_many(values)
    }

    /// Set several attributes locally, as one change.
    ///
    /// Every value is validated first; if any is invalid nothing is applied.
    /// Attributes whose value actually changed are folded into the buffered
    /// diff, then listeners see one `Change` event.
    pub fn set_many(&self, values: State) -> Result<()> {
        for (name, value) in &values {
            self.inner.class.validate(name, value)?;
        }

        let change = {
            let mut st = self.state();
            let change = apply_values(&mut st.attributes, values, ChangeOrigin::Local);
            for (name, value) in &change.changed {
                st.buffered_diff.insert(name.clone(), value.clone());
            }
            change
        };

        if !change.is_empty() {
            self.emit(&ModelEvent::Change(change));
        }
        Ok(())
    }

    /// Local changes not yet pushed with [`save_changes`](Self::save_changes).
    pub fn buffered_diff(&self) -> State {
        self.state().buffered_diff.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing
    // ─────────────────────────────────────────────────────────────────────────

    /// Current throttle limit: the `msg_throttle` attribute if it is a
    /// positive integer, else the configured fallback.
    pub fn throttle_limit(&self) -> u32 {
        throttle_limit(&self.state(), &self.inner.config)
    }

    /// Sends queued or in flight that the peer has not acknowledged yet.
    pub fn pending(&self) -> u32 {
        self.state().pending
    }

    /// The message currently held back by the throttle.
    pub fn buffered_message(&self) -> Option<BufferedMessage> {
        self.state().msg_buffer.clone()
    }

    /// Sync the entire state.
    pub fn flush_full(&self) -> Result<FlushOutcome> {
        self.sync(SyncMode::Full, State::new())
    }

    /// Sync only `attrs`.
    pub fn flush_patch(&self, attrs: State) -> Result<FlushOutcome> {
        self.sync(SyncMode::Patch, attrs)
    }

    /// Push the buffered diff to the peer as a patch and start a new diff.
    ///
    /// Does nothing for a model without a live channel.
    pub fn save_changes(&self) -> Result<FlushOutcome> {
        let diff = {
            let mut st = self.state();
            if !st.live {
                return Ok(FlushOutcome::Empty);
            }
            std::mem::take(&mut st.buffered_diff)
        };
        self.flush_patch(diff)
    }

    fn sync(&self, mode: SyncMode, attrs: State) -> Result<FlushOutcome> {
        let mut st = self.state();
        if st.channel.is_none() {
            let err = WidgetError::NoChannel(self.inner.id.clone());
            tracing::warn!("Sync skipped: {}", err);
            return Err(err);
        }

        let mut attrs = match mode {
            SyncMode::Full if self.inner.config.drop_defaults_on_full => {
                without_defaults(self.inner.class, &st.attributes)
            }
            SyncMode::Full => st.attributes.clone(),
            SyncMode::Patch => attrs,
        };

        // Values currently being applied from the peer are not news to it.
        if let Some(echo) = &st.echo_lock {
            attrs.retain(|name, value| echo.get(name) != Some(&*value));
        }
        if attrs.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let limit = throttle_limit(&st, &self.inner.config);
        if st.pending >= limit {
            match (mode, st.msg_buffer.as_mut()) {
                (SyncMode::Patch, Some(buffer)) => buffer.attrs.extend(attrs),
                _ => st.msg_buffer = Some(BufferedMessage { mode, attrs }),
            }
            tracing::debug!(
                model_id = %self.inner.id,
                pending = st.pending,
                limit,
                "throttled, message buffered"
            );
            return Ok(FlushOutcome::Buffered);
        }

        st.pending += 1;
        self.inner.queue.push(Task::Sync { mode, attrs });
        Ok(FlushOutcome::Sent)
    }

    /// Send a custom message. Counts toward the throttle like a sync.
    pub fn send_custom(&self, content: JsonValue, buffers: Vec<Bytes>) -> Result<()> {
        let mut st = self.state();
        if st.channel.is_none() {
            let err = WidgetError::NoChannel(self.inner.id.clone());
            tracing::warn!("Custom message dropped: {}", err);
            return Err(err);
        }
        st.pending += 1;
        self.inner.queue.push(Task::Custom { content, buffers });
        Ok(())
    }

    /// The peer reported it is idle.
    ///
    /// If the throttle is exactly saturated and a message is buffered, the
    /// buffer goes out now and the pending count stays where it is (one
    /// acknowledged, one sent). Otherwise one pending message is acknowledged.
    pub fn on_remote_idle(&self) {
        let mut st = self.state();
        if st.channel.is_none() {
            return;
        }

        let limit = throttle_limit(&st, &self.inner.config);
        if st.msg_buffer.is_some() && st.pending == limit {
            if let Some(buffer) = st.msg_buffer.take() {
                self.inner.queue.push(Task::Sync {
                    mode: buffer.mode,
                    attrs: buffer.attrs,
                });
            }
        } else {
            st.pending = st.pending.saturating_sub(1);
        }
    }

    /// Handle a status notification. Only `idle` matters.
    pub fn handle_status(&self, state: ExecutionState) {
        if state == ExecutionState::Idle {
            self.on_remote_idle();
        }
    }

    fn release_pending(&self) {
        let mut st = self.state();
        st.pending = st.pending.saturating_sub(1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle a message from the peer.
    pub fn handle_comm_msg(&self, message: CommMessage) {
        match message.parse_inbound() {
            Ok(InboundData::Update { state, buffer_keys }) => {
                self.inner.queue.push(Task::Update {
                    state,
                    buffer_keys,
                    buffers: message.buffers,
                });
            }
            Ok(InboundData::Custom { content }) => {
                self.emit(&ModelEvent::Custom {
                    content,
                    buffers: message.buffers,
                });
            }
            Ok(InboundData::Display { payload }) => {
                self.inner.queue.push(Task::Display { payload });
            }
            Err(e) => {
                tracing::warn!("Couldn't process comm msg for model id '{}': {}", self.inner.id, e);
            }
        }
    }

    /// Apply state received from the peer.
    ///
    /// The echo lock holds `state` while attributes are applied and listeners
    /// run, and is cleared before this returns. Invalid attributes are
    /// reported and skipped; the rest still apply. Applied attributes are
    /// dropped from the buffered diff.
    pub fn apply_remote_state(&self, state: State) {
        let _echo = EchoLock::hold(&self.inner, state.clone());

        let mut accepted = State::new();
        for (name, value) in state {
            match self.inner.class.validate(&name, &value) {
                Ok(()) => {
                    accepted.insert(name, value);
                }
                Err(e) => {
                    tracing::warn!("Error setting state for model id '{}': {}", self.inner.id, e);
                }
            }
        }

        let change = {
            let mut st = self.state();
            // The peer's value wins over any local edit not yet saved.
            for name in accepted.keys() {
                st.buffered_diff.remove(name);
            }
            apply_values(&mut st.attributes, accepted, ChangeOrigin::Remote)
        };
        if !change.is_empty() {
            self.emit(&ModelEvent::Change(change));
        }
    }

    pub(crate) async fn run_task(&self, task: Task) {
        match task {
            Task::Sync { mode, attrs } => self.send_sync_message(mode, attrs).await,
            Task::Custom { content, buffers } => self.send_custom_message(content, buffers).await,
            Task::Update {
                state,
                buffer_keys,
                buffers,
            } => self.process_update(state, buffer_keys, buffers).await,
            Task::Display { payload } => self.process_display(payload).await,
            Task::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn send_sync_message(&self, mode: SyncMode, attrs: State) {
        let Some(channel) = self.channel() else {
            tracing::debug!(model_id = %self.inner.id, "model closed, sync dropped");
            return;
        };

        let result: Result<()> = async {
            let encoded = encode_state(self.inner.class, attrs, self).await?;
            let message = CommMessage::outbound(
                &OutboundData::Sync {
                    mode,
                    data: encoded.data,
                    buffer_keys: encoded.buffer_keys,
                },
                encoded.buffers,
            )?;
            channel.send(message).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.release_pending();
            tracing::warn!(
                "Couldn't send widget sync message for model id '{}': {}",
                self.inner.id,
                e
            );
        }
    }

    async fn send_custom_message(&self, content: JsonValue, buffers: Vec<Bytes>) {
        let Some(channel) = self.channel() else {
            tracing::debug!(model_id = %self.inner.id, "model closed, custom message dropped");
            return;
        };

        let result: Result<()> = async {
            let message = CommMessage::outbound(&OutboundData::Custom { content }, buffers)?;
            channel.send(message).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.release_pending();
            tracing::warn!(
                "Couldn't send custom message for model id '{}': {}",
                self.inner.id,
                e
            );
        }
    }

    async fn process_update(
        &self,
        data: Map<String, JsonValue>,
        buffer_keys: Vec<String>,
        buffers: Vec<Bytes>,
    ) {
        let state = reassemble_state(data, &buffer_keys, buffers);
        let manager = self.manager();
        let decoded = decode_state(self.inner.class, state, manager.as_deref()).await;
        for failure in &decoded.failures {
            tracing::warn!(
                "Couldn't process update msg for model id '{}': {}",
                self.inner.id,
                failure
            );
        }
        self.apply_remote_state(decoded.state);
    }

    async fn process_display(&self, payload: Map<String, JsonValue>) {
        let Some(manager) = self.manager() else {
            tracing::warn!(
                "Could not process display view msg for model id '{}': no manager",
                self.inner.id
            );
            return;
        };
        if let Err(e) = manager.display_model(&payload, self).await {
            tracing::warn!(
                "Could not process display view msg for model id '{}': {}",
                self.inner.id,
                e
            );
        }
    }

    /// Wait until every unit queued so far has been processed.
    pub async fn settled(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.queue.push(Task::Barrier(done)) {
            let _ = wait.await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a listener for every event of this model.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncedModel, &ModelEvent) + Send + Sync + 'static,
    {
        lock(&self.inner.subscribers).add(Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.subscribers).remove(id)
    }

    /// Call `callback` once per change that touches any of `keys`, however
    /// many of them changed together.
    pub fn on_some_change<F>(&self, keys: &[&str], callback: F) -> SubscriptionId
    where
        F: Fn(&SyncedModel, &Change) + Send + Sync + 'static,
    {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.subscribe(move |model, event| {
            if let ModelEvent::Change(change) = event {
                if keys.iter().any(|k| change.has_changed(k)) {
                    callback(model, change);
                }
            }
        })
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    fn emit(&self, event: &ModelEvent) {
        let listeners: Vec<Listener> = lock(&self.inner.subscribers).snapshot();
        for listener in listeners {
            listener(self, event);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Views and lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Bind a view so it is torn down when the model closes.
    pub fn bind_view(&self, view: ViewFuture) {
        let mut st = self.state();
        if st.closed {
            drop(st);
            schedule_view_removal(vec![view]);
            return;
        }
        st.views.push(view);
    }

    /// Number of views bound to the model.
    pub fn view_count(&self) -> usize {
        self.state().views.len()
    }

    /// Close the model. Idempotent.
    ///
    /// A local close asks the peer to close the channel. Either way listeners
    /// get `Destroy` and are dropped, the channel is released, the id is
    /// unregistered and every bound view is removed once it resolves.
    /// Queued work still runs, but its sends become no-ops.
    pub async fn close(&self, remote_initiated: bool) {
        let (channel, views) = {
            let mut st = self.state();
            if st.closed {
                tracing::debug!(model_id = %self.inner.id, "model already closed");
                return;
            }
            st.closed = true;
            st.live = false;
            st.msg_buffer = None;
            (st.channel.take(), std::mem::take(&mut st.views))
        };

        if !remote_initiated {
            if let Some(pump) = lock(&self.inner.pump).take() {
                pump.abort();
            }
            if let Some(channel) = &channel {
                if let Err(e) = channel.close().await {
                    tracing::warn!("Couldn't close comm for model id '{}': {}", self.inner.id, e);
                }
            }
        }

        self.emit(&ModelEvent::Destroy);
        lock(&self.inner.subscribers).clear();
        drop(channel);

        if let Some(manager) = self.manager() {
            manager.unregister_model(self);
        }
        schedule_view_removal(views);

        tracing::debug!(model_id = %self.inner.id, remote_initiated, "model closed");
    }

    async fn handle_comm_closed(&self) {
        self.emit(&ModelEvent::CommClosed);
        self.close(true).await;
    }
}

impl fmt::Debug for SyncedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedModel")
            .field("id", &self.inner.id)
            .field("class", &self.inner.class.name)
            .finish()
    }
}

/// Holds the echo lock for the duration of one remote apply.
///
/// Dropping clears it, so the lock never outlives the apply even if a
/// listener panics.
struct EchoLock<'a> {
    inner: &'a ModelInner,
}

impl<'a> EchoLock<'a> {
    fn hold(inner: &'a ModelInner, state: State) -> Self {
        lock(&inner.state).echo_lock = Some(state);
        Self { inner }
    }
}

impl Drop for EchoLock<'_> {
    fn drop(&mut self) {
        lock(&self.inner.state).echo_lock = None;
    }
}

/// Route channel events into the model until the channel closes.
async fn pump_channel(channel: Arc<dyn Channel>, model: Weak<ModelInner>) {
    while let Some(event) = channel.recv().await {
        let Some(inner) = model.upgrade() else {
            break;
        };
        let model = SyncedModel::from_inner(inner);
        match event {
            ChannelEvent::Message(message) => model.handle_comm_msg(message),
            ChannelEvent::Status(state) => model.handle_status(state),
            ChannelEvent::Closed => {
                model.handle_comm_closed().await;
                break;
            }
        }
    }
}

fn schedule_view_removal(views: Vec<ViewFuture>) {
    for view in views {
        tokio::spawn(async move {
            if let Some(view) = view.await {
                view.remove();
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn throttle_limit(st: &ModelState, config: &SyncConfig) -> u32 {
    match st.attributes.get("msg_throttle").and_then(Value::as_i64) {
        Some(limit) if limit >= 1 => u32::try_from(limit).unwrap_or(u32::MAX),
        _ => config.fallback_throttle.max(1),
    }
}

fn without_defaults(class: &ModelClass, attributes: &State) -> State {
    let defaults = class.defaults();
    attributes
        .iter()
        .filter(|(name, value)| defaults.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Write `values` into `attributes`, returning only what actually changed.
fn apply_values(attributes: &mut State, values: State, origin: ChangeOrigin) -> Change {
    let mut change = Change::new(origin);
    for (name, value) in values {
        if attributes.get(&name) == Some(&value) {
            continue;
        }
        let previous = attributes.insert(name.clone(), value.clone());
        change.previous.insert(name.clone(), previous);
        change.changed.insert(name, value);
    }
    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{DOM_WIDGET_MODEL, WIDGET_MODEL};
    use crate::manager::memory::InMemoryManager;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use widget_sync_comm::{pair, PeerFrame, RemoteEnd};

    fn state(pairs: &[(&str, Value)]) -> State {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn live_model(
        class: &'static ModelClass,
        initial: State,
    ) -> (Arc<InMemoryManager>, SyncedModel, RemoteEnd) {
        let manager = InMemoryManager::new(SyncConfig::default());
        let (channel, remote) = pair(ModelId::new("m1"));
        let channel: Arc<dyn Channel> = Arc::new(channel);
        let model = manager.create_model(class, ModelId::new("m1"), Some(channel), initial);
        (manager, model, remote)
    }

    fn sent_sync(frame: PeerFrame) -> (SyncMode, Map<String, JsonValue>) {
        match frame {
            PeerFrame::Message(msg) => match msg.parse_outbound().unwrap() {
                OutboundData::Sync { mode, data, .. } => (mode, data),
                other => panic!("expected sync, got {:?}", other),
            },
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_state_overlays_defaults() {
        let (_manager, model, _remote) =
            live_model(&WIDGET_MODEL, state(&[("value", Value::Int(4))]));
        assert_eq!(model.get("value"), Some(Value::Int(4)));
        assert_eq!(model.get("msg_throttle"), Some(Value::Int(3)));
        assert!(model.buffered_diff().is_empty());
        assert_eq!(
            model.get_state(true),
            state(&[("value", Value::Int(4))])
        );
    }

    #[tokio::test]
    async fn test_buffered_diff_is_union_of_sets() {
        let (_manager, model, _remote) = live_model(&WIDGET_MODEL, State::new());

        model.set("a", 1).unwrap();
        model
            .set_many(state(&[("b", Value::Int(2)), ("a", Value::Int(3))]))
            .unwrap();
        model.set("c", "x").unwrap();

        assert_eq!(
            model.buffered_diff(),
            state(&[
                ("a", Value::Int(3)),
                ("b", Value::Int(2)),
                ("c", Value::from("x")),
            ])
        );
    }

    #[tokio::test]
    async fn test_invalid_local_set_applies_nothing() {
        let (_manager, model, _remote) = live_model(&DOM_WIDGET_MODEL, State::new());

        let result = model.set_many(state(&[
            ("value", Value::Int(1)),
            ("visible", Value::from("yes")),
        ]));
        assert!(matches!(result, Err(WidgetError::Invalid { .. })));
        assert_eq!(model.get("value"), None);
        assert!(model.buffered_diff().is_empty());
    }

    #[tokio::test]
    async fn test_save_changes_sends_patch_and_resets_diff() {
        let (_manager, model, remote) = live_model(&WIDGET_MODEL, State::new());

        model.set("a", 1).unwrap();
        model.set("b", 2).unwrap();
        assert_eq!(model.save_changes().unwrap(), FlushOutcome::Sent);
        assert!(model.buffered_diff().is_empty());
        model.settled().await;

        let (mode, data) = sent_sync(remote.try_recv().unwrap());
        assert_eq!(mode, SyncMode::Patch);
        assert_eq!(data, json!({"a": 1, "b": 2}).as_object().unwrap().clone());
        assert_eq!(model.pending(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_channel_is_reported() {
        let manager = InMemoryManager::new(SyncConfig::default());
        let model = manager.create_model(&WIDGET_MODEL, ModelId::new("m"), None, State::new());

        model.set("a", 1).unwrap();
        assert!(matches!(model.flush_full(), Err(WidgetError::NoChannel(_))));
        assert_eq!(model.save_changes().unwrap(), FlushOutcome::Empty);
        assert_eq!(model.get("a"), Some(Value::Int(1)));
        assert_eq!(model.pending(), 0);
    }

    #[tokio::test]
    async fn test_patch_buffers_merge_and_full_replaces() {
        let (_manager, model, _remote) =
            live_model(&WIDGET_MODEL, state(&[("msg_throttle", Value::Int(1))]));

        assert_eq!(
            model.flush_patch(state(&[("a", Value::Int(1))])).unwrap(),
            FlushOutcome::Sent
        );
        assert_eq!(
            model
                .flush_patch(state(&[("a", Value::Int(2)), ("b", Value::Int(1))]))
                .unwrap(),
            FlushOutcome::Buffered
        );
        model
            .flush_patch(state(&[("b", Value::Int(5)), ("c", Value::Int(9))]))
            .unwrap();

        let buffered = model.buffered_message().unwrap();
        assert_eq!(buffered.mode, SyncMode::Patch);
        assert_eq!(
            buffered.attrs,
            state(&[("a", Value::Int(2)), ("b", Value::Int(5)), ("c", Value::Int(9))])
        );

        assert_eq!(model.flush_full().unwrap(), FlushOutcome::Buffered);
        let buffered = model.buffered_message().unwrap();
        assert_eq!(buffered.mode, SyncMode::Full);
        assert_eq!(buffered.attrs, model.attributes());
        assert_eq!(model.pending(), 1);
    }

    #[tokio::test]
    async fn test_idle_releases_buffer_only_when_saturated() {
        let (_manager, model, remote) =
            live_model(&WIDGET_MODEL, state(&[("msg_throttle", Value::Int(1))]));

        model.flush_patch(state(&[("a", Value::Int(1))])).unwrap();
        model.flush_patch(state(&[("a", Value::Int(2))])).unwrap();
        model.settled().await;
        assert_eq!(remote.drain().len(), 1);

        model.on_remote_idle();
        model.settled().await;
        assert!(model.buffered_message().is_none());
        assert_eq!(model.pending(), 1);
        let (_, data) = sent_sync(remote.try_recv().unwrap());
        assert_eq!(data, json!({"a": 2}).as_object().unwrap().clone());

        model.on_remote_idle();
        assert_eq!(model.pending(), 0);
        model.on_remote_idle();
        assert_eq!(model.pending(), 0);
    }

    #[tokio::test]
    async fn test_custom_messages_count_toward_pending() {
        let (_manager, model, remote) = live_model(&WIDGET_MODEL, State::new());

        model
            .send_custom(json!({"event": "click"}), vec![Bytes::from_static(b"b")])
            .unwrap();
        assert_eq!(model.pending(), 1);
        model.settled().await;

        match remote.try_recv() {
            Some(PeerFrame::Message(msg)) => {
                assert_eq!(msg.data, json!({"method": "custom", "content": {"event": "click"}}));
                assert_eq!(msg.buffers, vec![Bytes::from_static(b"b")]);
            }
            other => panic!("expected custom message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_echo_suppressed_during_remote_apply() {
        let (_manager, model, remote) =
            live_model(&WIDGET_MODEL, state(&[("b", Value::Int(7))]));

        model.subscribe(|model, event| {
            if let ModelEvent::Change(change) = event {
                if change.origin == ChangeOrigin::Remote {
                    let _ = model.flush_full();
                }
            }
        });

        model.apply_remote_state(state(&[("a", Value::Int(1))]));
        model.settled().await;

        let (mode, data) = sent_sync(remote.try_recv().unwrap());
        assert_eq!(mode, SyncMode::Full);
        assert!(!data.contains_key("a"));
        assert_eq!(data.get("b"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_local_change_during_apply_is_not_suppressed() {
        let (_manager, model, remote) = live_model(&WIDGET_MODEL, State::new());

        model.subscribe(|model, event| {
            if let ModelEvent::Change(change) = event {
                if change.origin == ChangeOrigin::Remote {
                    model.set("a", 2).unwrap();
                    let _ = model.flush_patch(model.buffered_diff());
                }
            }
        });

        model.apply_remote_state(state(&[("a", Value::Int(1))]));
        model.settled().await;

        let (_, data) = sent_sync(remote.try_recv().unwrap());
        assert_eq!(data.get("a"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_echo_lock_cleared_after_apply() {
        let (_manager, model, remote) = live_model(&WIDGET_MODEL, State::new());

        model.apply_remote_state(state(&[("a", Value::Int(1))]));
        assert_eq!(model.flush_patch(state(&[("a", Value::Int(1))])).unwrap(), FlushOutcome::Sent);
        model.settled().await;
        assert_eq!(remote.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_value_replaces_unsaved_local_edit() {
        let (_manager, model, remote) = live_model(&WIDGET_MODEL, State::new());

        model.set("a", 2).unwrap();
        model.set("b", 5).unwrap();
        model.apply_remote_state(state(&[("a", Value::Int(1))]));

        assert_eq!(model.get("a"), Some(Value::Int(1)));
        assert_eq!(model.buffered_diff(), state(&[("b", Value::Int(5))]));

        assert_eq!(model.save_changes().unwrap(), FlushOutcome::Sent);
        model.settled().await;
        let (_, data) = sent_sync(remote.try_recv().unwrap());
        assert!(!data.contains_key("a"));
        assert_eq!(data.get("b"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_save_after_remote_overwrite_sends_nothing() {
        let (_manager, model, remote) = live_model(&WIDGET_MODEL, State::new());

        model.set("a", 2).unwrap();
        model.apply_remote_state(state(&[("a", Value::Int(1))]));

        assert!(model.buffered_diff().is_empty());
        assert_eq!(model.save_changes().unwrap(), FlushOutcome::Empty);
        model.settled().await;
        assert!(remote.drain().is_empty());
        assert_eq!(model.pending(), 0);
    }

    #[tokio::test]
    async fn test_invalid_remote_attribute_is_skipped() {
        let (_manager, model, _remote) = live_model(&DOM_WIDGET_MODEL, State::new());

        model.apply_remote_state(state(&[
            ("msg_throttle", Value::Int(0)),
            ("visible", Value::Bool(false)),
        ]));

        assert_eq!(model.get("visible"), Some(Value::Bool(false)));
        assert_eq!(model.get("msg_throttle"), Some(Value::Int(3)));
        let outcome = model.flush_patch(state(&[("visible", Value::Bool(false))]));
        assert_eq!(outcome.unwrap(), FlushOutcome::Sent);
    }

    #[tokio::test]
    async fn test_on_some_change_fires_once_per_batch() {
        let (_manager, model, _remote) = live_model(&WIDGET_MODEL, State::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        model.on_some_change(&["a", "b"], move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        model
            .set_many(state(&[("a", Value::Int(1)), ("b", Value::Int(2))]))
            .unwrap();
        model.set("c", 3).unwrap();
        model.set("a", 1).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_inbound_is_emitted() {
        let (_manager, model, remote) = live_model(&WIDGET_MODEL, State::new());
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        model.subscribe(move |_, event| {
            if let ModelEvent::Custom { content, buffers } = event {
                if let Some(tx) = lock(&tx).take() {
                    let _ = tx.send((content.clone(), buffers.clone()));
                }
            }
        });

        remote
            .send_custom(json!({"k": 1}), vec![Bytes::from_static(b"raw")])
            .unwrap();
        let (content, buffers) = rx.await.unwrap();
        assert_eq!(content, json!({"k": 1}));
        assert_eq!(buffers, vec![Bytes::from_static(b"raw")]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_unregisters() {
        let (manager, model, remote) = live_model(&WIDGET_MODEL, State::new());
        let destroyed = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&destroyed);
        model.subscribe(move |_, event| {
            if matches!(event, ModelEvent::Destroy) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        model.close(false).await;
        model.close(false).await;

        assert!(model.is_closed());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(model.subscription_count(), 0);
        assert!(manager.get_model(model.id()).await.is_err());
        assert_eq!(remote.drain(), vec![PeerFrame::Closed]);
        assert!(matches!(model.flush_full(), Err(WidgetError::NoChannel(_))));
    }
}

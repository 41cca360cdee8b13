//! # Widget Sync
//!
//! Keeps front-end widget models in step with their remote peers.
//!
//! ## Overview
//!
//! A [`SyncedModel`] holds a set of named attributes mirrored by a kernel-side
//! peer over a comm channel. Local changes accumulate in a diff and are sent
//! as patches; changes from the peer are decoded and applied without being
//! echoed back. Outgoing traffic is throttled: once `msg_throttle` messages
//! are unacknowledged, further syncs fold into a single buffered message that
//! goes out when the peer reports idle.
//!
//! The pieces:
//!
//! - [`Value`] and [`State`]: attribute values, with model references as a
//!   variant of their own
//! - [`ModelClass`]: static per-class defaults, codec table and validators
//! - [`codec`]: the async encode/decode pipeline and binary buffer handling
//! - [`SyncedModel`]: the sync engine, with one ordered task queue per model
//! - [`WidgetManager`]: the id → model registry references resolve through
//! - [`ViewList`]: reconciles a list of child views with a list of models
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use widget_sync::{InMemoryManager, ModelId, State, SyncConfig, WIDGET_MODEL};
//! use widget_sync_comm::pair;
//!
//! # async fn demo() -> widget_sync::Result<()> {
//! let manager = InMemoryManager::new(SyncConfig::default());
//! let (channel, _remote) = pair(ModelId::new("slider"));
//! let model = manager.create_model(
//!     &WIDGET_MODEL,
//!     ModelId::new("slider"),
//!     Some(Arc::new(channel)),
//!     State::new(),
//! );
//!
//! model.set("value", 42)?;
//! model.save_changes()?;
//! model.settled().await;
//! # Ok(())
//! # }
//! ```

pub mod class;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod model;
mod queue;
pub mod reconciler;
pub mod value;
pub mod view;

pub use class::{ModelClass, Validator, BOX_MODEL, DOM_WIDGET_MODEL, WIDGET_MODEL};
pub use codec::{
    attach_buffers, decode_state, encode_state, reassemble_state, unpack_models, AttributeCodec,
    DecodedState, EncodedState, UnpackModels,
};
pub use config::SyncConfig;
pub use error::{Result, WidgetError};
pub use events::{Change, ChangeOrigin, Listener, ModelEvent, SubscriptionId};
pub use manager::memory::{DisplayRecord, InMemoryManager, ViewFactory};
pub use manager::WidgetManager;
pub use model::{BufferedMessage, FlushOutcome, SyncedModel};
pub use reconciler::{SameIdentity, ViewList};
pub use value::{State, Value};
pub use view::{ready_view, spawn_view, View, ViewFuture};

pub use widget_sync_comm::ModelId;

//! # Widget Sync Comm
//!
//! The channel boundary between a front-end widget model and its kernel-side
//! peer.
//!
//! ## Overview
//!
//! Each model talks to its remote counterpart over one comm channel. The
//! channel is an ordered, bidirectional pipe: messages arrive in the order
//! they were sent, in both directions, and nothing is confirmed beyond local
//! enqueue.
//!
//! This crate holds only what both sides of that boundary agree on:
//!
//! - [`ModelId`] and the reference token a model serializes itself as
//! - the message shapes exchanged on the channel ([`messages`])
//! - the [`Channel`] trait and an in-memory pair for tests
//!
//! ## Message Flow
//!
//! ```text
//! Front-end model                     Kernel peer
//!   |-------- sync (full|patch) ------->|
//!   |<------- status: busy -------------|
//!   |<------- update -------------------|
//!   |<------- status: idle -------------|   (releases one throttle slot)
//!   |-------- custom ------------------>|
//!   |<------- display ------------------|
//!   |<------- close --------------------|
//! ```

pub mod channel;
pub mod error;
pub mod messages;
pub mod types;

pub use channel::memory::{pair, MemoryChannel, PeerFrame, RemoteEnd};
pub use channel::Channel;
pub use error::{CommError, Result};
pub use messages::{
    ChannelEvent, CommMessage, ExecutionState, InboundData, OutboundData, StatusMessage,
    SyncMode,
};
pub use types::{ModelId, REFERENCE_PREFIX};

//! # Widget Sync Testkit
//!
//! Testing utilities for widget-sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Generators**: Proptest strategies for attribute values, states and
//!   flush sequences
//! - **Fixtures**: A test bench wiring a manager to the remote end of a
//!   memory channel, plus views that record their teardown
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use widget_sync_testkit::generators::state;
//!
//! proptest! {
//!     #[test]
//!     fn state_survives_the_wire(s in state()) {
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use widget_sync::{State, WIDGET_MODEL};
//! use widget_sync_testkit::fixtures::TestBench;
//!
//! # async fn demo() {
//! let bench = TestBench::new();
//! let (model, remote) = bench.live_model(&WIDGET_MODEL, "slider", State::new());
//! model.set("value", 1).unwrap();
//! model.save_changes().unwrap();
//! model.settled().await;
//! assert_eq!(remote.drain().len(), 1);
//! # }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    eventually, init_tracing, sent_syncs, state_of, RecordingView, SentSync, TestBench,
};
pub use generators::{attribute_name, flush_ops, scalar_value, state, value, FlushOp};

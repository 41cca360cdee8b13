//! Configuration for the sync engine.

/// Configuration shared by every model a manager creates.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Throttle limit used when a model has no valid `msg_throttle` attribute.
    pub fallback_throttle: u32,
    /// Whether full syncs leave out attributes still equal to their default.
    pub drop_defaults_on_full: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fallback_throttle: 1,
            drop_defaults_on_full: false,
        }
    }
}

// Error types for the simulation core.
//
// Only recoverable failures are represented here. Requests that are merely
// impossible in the current state (moving a zero-speed entity, adding a tile
// off the map) are silent no-ops and never produce an error. Internal
// corruption (an unsorted tile list, an impossible index entry) panics,
// because a replica that keeps running after diverging is worse than one
// that stops.
//
// See also: `dispatch.rs` (where script failures are caught and reported),
// `sim.rs` (where task failures are caught in `advance_to`).

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("script action failed: {0}")]
    Script(#[from] ScriptError),

    #[error("hook dispatch exceeded depth limit of {limit}")]
    DispatchDepthExceeded { limit: u32 },

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Failure reported by an external `Action`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

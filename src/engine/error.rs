use std::fmt;

/// Failures that originate inside the engine rather than in a view-model.
///
/// They are published on the same error signals as reducer failures.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The state worker is gone, so no reducer can be committed.
    StateWorkerStopped,
    /// A reducer, or the code producing reducers, panicked.
    ReducerPanicked(String),
    /// The engine was dropped while the action was still queued.
    Shutdown,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::StateWorkerStopped => write!(f, "state worker stopped"),
            EngineError::ReducerPanicked(msg) => write!(f, "reducer panicked: {msg}"),
            EngineError::Shutdown => write!(f, "engine shut down"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

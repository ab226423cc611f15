use thiserror::Error;

// Failure taxonomy for the monitoring core. Nothing here is allowed to crash
// the pipeline: calculator and lookup failures degrade to lower-confidence
// signals, only malformed events are rejected outright.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("risk calculator '{calculator}' failed: {reason}")]
    Calculator { calculator: &'static str, reason: String },

    #[error("external lookup timed out after {0} ms")]
    LookupTimeout(u64),

    #[error("alert delivery failed after {attempts} attempts: {reason}")]
    SinkDelivery { attempts: u32, reason: String },

    #[error("monitor is not running")]
    NotRunning,
}

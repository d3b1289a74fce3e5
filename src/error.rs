use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can surface from the discovery and control engine
///
/// Transient network failures during scanning and refreshing never reach
/// callers; only control outcomes, lookups and configuration problems do.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No device with this id is in the registry
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device was reached (or not) but did not confirm the directive
    #[error("Control failed for {device_id}: {reason}")]
    ControlFailed {
        /// Id of the device the directive was sent to
        device_id: String,
        /// Underlying network or protocol error text
        reason: String,
    },

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timed out waiting for the device
    #[error("Request timeout")]
    Timeout,

    /// Device answered with something we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Full-subnet worker threads could not be started or all failed
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

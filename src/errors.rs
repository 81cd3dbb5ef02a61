use std::path::PathBuf;

/// The seven error kinds the coordinator and its collaborators can raise.
///
/// Kinds, not concrete fault types: each variant carries just enough context
/// to log and to decide propagation (recover locally, evict a viewer, or
/// exit the process).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error at {path}: {detail}")]
    ConfigInvalid { path: PathBuf, detail: String },

    #[error("failed to start encoder: {0}")]
    EncoderStartFailed(String),

    #[error("encoder exited unexpectedly: {0}")]
    EncoderCrashed(String),

    #[error("viewer {viewer_id} transport error: {detail}")]
    ViewerTransportError { viewer_id: String, detail: String },

    #[error("viewer {viewer_id} evicted: outbound queue full")]
    BackpressureOverflow { viewer_id: String },

    #[error("malformed FLV stream: {0}")]
    MalformedFlv(String),

    #[error("shutdown requested")]
    ShutdownSignal,

    #[error("restart breaker tripped, encoder repeatedly failed to start")]
    BreakerTripped,

    /// Listener bind failures and `axum::serve` I/O errors: unrelated to the
    /// encoder, so kept distinct from `EncoderStartFailed` rather than
    /// overloading its exit code.
    #[error("server error: {0}")]
    ServerError(String),
}

impl AppError {
    /// Process exit code per the CLI contract: 0 clean, 2 config, 3 encoder
    /// missing, 4 breaker tripped, 1 unexpected.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::ConfigInvalid { .. } => 2,
            AppError::EncoderStartFailed(_) => 3,
            AppError::ShutdownSignal => 0,
            AppError::BreakerTripped => 4,
            _ => 1,
        }
    }

    /// WebSocket close code for surfacing this error to a connected viewer.
    pub fn close_code(&self) -> u16 {
        match self {
            AppError::ShutdownSignal => 1000,
            _ => 1011,
        }
    }
}

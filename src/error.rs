//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing and assembling slides
///
/// `Clone` is required: concurrent callers of
/// [`SandboxManager::ensure_ready`](crate::sandbox::SandboxManager::ensure_ready)
/// all receive the outcome of one shared creation attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No receiving context exists on the message bus
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A request went unanswered
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The host refused to create the rendering sandbox
    #[error("Failed to create sandbox: {0}")]
    SandboxCreationFailed(String),

    /// The sandbox answered a command with a failure response
    #[error("Sandbox operation failed: {0}")]
    SandboxOperationFailed(String),

    /// The sandbox has no way to capture its rendered surface
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// A capture session finished without producing any frame
    #[error("No frames captured")]
    NoFramesCaptured,

    /// The assembler rejected its input
    #[error("Assembly failed: {0}")]
    AssemblyError(String),

    /// Another capture session is in progress
    #[error("A capture is already running")]
    AlreadyRunning,

    /// A content spec violated its invariants
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    /// Loading a URL into the surface failed
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// Failed to render or encode content
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Writing the output document failed
    #[error("Failed to save document: {0}")]
    Persistence(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", err))
    }
}

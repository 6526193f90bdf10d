use thiserror::Error;

/// Errors surfaced by the streaming pipeline and the job controller.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The serial port could not be opened at job start.
    #[error("failed to open {port}: {reason}")]
    ChannelOpen { port: String, reason: String },

    /// No program matches the requested identifier.
    #[error("program not found: {id}")]
    ProgramNotFound { id: String },

    /// The job slot is already held by a running job.
    #[error("printer busy")]
    Busy,

    /// The firmware sent no acknowledgment within the configured bound.
    #[error("no acknowledgment after {waited_ms}ms")]
    AckTimeout { waited_ms: u64 },

    /// The link was used after `close()`.
    #[error("link is closed")]
    LinkClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! Framing error types.

use thiserror::Error;

/// Errors produced while reading or writing length-prefixed frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying socket or stream failure.
    #[error("frame i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the stream part-way through a length prefix or payload.
    #[error("stream ended after {read} of {expected} bytes")]
    Truncated {
        /// Bytes the current section needed.
        expected: usize,
        /// Bytes actually received before end of stream.
        read: usize,
    },
    /// The length prefix decoded to a negative value.
    #[error("negative frame length {0}")]
    NegativeLength(i32),
    /// The length prefix exceeds the configured maximum frame size.
    #[error("frame length {len} exceeds maximum {max}")]
    TooLarge {
        /// Announced payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// An outbound payload cannot be described by a signed 32-bit prefix.
    #[error("payload of {0} bytes does not fit a 32-bit length prefix")]
    PayloadTooLarge(usize),
}

impl FrameError {
    /// Whether the error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Truncated { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Self::NegativeLength(_) | Self::TooLarge { .. } | Self::PayloadTooLarge(_) => false,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Truncated { .. } => "truncated",
            Self::NegativeLength(_) => "negative_length",
            Self::TooLarge { .. } => "too_large",
            Self::PayloadTooLarge(_) => "payload_too_large",
        }
    }
}

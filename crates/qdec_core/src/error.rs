use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by decoder invocations and the data formats they consume.
///
/// Every failure inside a decoder invocation propagates out as one of these
/// variants. The caller records the invocation as failed and treats the
/// output file as undefined; no variant is ever recovered from inside the
/// protocol itself.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed or mis-sized binary data.
    ///
    /// Raised when a b8 record has the wrong length or when a detection-event
    /// stream ends before the declared number of shots has been read.
    #[error("format error: {0}")]
    Format(String),

    /// The error model is inconsistent or decoding failed internally.
    #[error("decode error: {0}")]
    Decode(String),

    /// A required path is missing, unreadable, or unwritable.
    #[error("resource error at {path}: {reason}")]
    Resource { path: PathBuf, reason: String },

    /// Any other I/O failure while reading inputs or writing predictions.
    #[error("i/o error: {0}")]
    Io(std::io::Error),
}

impl ProtocolError {
    pub fn format(msg: impl Into<String>) -> Self {
        ProtocolError::Format(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ProtocolError::Decode(msg.into())
    }

    pub fn resource(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ProtocolError::Resource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        // A stream that ends early is a size violation, not a transport fault.
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Format(format!("stream ended early: {e}"))
        } else {
            ProtocolError::Io(e)
        }
    }
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

use std::io;
use thiserror::Error;

/// Failure of a framed exchange. Every variant leaves the stream in an
/// unknown position, so the connection must be dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    Closed,

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("{kind} of {size} bytes exceeds the {limit} bytes limit")]
    TooLarge {
        kind: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("unexpected message: {0}")]
    Unexpected(String),
}

impl ProtocolError {
    /// Corrupt or out-of-contract bytes on the wire.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::Header(_) | ProtocolError::TooLarge { .. } | ProtocolError::Unexpected(_)
        )
    }

    /// Socket level failure: closed peer, reset, timeout.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Closed | ProtocolError::Io(_))
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ProtocolError::Io(e) => {
                e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ProtocolError::Closed.is_transport());
        assert!(!ProtocolError::Closed.is_framing());

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(ProtocolError::from(json).is_framing());

        let timeout = ProtocolError::from(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
        assert!(timeout.is_transport());
        assert!(timeout.is_timeout());
    }
}

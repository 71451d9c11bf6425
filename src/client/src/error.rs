use common::types::CameraId;
use common::ProtocolError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("not connected")]
    NotConnected,

    #[error("camera {0} is not served by this connection")]
    UnknownCamera(CameraId),

    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Protocol(ProtocolError::Io(e))
    }
}

use serde::{Deserialize, Serialize};

use crate::types::{CameraId, ServerInfo};

/// JSON header of every wire message. Only `Frame` is followed by a binary
/// payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    CameraList {
        cameras: Vec<CameraId>,
        server_info: ServerInfo,
    },
    GetFrame {
        camera_id: CameraId,
    },
    Frame {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        camera_id: Option<CameraId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp_ms: Option<i64>,
    },
    NoFrame {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        camera_id: Option<CameraId>,
    },
    Error {
        message: String,
    },
}

impl Message {
    pub fn has_payload(&self) -> bool {
        matches!(self, Message::Frame { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::CameraList { .. } => "camera_list",
            Message::GetFrame { .. } => "get_frame",
            Message::Frame { .. } => "frame",
            Message::NoFrame { .. } => "no_frame",
            Message::Error { .. } => "error",
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Message::Error {
            message: message.into(),
        }
    }
}

/// A header together with the payload that follows it on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub message: Message,
    pub payload: Option<Vec<u8>>,
}

impl Packet {
    pub fn new(message: Message) -> Self {
        Packet {
            message,
            payload: None,
        }
    }

    pub fn frame(camera_id: CameraId, timestamp_ms: i64, data: Vec<u8>) -> Self {
        Packet {
            message: Message::Frame {
                camera_id: Some(camera_id),
                timestamp_ms: Some(timestamp_ms),
            },
            payload: Some(data),
        }
    }

    /// Exact bytes written for this packet: header block, then the payload
    /// block for frames.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let header = serde_json::to_vec(&self.message)?;
        let payload = if self.message.has_payload() {
            Some(self.payload.as_deref().unwrap_or(&[]))
        } else {
            None
        };

        let mut data =
            Vec::with_capacity(8 + header.len() + payload.map(|p| p.len()).unwrap_or(0));
        data.extend_from_slice(&(header.len() as u32).to_be_bytes());
        data.extend_from_slice(&header);
        if let Some(payload) = payload {
            data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            data.extend_from_slice(payload);
        }
        Ok(data)
    }
}

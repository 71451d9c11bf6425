use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera identifier advertised by the server at handshake.
///
/// Single boards number their cameras (`0`, `1`, ...), stereo boards may name
/// them (`"left"`, `"right"`). Both forms travel as plain JSON values.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum CameraId {
    Index(u32),
    Name(String),
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CameraId::Index(index) => write!(f, "{}", index),
            CameraId::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<u32> for CameraId {
    fn from(index: u32) -> Self {
        CameraId::Index(index)
    }
}

impl From<&str> for CameraId {
    fn from(name: &str) -> Self {
        CameraId::Name(name.to_string())
    }
}

/// Server descriptor sent once with the camera list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServerInfo {
    pub fps: u32,
    pub resolution: (u32, u32),
    pub quality: u8,
}

impl ServerInfo {
    /// Minimum delay between two requests for the same camera when the client
    /// polls `oversampling` times faster than the advertised rate.
    pub fn poll_interval(&self, oversampling: u32) -> std::time::Duration {
        let fps = self.fps.max(1) as f64;
        let factor = oversampling.max(1) as f64;
        std::time::Duration::from_secs_f64(1.0 / (fps * factor))
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ServerInfo(fps={}, resolution={}x{}, quality={})",
            self.fps, self.resolution.0, self.resolution.1, self.quality,
        )
    }
}

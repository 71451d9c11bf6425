use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use simple_error::SimpleError as Error;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9995;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Connection {
    pub host: String,
    pub port: u16,
}

impl Default for Connection {
    fn default() -> Self {
        Connection {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    TestPattern,
    Camera,
    Stereo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Video {
    pub source: SourceKind,
    pub device: String,
    pub right_device: String,
    pub cameras: u32,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub quality: u8,
}

impl Default for Video {
    fn default() -> Self {
        Video {
            source: SourceKind::TestPattern,
            device: "/dev/video0".to_string(),
            right_device: "/dev/video1".to_string(),
            cameras: 1,
            resolution: (640, 480),
            fps: 30,
            quality: 80,
        }
    }
}

impl Video {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub max_clients: usize,
    pub client_timeout_secs: u64,
    pub log_file: Option<String>,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            bind: "0.0.0.0".to_string(),
            max_clients: 5,
            client_timeout_secs: 30,
            log_file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Client {
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub exchange_timeout_ms: u64,
    pub oversampling: u32,
    pub auto_reconnect: bool,
}

impl Default for Client {
    fn default() -> Self {
        Client {
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            exchange_timeout_ms: 5_000,
            oversampling: 3,
            auto_reconnect: true,
        }
    }
}

impl Client {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub connection: Connection,
    pub video: Video,
    pub server: Server,
    pub client: Client,
}

impl Settings {
    /// Load `Settings.toml` from the working directory if present, then apply
    /// `CAMLINK__SECTION__KEY` environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        Settings::from_file("Settings")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("CAMLINK").separator("__"))
            .build()?
            .try_deserialize()?;

        if let Err(e) = settings.validate() {
            return Err(ConfigError::Message(e.to_string()));
        }
        debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.video.quality == 0 || self.video.quality > 100 {
            return Err(Error::new(format!(
                "video.quality must be within 1..=100, got {}",
                self.video.quality
            )));
        }
        if self.video.fps == 0 {
            return Err(Error::new("video.fps must be positive"));
        }
        if self.video.resolution.0 == 0 || self.video.resolution.1 == 0 {
            return Err(Error::new("video.resolution must not be empty"));
        }
        if self.video.source == SourceKind::TestPattern && self.video.cameras == 0 {
            return Err(Error::new("video.cameras must be positive"));
        }
        if self.server.max_clients == 0 {
            return Err(Error::new("server.max_clients must be positive"));
        }
        if self.client.oversampling == 0 {
            return Err(Error::new("client.oversampling must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.connection.port, DEFAULT_PORT);
        assert_eq!(settings.client.oversampling, 3);
        assert_eq!(settings.client.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[connection]
host = "10.0.0.7"
port = 8888

[video]
source = "stereo"
resolution = [1280, 720]
fps = 15
quality = 70

[server]
max_clients = 2
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.connection.host, "10.0.0.7");
        assert_eq!(settings.connection.port, 8888);
        assert_eq!(settings.video.source, SourceKind::Stereo);
        assert_eq!(settings.video.resolution, (1280, 720));
        assert_eq!(settings.video.fps, 15);
        assert_eq!(settings.server.max_clients, 2);
        assert_eq!(settings.server.client_timeout_secs, 30);
        assert!(settings.client.auto_reconnect);
    }

    #[test]
    fn invalid_quality_is_refused() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[video]\nquality = 0").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert!(Settings::from_file(&path).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::from_file("/nonexistent/camlink-settings").unwrap();
        assert_eq!(settings.video.fps, 30);
    }
}

use common::conn::MessageStream;
use common::messages::{Message, Packet};
use common::settings;
use common::types::{CameraId, ServerInfo};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::ClientError;
use crate::stats::StatsBook;

/// What the server advertised when the connection was opened.
#[derive(Clone, Debug, PartialEq)]
pub struct Handshake {
    pub cameras: Vec<CameraId>,
    pub server_info: ServerInfo,
}

/// The one socket of a client and where it points to.
#[derive(Default)]
pub struct Link {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl Link {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// One request/response exchange. The caller holds the link lock, which is
    /// what keeps exchanges from overlapping.
    fn exchange(&mut self, request: &Message) -> Result<Packet, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        stream.write_msg(request)?;
        Ok(stream.read_packet()?)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Closed socket to {}", self.address());
        }
    }
}

/// Connect to `host:port` and read the camera list.
pub fn open(
    host: &str,
    port: u16,
    config: &settings::Client,
) -> Result<(TcpStream, Handshake), ClientError> {
    let addr = format!("{}:{}", host, port);
    let addrs_iter = addr
        .to_socket_addrs()
        .map_err(|e| ClientError::Resolve {
            addr: addr.clone(),
            source: e,
        })?;

    let mut last_error = "no address resolved".to_string();
    let mut connected = None;
    for sock_addr in addrs_iter {
        info!("Connecting to {:?}...", sock_addr);
        match TcpStream::connect_timeout(&sock_addr, config.connect_timeout()) {
            Ok(stream) => {
                connected = Some(stream);
                break;
            }
            Err(e) => {
                warn!("Failed to connect: {}. Address: {}", e, sock_addr);
                last_error = e.to_string();
            }
        }
    }
    let mut stream = connected.ok_or(ClientError::Connect {
        addr: addr.clone(),
        reason: last_error,
    })?;

    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.handshake_timeout()))?;
    stream.set_write_timeout(Some(config.exchange_timeout()))?;

    info!("Successfully connected to server, waiting for camera list...");
    let message = match stream.read_msg() {
        Ok(message) => message,
        Err(e) if e.is_timeout() => {
            return Err(ClientError::Handshake(
                "timed out waiting for the camera list".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    let handshake = match message {
        Message::CameraList {
            cameras,
            server_info,
        } => Handshake {
            cameras,
            server_info,
        },
        Message::Error { message } => {
            return Err(ClientError::Handshake(format!(
                "server refused connection: {}",
                message
            )))
        }
        other => {
            return Err(ClientError::Handshake(format!(
                "expected camera_list, got {}",
                other.kind()
            )))
        }
    };

    stream.set_read_timeout(Some(config.exchange_timeout()))?;
    info!(
        "Session established with {}: cameras {:?}, {}",
        addr, handshake.cameras, handshake.server_info
    );
    Ok((stream, handshake))
}

/// State shared between the caller's thread and the polling thread.
///
/// The link mutex serializes every use of the socket: scheduler exchanges,
/// ad-hoc requests and closing.
pub struct Shared {
    link: Mutex<Link>,
    breaker: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    session: Mutex<Option<Handshake>>,
    pub(crate) stats: Mutex<StatsBook>,
    pub(crate) config: settings::Client,
}

impl Shared {
    pub fn new(config: settings::Client) -> Self {
        Shared {
            link: Mutex::new(Link::default()),
            breaker: Mutex::new(None),
            connected: AtomicBool::new(false),
            session: Mutex::new(None),
            stats: Mutex::new(StatsBook::default()),
            config,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<Handshake> {
        lock(&self.session).clone()
    }

    pub fn target(&self) -> Option<(String, u16)> {
        let link = lock(&self.link);
        if link.host.is_empty() {
            None
        } else {
            Some((link.host.clone(), link.port))
        }
    }

    /// Open a fresh connection and install it in place of the old one.
    /// `cancelled` is checked under the link lock so a concurrent disconnect
    /// wins over a late handshake.
    pub fn handshake<F>(
        &self,
        host: &str,
        port: u16,
        cancelled: F,
    ) -> Result<Handshake, ClientError>
    where
        F: Fn() -> bool,
    {
        {
            let mut link = lock(&self.link);
            link.close();
            lock(&self.breaker).take();
            link.host = host.to_string();
            link.port = port;
            self.connected.store(false, Ordering::SeqCst);
        }

        let (stream, handshake) = open(host, port, &self.config)?;

        let mut link = lock(&self.link);
        if cancelled() {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(ClientError::NotConnected);
        }
        link.close();
        *lock(&self.breaker) = stream.try_clone().ok();
        link.stream = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        lock(&self.stats).clear();
        *lock(&self.session) = Some(handshake.clone());
        Ok(handshake)
    }

    /// Request the newest frame of `camera`. Any protocol or transport failure
    /// closes the socket and clears the connected flag before returning.
    pub fn exchange(&self, camera: &CameraId) -> Result<Packet, ClientError> {
        let mut link = lock(&self.link);
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let request = Message::GetFrame {
            camera_id: camera.clone(),
        };
        match link.exchange(&request) {
            Ok(packet) => Ok(packet),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                link.close();
                lock(&self.breaker).take();
                Err(e)
            }
        }
    }

    /// Close the socket. An exchange in flight is interrupted through a
    /// cloned handle, so this never waits for the exchange timeout.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let breaker = lock(&self.breaker).take();
        if let Some(stream) = breaker {
            // Shut down outside the link lock; the torn framing state is dropped below.
            let _ = stream.shutdown(Shutdown::Both);
        }
        lock(&self.link).close();
    }

    pub fn forget_session(&self) {
        *lock(&self.session) = None;
        lock(&self.stats).clear();
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

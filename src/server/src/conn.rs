use chrono::Utc;
use common::conn::MessageStream;
use common::messages::{Message, Packet};
use common::settings::Settings;
use common::types::{CameraId, ServerInfo};
use common::ProtocolError;
use simple_error::SimpleError as Error;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::capture::CaptureSource;
use crate::registry::{ClientHandle, ClientRegistry, Frame};

const ACCEPT_POLL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
    Serving,
}

/// Frame server: one accept loop, one capture loop and one handler thread per
/// connected client.
pub struct StreamServer {
    settings: Settings,
    state: Arc<Mutex<ServerState>>,
    running: Arc<AtomicBool>,
    registry: Arc<ClientRegistry>,
    local_addr: Option<SocketAddr>,
    threads: Vec<thread::JoinHandle<()>>,
}

/// Cloneable trigger that stops a running server from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    registry: Arc<ClientRegistry>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Shutdown requested");
        }
        self.registry.close_all();
    }
}

impl StreamServer {
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(ClientRegistry::new(settings.server.max_clients));
        StreamServer {
            settings,
            state: Arc::new(Mutex::new(ServerState::Stopped)),
            running: Arc::new(AtomicBool::new(false)),
            registry,
            local_addr: None,
            threads: Vec::new(),
        }
    }

    /// Build and open the capture source on a new capture thread, bind the
    /// listener and spawn the accept loop. Returns the bound address (useful
    /// with port 0). The source is only ever touched by the capture thread.
    pub fn start<F>(&mut self, make_source: F) -> Result<SocketAddr, Error>
    where
        F: FnOnce() -> Box<dyn CaptureSource> + Send + 'static,
    {
        if self.state() != ServerState::Stopped {
            return Err(Error::new("server is already running"));
        }
        // reap loops that a shutdown handle already stopped
        self.stop();

        let video = &self.settings.video;
        let (opened_tx, opened_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel();
        let capture = CaptureLoop {
            quality: video.quality,
            interval: video.frame_interval(),
            registry: self.registry.clone(),
            running: self.running.clone(),
            state: self.state.clone(),
        };
        self.running.store(true, Ordering::SeqCst);
        let capture_thread = match thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture.run(make_source, opened_tx, go_rx))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(Error::new(format!("Failed to spawn capture loop: {}", e)));
            }
        };

        let cameras = match opened_rx.recv() {
            Ok(Ok(cameras)) => cameras,
            Ok(Err(e)) => {
                self.abandon(capture_thread);
                return Err(e);
            }
            Err(_) => {
                self.abandon(capture_thread);
                return Err(Error::new("capture thread exited while opening the source"));
            }
        };

        let url = format!(
            "{}:{}",
            self.settings.server.bind, self.settings.connection.port
        );
        let bound = bind(&url).and_then(|listener| {
            let addr = listener.local_addr()?;
            Ok((listener, addr))
        });
        let (listener, addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                drop(go_tx);
                self.abandon(capture_thread);
                return Err(Error::new(format!("Failed to listen on {}: {}", url, e)));
            }
        };

        let video = &self.settings.video;
        let info = ServerInfo {
            fps: video.fps,
            resolution: video.resolution,
            quality: video.quality,
        };
        info!("Serving cameras {:?} with {}", cameras, info);

        let session = Arc::new(Session {
            cameras,
            info,
            client_timeout: Duration::from_secs(self.settings.server.client_timeout_secs),
        });
        let registry = self.registry.clone();
        let running = self.running.clone();
        let accept_thread = thread::Builder::new()
            .name("accept".to_string())
            .spawn(move || accept_loop(listener, registry, session, running));
        match accept_thread {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                drop(go_tx);
                self.abandon(capture_thread);
                return Err(Error::new(format!("Failed to spawn accept loop: {}", e)));
            }
        }

        self.set_state(ServerState::Listening);
        self.local_addr = Some(addr);
        info!("Listening started, ready to accept on {}...", addr);
        if go_tx.send(()).is_err() {
            warn!("Capture loop exited before serving");
        }
        self.threads.push(capture_thread);
        Ok(addr)
    }

    /// Give up on a start: let the capture thread release its source and
    /// wait for it.
    fn abandon(&self, capture_thread: thread::JoinHandle<()>) {
        self.running.store(false, Ordering::SeqCst);
        if capture_thread.join().is_err() {
            error!("Capture thread panicked");
        }
    }

    /// Stop both loops, close every client and release the capture source.
    pub fn stop(&mut self) {
        if self.threads.is_empty() && self.state() == ServerState::Stopped {
            return;
        }
        self.shutdown_handle().shutdown();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("A server thread panicked");
            }
        }
        self.registry.close_all();
        self.local_addr = None;
        self.set_state(ServerState::Stopped);
        info!("Server stopped");
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            registry: self.registry.clone(),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind(url: &str) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(url)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// What every connection of this server is told and bound by.
struct Session {
    cameras: Vec<CameraId>,
    info: ServerInfo,
    client_timeout: Duration,
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    session: Arc<Session>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Connected a new client {}...", addr);
                if let Err(e) = stream.set_nonblocking(false) {
                    error!("Failed to configure client {}: {}", addr, e);
                    continue;
                }
                match registry.register(&stream, addr) {
                    Ok(handle) => {
                        let id = handle.id;
                        let session = session.clone();
                        let running = running.clone();
                        let spawned = thread::Builder::new()
                            .name(format!("client-{}", id))
                            .spawn(move || serve_client(stream, handle, session, running));
                        if let Err(e) = spawned {
                            error!("Failed to spawn handler for {}: {}", addr, e);
                            registry.discard(id);
                        }
                    }
                    Err(e) => {
                        warn!("Rejecting client {}: {}", addr, e);
                        reject(stream, &e.to_string());
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                error!("Cannot connect a new client: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("Accept loop stopped");
}

fn reject(mut stream: TcpStream, reason: &str) {
    let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
    let _ = stream.write_msg(&Message::error(reason));
    let _ = stream.shutdown(Shutdown::Both);
}

/// Answer one client's requests until it leaves or fails.
fn serve_client(
    mut stream: TcpStream,
    handle: ClientHandle,
    session: Arc<Session>,
    running: Arc<AtomicBool>,
) {
    if let Err(e) = configure(&stream, session.client_timeout) {
        error!("Failed to configure client {}: {}", handle.addr, e);
        handle.mark_dead();
        return;
    }

    let hello = Message::CameraList {
        cameras: session.cameras.clone(),
        server_info: session.info.clone(),
    };
    if let Err(e) = stream.write_msg(&hello) {
        warn!("Failed to send camera list to {}: {}", handle.addr, e);
        handle.mark_dead();
        return;
    }

    while running.load(Ordering::SeqCst) && handle.is_alive() {
        let request = match stream.read_msg() {
            Ok(request) => request,
            Err(ProtocolError::Closed) => {
                info!("Client {} disconnected", handle.addr);
                break;
            }
            Err(ref e) if e.is_timeout() => {
                info!("Client {} idle for too long, closing", handle.addr);
                break;
            }
            Err(e) => {
                warn!("Failed to read request from {}: {}", handle.addr, e);
                break;
            }
        };

        let reply = answer(&request, &handle, &session);
        if let Err(e) = stream.write_packet(&reply) {
            warn!(
                "Failed to write to {}: {}. Closing connection.",
                handle.addr, e
            );
            break;
        }
    }
    handle.mark_dead();
}

fn configure(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(())
}

fn answer(request: &Message, handle: &ClientHandle, session: &Session) -> Packet {
    match request {
        Message::GetFrame { camera_id } => {
            if !session.cameras.contains(camera_id) {
                return Packet::new(Message::error(format!("unknown camera {}", camera_id)));
            }
            match handle.mailbox.take(camera_id) {
                Some(frame) => {
                    Packet::frame(frame.camera.clone(), frame.timestamp_ms, frame.jpeg.clone())
                }
                None => Packet::new(Message::NoFrame {
                    camera_id: Some(camera_id.clone()),
                }),
            }
        }
        other => Packet::new(Message::error(format!(
            "unsupported request {}",
            other.kind()
        ))),
    }
}

struct CaptureLoop {
    quality: u8,
    interval: Duration,
    registry: Arc<ClientRegistry>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<ServerState>>,
}

impl CaptureLoop {
    /// Open the source, report its cameras through `opened` and wait for
    /// `go` before capturing. A dropped `go` means the start was abandoned.
    fn run<F>(
        self,
        make_source: F,
        opened: mpsc::Sender<Result<Vec<CameraId>, Error>>,
        go: mpsc::Receiver<()>,
    ) where
        F: FnOnce() -> Box<dyn CaptureSource>,
    {
        info!("Initializing capture source...");
        let mut source = make_source();
        if let Err(e) = source.open() {
            let _ = opened.send(Err(e));
            return;
        }
        let cameras = source.cameras();
        if cameras.is_empty() {
            source.release();
            let _ = opened.send(Err(Error::new("capture source has no cameras")));
            return;
        }
        if opened.send(Ok(cameras.clone())).is_err() || go.recv().is_err() {
            source.release();
            return;
        }

        self.set_state(ServerState::Serving);
        info!("Capture loop started at {:?} per pass", self.interval);

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            if !self.registry.is_empty() {
                self.capture_pass(source.as_mut(), &cameras);
            }

            let removed = self.registry.prune();
            if removed > 0 {
                debug!("Pruned {} client(s)", removed);
            }

            let elapsed = started.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }

        source.release();
        self.set_state(ServerState::Stopped);
        info!("Capture loop stopped");
    }

    /// One frame per camera to every client. A failing camera only loses
    /// this frame.
    fn capture_pass(&self, source: &mut dyn CaptureSource, cameras: &[CameraId]) {
        for camera in cameras {
            match source.capture(camera) {
                Ok(Some(capture)) => match capture.into_jpeg(self.quality) {
                    Ok(jpeg) => {
                        let frame = Arc::new(Frame {
                            camera: camera.clone(),
                            jpeg,
                            timestamp_ms: Utc::now().timestamp_millis(),
                        });
                        self.registry.deliver(&frame);
                    }
                    Err(e) => warn!("Dropping frame of camera {}: {}", camera, e),
                },
                Ok(None) => {}
                Err(e) => warn!("Unable to take picture from camera {}: {}", camera, e),
            }
        }
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

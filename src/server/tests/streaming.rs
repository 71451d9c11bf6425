extern crate client;
extern crate common;
extern crate server;
extern crate simple_error;

use client::{CameraClient, ClientError, Event};
use common::settings::{self, Settings};
use common::types::CameraId;
use server::{Capture, CaptureSource, ServerState, StreamServer, TestPattern};
use simple_error::SimpleError;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn settings(max_clients: usize) -> Settings {
    let mut settings = Settings::default();
    settings.connection.port = 0;
    settings.server.bind = "127.0.0.1".to_string();
    settings.server.max_clients = max_clients;
    settings.video.cameras = 2;
    settings.video.resolution = (64, 48);
    settings.video.fps = 30;
    settings
}

fn client_config() -> settings::Client {
    settings::Client {
        connect_timeout_ms: 1000,
        handshake_timeout_ms: 1000,
        exchange_timeout_ms: 1000,
        auto_reconnect: false,
        ..settings::Client::default()
    }
}

fn start(max_clients: usize) -> (StreamServer, u16) {
    let settings = settings(max_clients);
    let (cameras, resolution) = (settings.video.cameras, settings.video.resolution);
    let mut server = StreamServer::new(settings);
    let addr = server
        .start(move || pattern(cameras, resolution))
        .unwrap();
    (server, addr.port())
}

fn pattern(cameras: u32, resolution: (u32, u32)) -> Box<dyn CaptureSource> {
    Box::new(TestPattern::new(cameras, resolution))
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

struct BrokenCamera;

impl CaptureSource for BrokenCamera {
    fn open(&mut self) -> Result<(), SimpleError> {
        Err(SimpleError::new("no such device"))
    }

    fn cameras(&self) -> Vec<CameraId> {
        vec![CameraId::Index(0)]
    }

    fn capture(&mut self, _camera: &CameraId) -> Result<Option<Capture>, SimpleError> {
        Err(SimpleError::new("not opened"))
    }

    fn release(&mut self) {}
}

/// Test pattern that records its release.
struct ReleaseTracker {
    inner: TestPattern,
    released: Arc<AtomicBool>,
}

impl CaptureSource for ReleaseTracker {
    fn open(&mut self) -> Result<(), SimpleError> {
        self.inner.open()
    }

    fn cameras(&self) -> Vec<CameraId> {
        self.inner.cameras()
    }

    fn capture(&mut self, camera: &CameraId) -> Result<Option<Capture>, SimpleError> {
        self.inner.capture(camera)
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        self.inner.release()
    }
}

/// Two test cameras where camera 0 fails every other capture and camera 1
/// never delivers.
struct FlakyCameras {
    inner: TestPattern,
    captures: u32,
}

impl CaptureSource for FlakyCameras {
    fn open(&mut self) -> Result<(), SimpleError> {
        self.inner.open()
    }

    fn cameras(&self) -> Vec<CameraId> {
        self.inner.cameras()
    }

    fn capture(&mut self, camera: &CameraId) -> Result<Option<Capture>, SimpleError> {
        match camera {
            CameraId::Index(0) => {
                self.captures += 1;
                if self.captures % 2 == 0 {
                    return Err(SimpleError::new("select timeout"));
                }
                self.inner.capture(camera)
            }
            _ => Err(SimpleError::new("device unplugged")),
        }
    }

    fn release(&mut self) {
        self.inner.release()
    }
}

#[test]
fn both_cameras_deliver_frames_within_200ms() {
    let (mut server, port) = start(5);
    let (mut client, _events) = CameraClient::new(client_config());

    let cameras = client.connect("127.0.0.1", port).unwrap();
    assert_eq!(cameras, vec![CameraId::Index(0), CameraId::Index(1)]);
    assert_eq!(client.server_info().unwrap().fps, 30);

    assert!(wait_until(Duration::from_millis(200), || {
        let stats = client.stats();
        cameras.iter().all(|camera| {
            stats
                .get(camera)
                .map_or(false, |stats| stats.frames_received >= 1)
        })
    }));

    client.disconnect();
    server.stop();
}

#[test]
fn frames_have_the_advertised_resolution() {
    let (mut server, port) = start(5);
    let (mut client, events) = CameraClient::new(client_config());
    client.connect("127.0.0.1", port).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let frame = loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(Event::Frame(frame)) => break frame,
            Ok(_) => continue,
            Err(e) => panic!("no frame received: {}", e),
        }
    };
    assert_eq!(frame.frame.dimensions(), (64, 48));

    client.disconnect();
    server.stop();
}

#[test]
fn state_follows_start_and_stop() {
    let settings = settings(5);
    let mut server = StreamServer::new(settings);
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());

    let addr = server
        .start(|| pattern(1, (16, 16)))
        .unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(server.local_addr(), Some(addr));
    assert!(wait_until(Duration::from_secs(1), || server.state()
        == ServerState::Serving));

    assert!(server.start(|| pattern(1, (16, 16))).is_err());

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
}

#[test]
fn capture_source_failure_is_fatal_to_start() {
    let mut server = StreamServer::new(settings(5));
    let err = server
        .start(|| Box::new(BrokenCamera) as Box<dyn CaptureSource>)
        .unwrap_err();
    assert!(err.to_string().contains("no such device"), "{}", err);
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn bind_failure_releases_the_opened_source() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut settings = settings(5);
    settings.connection.port = taken.local_addr().unwrap().port();
    let mut server = StreamServer::new(settings);

    let released = Arc::new(AtomicBool::new(false));
    let flag = released.clone();
    let err = server
        .start(move || {
            Box::new(ReleaseTracker {
                inner: TestPattern::new(1, (16, 16)),
                released: flag,
            }) as Box<dyn CaptureSource>
        })
        .unwrap_err();
    assert!(err.to_string().contains("Failed to listen"), "{}", err);
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
}

#[test]
fn clients_beyond_the_limit_are_refused() {
    let (mut server, port) = start(1);
    let (mut first, _first_events) = CameraClient::new(client_config());
    first.connect("127.0.0.1", port).unwrap();
    assert!(wait_until(Duration::from_secs(1), || server.client_count() == 1));

    let (mut second, _second_events) = CameraClient::new(client_config());
    let err = second.connect("127.0.0.1", port).unwrap_err();
    assert!(matches!(err, ClientError::Handshake(_)), "{}", err);
    assert!(!second.is_connected());

    first.disconnect();
    server.stop();
}

#[test]
fn stopping_the_server_disconnects_clients() {
    let (mut server, port) = start(5);
    let (mut client, events) = CameraClient::new(client_config());
    client.connect("127.0.0.1", port).unwrap();

    server.stop();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(Event::Disconnected { .. }) => break,
            Ok(_) => continue,
            Err(e) => panic!("client was not disconnected: {}", e),
        }
    }
    assert!(!client.is_connected());
}

#[test]
fn shutdown_handle_stops_from_another_thread() {
    let (mut server, port) = start(5);
    let handle = server.shutdown_handle();
    thread::spawn(move || handle.shutdown()).join().unwrap();
    assert!(wait_until(Duration::from_secs(1), || server.state()
        == ServerState::Stopped));

    let (mut client, _events) = CameraClient::new(client_config());
    assert!(client.connect("127.0.0.1", port).is_err());

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn failing_captures_only_cost_their_frames() {
    let settings = settings(5);
    let mut server = StreamServer::new(settings);
    let port = server
        .start(|| {
            Box::new(FlakyCameras {
                inner: TestPattern::new(2, (64, 48)),
                captures: 0,
            }) as Box<dyn CaptureSource>
        })
        .unwrap()
        .port();
    let (mut client, _events) = CameraClient::new(client_config());
    client.connect("127.0.0.1", port).unwrap();

    let healthy = CameraId::Index(0);
    assert!(wait_until(Duration::from_secs(2), || client
        .camera_stats(&healthy)
        .map_or(false, |stats| stats.frames_received >= 3)));
    assert!(client.camera_stats(&CameraId::Index(1)).is_none());
    assert!(client.is_connected());
    assert_eq!(server.state(), ServerState::Serving);

    client.disconnect();
    server.stop();
}

#[test]
fn server_restarts_after_a_handle_shutdown() {
    let (mut server, _port) = start(5);
    server.shutdown_handle().shutdown();
    assert!(wait_until(Duration::from_secs(1), || server.state()
        == ServerState::Stopped));

    let port = server.start(|| pattern(1, (16, 16))).unwrap().port();
    let (mut client, _events) = CameraClient::new(client_config());
    assert_eq!(
        client.connect("127.0.0.1", port).unwrap(),
        vec![CameraId::Index(0)]
    );

    client.disconnect();
    server.stop();
}

use common::messages::Message;
use common::settings;
use common::types::{CameraId, ServerInfo};
use common::ProtocolError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use stoppable_thread::{self as st_thread, StoppableHandle};

use crate::conn::{lock, Shared};
use crate::error::ClientError;
use crate::events::{self, Event, Events, Publisher};
use crate::stats::CameraStats;
use crate::supervisor;
use crate::video::{decode_jpeg, VideoFrame};

/// A client of one camera server.
///
/// `connect` performs the handshake on the caller's thread and starts the
/// polling thread; frames, statistics and connection changes arrive on the
/// `Events` returned by `new`.
pub struct CameraClient {
    shared: Arc<Shared>,
    events: Publisher,
    worker: Option<StoppableHandle<()>>,
    polling: Arc<AtomicBool>,
}

impl CameraClient {
    pub fn new(config: settings::Client) -> (Self, Events) {
        let (events, receiver) = events::queue();
        let client = CameraClient {
            shared: Arc::new(Shared::new(config)),
            events,
            worker: None,
            polling: Arc::new(AtomicBool::new(false)),
        };
        (client, receiver)
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<Vec<CameraId>, ClientError> {
        if self.shared.is_connected() {
            let addr = match self.shared.target() {
                Some((host, port)) => format!("{}:{}", host, port),
                None => format!("{}:{}", host, port),
            };
            return Err(ClientError::AlreadyConnected(addr));
        }
        self.stop_worker();

        let handshake = self.shared.handshake(host, port, || false)?;
        self.events.publish(Event::Connected {
            host: host.to_string(),
            port,
            cameras: handshake.cameras.clone(),
            server_info: handshake.server_info.clone(),
        });

        let cameras = handshake.cameras.clone();
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let polling = self.polling.clone();
        polling.store(true, Ordering::SeqCst);
        self.worker = Some(st_thread::spawn(move |stopped| {
            supervisor::run(shared, events, stopped, handshake);
            polling.store(false, Ordering::SeqCst);
        }));
        Ok(cameras)
    }

    /// Connect again to the last target.
    pub fn reconnect(&mut self) -> Result<Vec<CameraId>, ClientError> {
        match self.shared.target() {
            Some((host, port)) => self.connect(&host, port),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Stop polling, close the socket and drop all statistics.
    pub fn disconnect(&mut self) {
        let was_connected = self.shared.is_connected();
        let stopping = self.worker.take().map(|worker| worker.stop());
        self.shared.close();

        let was_running = stopping.is_some();
        if let Some(handle) = stopping {
            if handle.join().is_err() {
                error!("Frame receiver thread panicked");
            }
        }
        self.shared.forget_session();

        if was_connected || was_running {
            info!("Disconnected");
            self.events.publish(Event::Disconnected {
                reason: "disconnected by caller".to_string(),
            });
        }
    }

    /// Ad-hoc frame request, serialized with the polling thread on the same
    /// socket. `Ok(None)` means the server had nothing new for `camera`.
    pub fn request_frame(&self, camera: &CameraId) -> Result<Option<VideoFrame>, ClientError> {
        if !self.cameras().contains(camera) {
            return Err(ClientError::UnknownCamera(camera.clone()));
        }

        let packet = self.shared.exchange(camera)?;
        match packet.message {
            Message::Frame { .. } => {
                let data = packet.payload.unwrap_or_default();
                let frame = match decode_jpeg(&data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        lock(&self.shared.stats).record_error(camera);
                        return Err(e.into());
                    }
                };
                lock(&self.shared.stats).record_frame(camera, Instant::now());
                Ok(Some(VideoFrame {
                    camera: camera.clone(),
                    frame,
                    received_at: chrono::Local::now(),
                }))
            }
            Message::NoFrame { .. } => Ok(None),
            Message::Error { message } => {
                lock(&self.shared.stats).record_error(camera);
                Err(ClientError::Server(message))
            }
            other => {
                self.shared.close();
                Err(ProtocolError::Unexpected(other.kind().to_string()).into())
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Whether the polling thread is still running. It keeps running through
    /// an automatic reconnect and exits once the client gives up.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    /// Cameras advertised by the current session.
    pub fn cameras(&self) -> Vec<CameraId> {
        self.shared
            .session()
            .map(|session| session.cameras)
            .unwrap_or_default()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.session().map(|session| session.server_info)
    }

    pub fn stats(&self) -> HashMap<CameraId, CameraStats> {
        lock(&self.shared.stats).snapshot()
    }

    pub fn camera_stats(&self, camera: &CameraId) -> Option<CameraStats> {
        lock(&self.shared.stats).get(camera).cloned()
    }

    pub fn error_count(&self, camera: &CameraId) -> u64 {
        lock(&self.shared.stats).error_count(camera)
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.stop().join().is_err() {
                error!("Frame receiver thread panicked");
            }
        }
    }
}

impl Drop for CameraClient {
    fn drop(&mut self) {
        if self.worker.is_some() || self.shared.is_connected() {
            self.disconnect();
        }
    }
}

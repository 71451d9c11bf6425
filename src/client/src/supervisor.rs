use chrono::Local;
use common::messages::{Message, Packet};
use common::types::CameraId;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stoppable_thread::SimpleAtomicBool;

use crate::conn::{lock, Handshake, Shared};
use crate::events::{Event, Publisher};
use crate::scheduler::RoundRobin;
use crate::video::{decode_jpeg, VideoFrame};

/// Upper bound of one idle sleep when no camera is due.
const MAX_IDLE: Duration = Duration::from_millis(5);

enum Exit {
    Stopped,
    Failed(String),
}

/// Body of the polling thread: poll until stopped, and after a connection
/// failure try exactly one fresh handshake before giving up.
pub(crate) fn run(
    shared: Arc<Shared>,
    events: Publisher,
    stopped: &SimpleAtomicBool,
    mut session: Handshake,
) {
    info!("Frame receiver started for cameras {:?}", session.cameras);
    loop {
        let reason = match poll(&shared, &events, stopped, &session) {
            Exit::Stopped => break,
            Exit::Failed(reason) => reason,
        };
        if stopped.get() {
            break;
        }

        lock(&shared.stats).mark_connection_lost();
        events.publish(Event::ConnectionLost {
            reason: reason.clone(),
        });
        if !shared.config.auto_reconnect {
            events.publish(Event::Disconnected { reason });
            break;
        }

        let (host, port) = match shared.target() {
            Some(target) => target,
            None => break,
        };
        info!("Connection lost ({}), reconnecting to {}:{}...", reason, host, port);
        match shared.handshake(&host, port, || stopped.get()) {
            Ok(handshake) => {
                events.publish(Event::Connected {
                    host,
                    port,
                    cameras: handshake.cameras.clone(),
                    server_info: handshake.server_info.clone(),
                });
                session = handshake;
            }
            Err(_) if stopped.get() => break,
            Err(e) => {
                error!("Reconnection failed: {}", e);
                events.publish(Event::Disconnected {
                    reason: format!("{}; reconnection failed: {}", reason, e),
                });
                break;
            }
        }
    }
    info!("Frame receiver stopped");
}

fn poll(
    shared: &Shared,
    events: &Publisher,
    stopped: &SimpleAtomicBool,
    session: &Handshake,
) -> Exit {
    let interval = session.server_info.poll_interval(shared.config.oversampling);
    let mut scheduler = RoundRobin::new(session.cameras.clone(), interval);
    let mut idle_ticks = 0;
    debug!("Polling every camera at most once per {:?}", interval);

    while !stopped.get() {
        if !shared.is_connected() {
            return Exit::Failed("connection closed".to_string());
        }

        let now = Instant::now();
        let tick = match scheduler.tick(now) {
            Some(tick) => tick,
            None => {
                thread::sleep(MAX_IDLE);
                continue;
            }
        };
        if !tick.due {
            idle_ticks += 1;
            if idle_ticks >= scheduler.cameras().len() {
                thread::sleep(scheduler.until_next_due(now).min(MAX_IDLE));
                idle_ticks = 0;
            }
            continue;
        }
        idle_ticks = 0;

        let packet = match shared.exchange(&tick.camera) {
            Ok(packet) => packet,
            Err(_) if stopped.get() => break,
            Err(e) => {
                error!("Frame request for camera {} failed: {}", tick.camera, e);
                return Exit::Failed(e.to_string());
            }
        };
        if let Err(reason) = handle_response(shared, events, &tick.camera, packet) {
            error!("{}", reason);
            shared.close();
            return Exit::Failed(reason);
        }
    }
    Exit::Stopped
}

/// Apply one response. Only a protocol violation is returned as an error;
/// application errors are counted and published.
fn handle_response(
    shared: &Shared,
    events: &Publisher,
    camera: &CameraId,
    packet: Packet,
) -> Result<(), String> {
    match packet.message {
        Message::Frame { .. } => {
            let data = packet.payload.unwrap_or_default();
            match decode_jpeg(&data) {
                Ok(frame) => {
                    let stats = lock(&shared.stats).record_frame(camera, Instant::now());
                    events.publish(Event::Frame(VideoFrame {
                        camera: camera.clone(),
                        frame,
                        received_at: Local::now(),
                    }));
                    events.publish(Event::Stats {
                        camera: camera.clone(),
                        stats,
                    });
                }
                Err(e) => {
                    let errors = lock(&shared.stats).record_error(camera);
                    warn!(
                        "Failed to decode a frame of camera {} ({} bytes): {}",
                        camera,
                        data.len(),
                        e
                    );
                    events.publish(Event::Error {
                        camera: Some(camera.clone()),
                        message: format!(
                            "Failed to decode a frame of camera {} ({} errors): {}",
                            camera, errors, e
                        ),
                    });
                }
            }
        }
        Message::NoFrame { .. } => {}
        Message::Error { message } => {
            lock(&shared.stats).record_error(camera);
            error!("Server error for camera {}: {}", camera, message);
            events.publish(Event::Error {
                camera: Some(camera.clone()),
                message: format!("Server error: {}", message),
            });
        }
        other => {
            return Err(format!(
                "Unexpected {} response to a frame request",
                other.kind()
            ))
        }
    }
    Ok(())
}

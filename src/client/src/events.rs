use common::types::{CameraId, ServerInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::stats::CameraStats;
use crate::video::VideoFrame;

/// Frame and stats events allowed to wait in the queue at once. Further ones
/// are dropped until the receiver catches up.
pub const MAX_QUEUED_SAMPLES: usize = 16;

/// Everything the client reports to the presentation layer.
#[derive(Clone, Debug)]
pub enum Event {
    Connected {
        host: String,
        port: u16,
        cameras: Vec<CameraId>,
        server_info: ServerInfo,
    },
    Frame(VideoFrame),
    Stats {
        camera: CameraId,
        stats: CameraStats,
    },
    /// Non-fatal problem: server `error` reply or an undecodable image.
    Error {
        camera: Option<CameraId>,
        message: String,
    },
    /// The socket failed; the supervisor decides what happens next.
    ConnectionLost { reason: String },
    Disconnected { reason: String },
}

impl Event {
    /// Periodic data that a newer event replaces. Everything else is a state
    /// change and is never dropped.
    fn is_sample(&self) -> bool {
        matches!(self, Event::Frame(_) | Event::Stats { .. })
    }
}

pub(crate) fn queue() -> (Publisher, Events) {
    let (sender, receiver) = channel();
    let queued = Arc::new(AtomicUsize::new(0));
    (
        Publisher {
            sender,
            queued: queued.clone(),
        },
        Events { receiver, queued },
    )
}

/// Sending side, shared by the caller's thread and the polling thread.
#[derive(Clone)]
pub(crate) struct Publisher {
    sender: Sender<Event>,
    queued: Arc<AtomicUsize>,
}

impl Publisher {
    pub fn publish(&self, event: Event) {
        let sample = event.is_sample();
        if sample && self.queued.fetch_add(1, Ordering::SeqCst) >= MAX_QUEUED_SAMPLES {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        if self.sender.send(event).is_err() {
            if sample {
                self.queued.fetch_sub(1, Ordering::SeqCst);
            }
            debug!("Event receiver is gone, dropping event");
        }
    }
}

/// Receiving side handed to the presentation layer.
pub struct Events {
    receiver: Receiver<Event>,
    queued: Arc<AtomicUsize>,
}

impl Events {
    pub fn recv(&self) -> Result<Event, RecvError> {
        self.receiver.recv().map(|event| self.taken(event))
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        self.receiver
            .recv_timeout(timeout)
            .map(|event| self.taken(event))
    }

    pub fn try_recv(&self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv().map(|event| self.taken(event))
    }

    fn taken(&self, event: Event) -> Event {
        if event.is_sample() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use image::RgbImage;

    fn frame() -> Event {
        Event::Frame(VideoFrame {
            camera: CameraId::Index(0),
            frame: RgbImage::new(2, 2),
            received_at: Local::now(),
        })
    }

    fn drain(events: &Events) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[test]
    fn frames_beyond_the_limit_are_dropped() {
        let (publisher, events) = queue();
        for _ in 0..MAX_QUEUED_SAMPLES * 3 {
            publisher.publish(frame());
        }
        publisher.publish(Event::Disconnected {
            reason: "bye".to_string(),
        });

        let drained = drain(&events);
        let frames = drained.iter().filter(|e| matches!(e, Event::Frame(_))).count();
        assert_eq!(frames, MAX_QUEUED_SAMPLES);
        assert!(matches!(drained.last(), Some(Event::Disconnected { .. })));
    }

    #[test]
    fn reading_frees_room_for_new_frames() {
        let (publisher, events) = queue();
        for _ in 0..MAX_QUEUED_SAMPLES {
            publisher.publish(frame());
        }
        assert!(events.try_recv().is_ok());
        publisher.publish(frame());
        publisher.publish(frame());
        assert_eq!(drain(&events).len(), MAX_QUEUED_SAMPLES);
    }

    #[test]
    fn control_events_are_never_dropped() {
        let (publisher, events) = queue();
        for _ in 0..MAX_QUEUED_SAMPLES {
            publisher.publish(frame());
        }
        for _ in 0..MAX_QUEUED_SAMPLES * 2 {
            publisher.publish(Event::Error {
                camera: None,
                message: "busy".to_string(),
            });
        }
        assert_eq!(drain(&events).len(), MAX_QUEUED_SAMPLES * 3);
    }
}

use chrono::{DateTime, Local};
use common::types::CameraId;
use std::collections::HashMap;
use std::time::Instant;

/// Frames between two fps recomputations.
pub const FPS_WINDOW: u32 = 5;

#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_received: u64,
    pub fps: f64,
    pub errors: u64,
    pub last_frame_at: DateTime<Local>,
    pub connection_lost: bool,
    window_started: Instant,
    window_frames: u32,
}

impl CameraStats {
    fn new(now: Instant, errors: u64) -> Self {
        CameraStats {
            frames_received: 0,
            fps: 0.0,
            errors,
            last_frame_at: Local::now(),
            connection_lost: false,
            window_started: now,
            window_frames: 0,
        }
    }

    fn record_frame(&mut self, now: Instant) {
        self.frames_received += 1;
        self.window_frames += 1;
        self.last_frame_at = Local::now();
        self.connection_lost = false;

        if self.window_frames >= FPS_WINDOW {
            let elapsed = now.saturating_duration_since(self.window_started).as_secs_f64();
            if elapsed > 0.0 {
                self.fps = self.window_frames as f64 / elapsed;
            }
            self.window_started = now;
            self.window_frames = 0;
        }
    }
}

/// Per-camera statistics of one connection.
///
/// A record appears with the first decoded frame. Errors seen before that are
/// kept aside and folded into the record when it is created.
#[derive(Default)]
pub struct StatsBook {
    cameras: HashMap<CameraId, CameraStats>,
    pending_errors: HashMap<CameraId, u64>,
}

impl StatsBook {
    pub fn record_frame(&mut self, camera: &CameraId, now: Instant) -> CameraStats {
        let pending = &mut self.pending_errors;
        let stats = self
            .cameras
            .entry(camera.clone())
            .or_insert_with(|| CameraStats::new(now, pending.remove(camera).unwrap_or(0)));
        stats.record_frame(now);
        stats.clone()
    }

    /// Count an application error for `camera` and return its new total.
    pub fn record_error(&mut self, camera: &CameraId) -> u64 {
        match self.cameras.get_mut(camera) {
            Some(stats) => {
                stats.errors += 1;
                stats.errors
            }
            None => {
                let errors = self.pending_errors.entry(camera.clone()).or_insert(0);
                *errors += 1;
                *errors
            }
        }
    }

    pub fn error_count(&self, camera: &CameraId) -> u64 {
        match self.cameras.get(camera) {
            Some(stats) => stats.errors,
            None => self.pending_errors.get(camera).copied().unwrap_or(0),
        }
    }

    pub fn get(&self, camera: &CameraId) -> Option<&CameraStats> {
        self.cameras.get(camera)
    }

    pub fn snapshot(&self) -> HashMap<CameraId, CameraStats> {
        self.cameras.clone()
    }

    pub fn mark_connection_lost(&mut self) {
        for stats in self.cameras.values_mut() {
            stats.connection_lost = true;
        }
    }

    pub fn clear(&mut self) {
        self.cameras.clear();
        self.pending_errors.clear();
    }
}

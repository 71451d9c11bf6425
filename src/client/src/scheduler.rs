use common::types::CameraId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of one scheduling step.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub camera: CameraId,
    /// The camera is due and a request should go out now.
    pub due: bool,
}

/// Round-robin over the advertised cameras.
///
/// The cursor moves on every tick whether or not the selected camera is due,
/// so a camera polled recently never holds up the others.
pub struct RoundRobin {
    cameras: Vec<CameraId>,
    cursor: usize,
    interval: Duration,
    last_request: HashMap<CameraId, Instant>,
}

impl RoundRobin {
    pub fn new(cameras: Vec<CameraId>, interval: Duration) -> Self {
        RoundRobin {
            cameras,
            cursor: 0,
            interval,
            last_request: HashMap::new(),
        }
    }

    /// Select the next camera. A due camera is stamped with `now` as its last
    /// request time. Returns `None` only for an empty camera list.
    pub fn tick(&mut self, now: Instant) -> Option<Tick> {
        if self.cameras.is_empty() {
            return None;
        }
        let camera = self.cameras[self.cursor % self.cameras.len()].clone();
        self.cursor = (self.cursor + 1) % self.cameras.len();

        let due = match self.last_request.get(&camera) {
            Some(last) => now.saturating_duration_since(*last) >= self.interval,
            None => true,
        };
        if due {
            self.last_request.insert(camera.clone(), now);
        }
        Some(Tick { camera, due })
    }

    /// Time until the soonest camera becomes due.
    pub fn until_next_due(&self, now: Instant) -> Duration {
        self.cameras
            .iter()
            .map(|camera| match self.last_request.get(camera) {
                Some(last) => self
                    .interval
                    .saturating_sub(now.saturating_duration_since(*last)),
                None => Duration::from_secs(0),
            })
            .min()
            .unwrap_or(self.interval)
    }

    pub fn last_request(&self, camera: &CameraId) -> Option<Instant> {
        self.last_request.get(camera).copied()
    }

    pub fn cameras(&self) -> &[CameraId] {
        &self.cameras
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn cameras(n: u32) -> Vec<CameraId> {
        (0..n).map(CameraId::Index).collect()
    }

    #[test]
    fn every_window_of_n_ticks_visits_every_camera() {
        for n in 1..=6 {
            let mut scheduler = RoundRobin::new(cameras(n), Duration::from_millis(10));
            let start = Instant::now();
            let ticks: Vec<Tick> = (0..(n * 4))
                .map(|i| {
                    scheduler
                        .tick(start + Duration::from_millis(i as u64 * 3))
                        .unwrap()
                })
                .collect();

            for window in ticks.windows(n as usize) {
                let seen: HashSet<&CameraId> = window.iter().map(|t| &t.camera).collect();
                assert_eq!(seen.len(), n as usize, "window {:?}", window);
            }
        }
    }

    #[test]
    fn first_visit_is_always_due() {
        let mut scheduler = RoundRobin::new(cameras(3), Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(scheduler.tick(now).unwrap().due);
        }
    }

    #[test]
    fn camera_is_skipped_until_interval_elapses() {
        let interval = Duration::from_millis(10);
        let mut scheduler = RoundRobin::new(cameras(1), interval);
        let start = Instant::now();

        assert!(scheduler.tick(start).unwrap().due);
        assert!(!scheduler.tick(start + Duration::from_millis(4)).unwrap().due);
        assert_eq!(scheduler.last_request(&CameraId::Index(0)), Some(start));
        assert!(scheduler.tick(start + interval).unwrap().due);
        assert_eq!(
            scheduler.last_request(&CameraId::Index(0)),
            Some(start + interval)
        );
    }

    #[test]
    fn skipped_camera_does_not_stall_rotation() {
        let interval = Duration::from_millis(10);
        let mut scheduler = RoundRobin::new(cameras(2), interval);
        let start = Instant::now();
        scheduler.tick(start).unwrap();

        let next = scheduler.tick(start + Duration::from_millis(1)).unwrap();
        assert_eq!(next.camera, CameraId::Index(1));
        assert!(next.due);

        let back = scheduler.tick(start + Duration::from_millis(2)).unwrap();
        assert_eq!(back.camera, CameraId::Index(0));
        assert!(!back.due);
    }

    #[test]
    fn empty_list_never_ticks() {
        let mut scheduler = RoundRobin::new(Vec::new(), Duration::from_millis(1));
        assert!(scheduler.tick(Instant::now()).is_none());
        assert_eq!(scheduler.until_next_due(Instant::now()), Duration::from_millis(1));
    }

    #[test]
    fn next_due_reports_remaining_time() {
        let interval = Duration::from_millis(30);
        let mut scheduler = RoundRobin::new(cameras(1), interval);
        let start = Instant::now();
        scheduler.tick(start);
        assert_eq!(
            scheduler.until_next_due(start + Duration::from_millis(10)),
            Duration::from_millis(20)
        );
        assert_eq!(
            scheduler.until_next_due(start + Duration::from_millis(50)),
            Duration::from_secs(0)
        );
    }
}

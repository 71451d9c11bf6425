extern crate rscam;

use common::settings::Video;
use common::types::CameraId;
use simple_error::SimpleError as Error;
use std::io;

use crate::capture::{Capture, CaptureSource};

/// Single MJPG camera. Frames come out of the driver already JPEG encoded.
pub struct V4l2Camera {
    id: CameraId,
    device: String,
    resolution: (u32, u32),
    fps: u32,
    camera: Option<rscam::Camera>,
}

impl V4l2Camera {
    pub fn new(id: CameraId, device: &str, resolution: (u32, u32), fps: u32) -> Self {
        V4l2Camera {
            id,
            device: device.to_string(),
            resolution,
            fps,
            camera: None,
        }
    }

    fn grab(&mut self) -> Result<Option<Capture>, Error> {
        let camera = match self.camera.as_mut() {
            Some(camera) => camera,
            None => return Err(Error::new(format!("{} is not started", self.device))),
        };
        match camera.capture() {
            Ok(frame) => Ok(Some(Capture::Jpeg(frame.to_vec()))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::new(format!(
                "Unable to take picture from {}: {}",
                self.device, e
            ))),
        }
    }
}

impl CaptureSource for V4l2Camera {
    fn open(&mut self) -> Result<(), Error> {
        let mut camera = rscam::new(self.device.as_str()).map_err(|e| {
            Error::new(format!(
                "Failed to initialize video device {}: {}",
                self.device, e
            ))
        })?;
        camera
            .start(&rscam::Config {
                interval: (1, self.fps),
                resolution: self.resolution,
                format: b"MJPG",
                nbuffers: 32,
                field: rscam::FIELD_NONE,
            })
            .map_err(|e| Error::new(format!("Failed to start {}: {}", self.device, e)))?;
        info!(
            "Camera {} started: {}x{}@{}fps",
            self.device, self.resolution.0, self.resolution.1, self.fps
        );
        self.camera = Some(camera);
        Ok(())
    }

    fn cameras(&self) -> Vec<CameraId> {
        vec![self.id.clone()]
    }

    fn capture(&mut self, camera: &CameraId) -> Result<Option<Capture>, Error> {
        if *camera != self.id {
            return Err(Error::new(format!("unknown camera {}", camera)));
        }
        self.grab()
    }

    fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop() {
                warn!("Failed to stop {}: {}", self.device, e);
            }
        }
    }
}

/// Stereo board: two sensors advertised as `"left"` and `"right"`.
pub struct StereoCamera {
    left: V4l2Camera,
    right: V4l2Camera,
}

impl StereoCamera {
    pub fn new(video: &Video) -> Self {
        StereoCamera {
            left: V4l2Camera::new(
                CameraId::from("left"),
                &video.device,
                video.resolution,
                video.fps,
            ),
            right: V4l2Camera::new(
                CameraId::from("right"),
                &video.right_device,
                video.resolution,
                video.fps,
            ),
        }
    }
}

impl CaptureSource for StereoCamera {
    fn open(&mut self) -> Result<(), Error> {
        self.left.open()?;
        if let Err(e) = self.right.open() {
            self.left.release();
            return Err(e);
        }
        Ok(())
    }

    fn cameras(&self) -> Vec<CameraId> {
        vec![self.left.id.clone(), self.right.id.clone()]
    }

    fn capture(&mut self, camera: &CameraId) -> Result<Option<Capture>, Error> {
        if *camera == self.left.id {
            self.left.grab()
        } else if *camera == self.right.id {
            self.right.grab()
        } else {
            Err(Error::new(format!("unknown camera {}", camera)))
        }
    }

    fn release(&mut self) {
        self.left.release();
        self.right.release();
    }
}

use common::settings::{SourceKind, Video};
use common::types::CameraId;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};
use rand::Rng;
use simple_error::SimpleError as Error;

/// One image as produced by a capture source.
pub enum Capture {
    /// Raw pixels that still need JPEG encoding.
    Raw(RgbImage),
    /// Bytes that are JPEG already (MJPG devices).
    Jpeg(Vec<u8>),
}

impl Capture {
    pub fn into_jpeg(self, quality: u8) -> Result<Vec<u8>, Error> {
        match self {
            Capture::Jpeg(data) => Ok(data),
            Capture::Raw(img) => encode_jpeg(&img, quality),
        }
    }
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, Error> {
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality.max(1).min(100))
        .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
        .map_err(|e| Error::new(format!("Failed to encode a frame: {}", e)))?;
    Ok(data)
}

/// Device-specific origin of images.
///
/// A source is built, opened and used on the capture thread only, so device
/// handles need not be `Send`. An `open` error aborts the server start;
/// `capture` errors only cost the current frame.
pub trait CaptureSource {
    fn open(&mut self) -> Result<(), Error>;

    fn cameras(&self) -> Vec<CameraId>;

    /// Grab the next image of `camera`. `Ok(None)` means the device had
    /// nothing new.
    fn capture(&mut self, camera: &CameraId) -> Result<Option<Capture>, Error>;

    fn release(&mut self);
}

/// Builds a source on the capture thread.
pub type SourceFactory = Box<dyn FnOnce() -> Box<dyn CaptureSource> + Send>;

/// Factory for the source configured in `[video]`.
pub fn from_settings(video: &Video) -> Result<SourceFactory, Error> {
    let video = video.clone();
    match video.source {
        SourceKind::TestPattern => Ok(Box::new(move || {
            Box::new(TestPattern::new(video.cameras, video.resolution)) as Box<dyn CaptureSource>
        })),
        #[cfg(all(feature = "v4l", target_os = "linux"))]
        SourceKind::Camera => Ok(Box::new(move || {
            Box::new(crate::v4l::V4l2Camera::new(
                CameraId::Index(0),
                &video.device,
                video.resolution,
                video.fps,
            )) as Box<dyn CaptureSource>
        })),
        #[cfg(all(feature = "v4l", target_os = "linux"))]
        SourceKind::Stereo => Ok(Box::new(move || {
            Box::new(crate::v4l::StereoCamera::new(&video)) as Box<dyn CaptureSource>
        })),
        #[cfg(not(all(feature = "v4l", target_os = "linux")))]
        kind => Err(Error::new(format!(
            "{:?} source requires the `v4l` feature on Linux",
            kind
        ))),
    }
}

/// Synthetic cameras drawing a scrolling gradient, one hue per camera.
pub struct TestPattern {
    cameras: u32,
    resolution: (u32, u32),
    hues: Vec<u8>,
    ticks: Vec<u32>,
    opened: bool,
}

impl TestPattern {
    pub fn new(cameras: u32, resolution: (u32, u32)) -> Self {
        TestPattern {
            cameras,
            resolution,
            hues: Vec::new(),
            ticks: Vec::new(),
            opened: false,
        }
    }
}

impl CaptureSource for TestPattern {
    fn open(&mut self) -> Result<(), Error> {
        if self.cameras == 0 {
            return Err(Error::new("test pattern needs at least one camera"));
        }
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err(Error::new("test pattern resolution must not be empty"));
        }
        let mut rng = rand::thread_rng();
        self.hues = (0..self.cameras).map(|_| rng.gen()).collect();
        self.ticks = vec![0; self.cameras as usize];
        self.opened = true;
        info!(
            "Test pattern started: {} camera(s) at {}x{}",
            self.cameras, self.resolution.0, self.resolution.1
        );
        Ok(())
    }

    fn cameras(&self) -> Vec<CameraId> {
        (0..self.cameras).map(CameraId::Index).collect()
    }

    fn capture(&mut self, camera: &CameraId) -> Result<Option<Capture>, Error> {
        if !self.opened {
            return Err(Error::new("test pattern is not opened"));
        }
        let index = match camera {
            CameraId::Index(index) if *index < self.cameras => *index as usize,
            _ => return Err(Error::new(format!("unknown camera {}", camera))),
        };

        let tick = self.ticks[index];
        self.ticks[index] = tick.wrapping_add(1);
        let hue = self.hues[index];
        let (width, height) = self.resolution;
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x.wrapping_add(tick) % 256) as u8,
                (y % 256) as u8,
                hue,
            ])
        });
        Ok(Some(Capture::Raw(img)))
    }

    fn release(&mut self) {
        self.opened = false;
        debug!("Test pattern released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_lists_numbered_cameras() {
        let source = TestPattern::new(2, (8, 8));
        assert_eq!(source.cameras(), vec![CameraId::Index(0), CameraId::Index(1)]);
    }

    #[test]
    fn test_pattern_requires_open() {
        let mut source = TestPattern::new(1, (8, 8));
        assert!(source.capture(&CameraId::Index(0)).is_err());
        source.open().unwrap();
        assert!(source.capture(&CameraId::Index(0)).unwrap().is_some());
        source.release();
        assert!(source.capture(&CameraId::Index(0)).is_err());
    }

    #[test]
    fn test_pattern_rejects_unknown_camera() {
        let mut source = TestPattern::new(1, (8, 8));
        source.open().unwrap();
        assert!(source.capture(&CameraId::Index(1)).is_err());
        assert!(source.capture(&CameraId::from("left")).is_err());
    }

    #[test]
    fn raw_captures_encode_to_jpeg() {
        let mut source = TestPattern::new(1, (16, 12));
        source.open().unwrap();
        let jpeg = source
            .capture(&CameraId::Index(0))
            .unwrap()
            .unwrap()
            .into_jpeg(80)
            .unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
    }

    #[test]
    fn jpeg_captures_pass_through() {
        let data = vec![0xff, 0xd8, 0x00, 0xff, 0xd9];
        assert_eq!(Capture::Jpeg(data.clone()).into_jpeg(10).unwrap(), data);
    }

    #[test]
    fn zero_cameras_fail_to_open() {
        assert!(TestPattern::new(0, (8, 8)).open().is_err());
    }
}

use chrono::{DateTime, Local};
use common::types::CameraId;
use image::{ImageFormat, RgbImage};

/// A decoded frame ready for presentation.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub camera: CameraId,
    pub frame: RgbImage,
    pub received_at: DateTime<Local>,
}

pub fn decode_jpeg(data: &[u8]) -> Result<RgbImage, image::ImageError> {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg).map(|img| img.to_rgb8())
}

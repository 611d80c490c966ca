use std::io::Cursor;

use image::imageops::FilterType;
use image::io::{Limits, Reader as ImageReader};
use image::{DynamicImage, ImageResult, Rgb, RgbImage};
use ndarray::{Array3, Array4, ArrayView4};
use thiserror::Error;

/// Spatial resolution the classifier was trained on.
pub const IMG_SIZE: u32 = 224;

/// Largest width or height accepted from an upload.
pub const MAX_IMAGE_DIMENSION: u32 = 8192;
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Error processing image: {0}")]
    Decode(String),

    #[error("Error processing image: unsupported channel count {0}")]
    Channels(usize),

    #[error("Error processing image: {0}")]
    Shape(String),
}

/// Decoded image laid out as height x width x channel.
pub type PixelArray = Array3<u8>;

/// Batched NHWC input of shape (1, 224, 224, 3) with values in [0, 1].
#[derive(Debug, Clone)]
pub struct PreparedTensor(Array4<f32>);

impl PreparedTensor {
    pub const SHAPE: [usize; 4] = [1, IMG_SIZE as usize, IMG_SIZE as usize, 3];

    /// Wraps an arbitrary array. The shape is checked by the model at
    /// prediction time, not here.
    pub fn from_array(array: Array4<f32>) -> Self {
        PreparedTensor(array)
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn has_model_shape(&self) -> bool {
        self.shape() == Self::SHAPE
    }
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}

fn open(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(decode_limits());
    reader.decode()
}

/// Fully decodes `bytes` under the upload limits. The decoded image is
/// handed back so callers do not decode twice.
pub fn open_image(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    open(bytes).map_err(|e| ImageError::Decode(e.to_string()))
}

/// Returns whether `bytes` decode as a well-formed image.
pub fn validate_image(bytes: &[u8]) -> bool {
    match open_image(bytes) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("image validation failed: {}", e);
            false
        }
    }
}

fn into_pixels(image: DynamicImage) -> Result<PixelArray, ImageError> {
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Array3::from_shape_vec((height as usize, width as usize, 3), rgb.into_raw())
        .map_err(|e| ImageError::Shape(e.to_string()))
}

/// Decodes `bytes` into an RGB pixel array, dropping alpha and expanding
/// grayscale.
pub fn decode_image(bytes: &[u8]) -> Result<PixelArray, ImageError> {
    into_pixels(open_image(bytes)?)
}

/// Normalizes a 1, 3 or 4 channel pixel array into the model input.
pub fn prepare_pixels(pixels: &PixelArray) -> Result<PreparedTensor, ImageError> {
    let (height, width, channels) = pixels.dim();
    if height == 0 || width == 0 {
        return Err(ImageError::Shape(format!(
            "empty image ({}x{})",
            width, height
        )));
    }
    if !matches!(channels, 1 | 3 | 4) {
        return Err(ImageError::Channels(channels));
    }

    let rgb = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (row, col) = (y as usize, x as usize);
        if channels == 1 {
            let v = pixels[[row, col, 0]];
            Rgb([v, v, v])
        } else {
            Rgb([
                pixels[[row, col, 0]],
                pixels[[row, col, 1]],
                pixels[[row, col, 2]],
            ])
        }
    });

    // No aspect preservation: the image is stretched to the model resolution.
    let resized = image::imageops::resize(&rgb, IMG_SIZE, IMG_SIZE, FilterType::Triangle);

    let tensor = Array4::from_shape_fn(PreparedTensor::SHAPE, |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    Ok(PreparedTensor(tensor))
}

/// Preprocesses an image already decoded by [`open_image`].
pub fn prepare_decoded(image: DynamicImage) -> Result<PreparedTensor, ImageError> {
    prepare_pixels(&into_pixels(image)?)
}

pub fn prepare_image(bytes: &[u8]) -> Result<PreparedTensor, ImageError> {
    prepare_decoded(open_image(bytes)?)
}

//! Raster image → packed ink planes.
//!
//! The panel expects one bit per pixel, MSB first, row-major in the panel's own frame.
//! Plane 0 carries luminance (bit set = white), plane 1 carries red/yellow ink on
//! three-colour panels. Geometry quirks (TFT half-width frame, rotation, mirroring)
//! are applied to the canvas before traversal so both planes always agree.

use crate::constants::DEFAULT_THRESHOLD;
use crate::error::GiciskyError;
use crate::registry::{DeviceDescriptor, Rotation};
use bytes::{Bytes, BytesMut};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Per-channel cut-off values used when thresholding the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Pixels brighter than this are white
    pub black: u8,
    /// Pixels with red above and green below this are red
    pub red: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            black: DEFAULT_THRESHOLD,
            red: DEFAULT_THRESHOLD,
        }
    }
}

/// One full-panel bitmap of single-bit pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelPlane {
    bytes: Vec<u8>,
    pixels: usize,
}

impl PixelPlane {
    /// Pack a sequence of pixel bits, MSB first, zero-padding the last byte
    pub fn pack(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut writer = PlaneWriter::default();
        for bit in bits {
            writer.push(bit);
        }
        writer.finish()
    }

    /// Bit for the pixel at traversal position `index`
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.pixels {
            return None;
        }
        let byte = self.bytes[index / 8];
        Some(byte & (0x80 >> (index % 8)) != 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Packed length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels
    }
}

#[derive(Debug, Default)]
struct PlaneWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
    pixels: usize,
}

impl PlaneWriter {
    fn with_capacity(pixels: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(pixels.div_ceil(8)),
            ..Self::default()
        }
    }

    fn push(&mut self, bit: bool) {
        if bit {
            self.current |= 0x80 >> self.filled;
        }
        self.filled += 1;
        self.pixels += 1;
        if self.filled == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    fn finish(mut self) -> PixelPlane {
        if self.filled > 0 {
            self.bytes.push(self.current);
        }
        PixelPlane {
            bytes: self.bytes,
            pixels: self.pixels,
        }
    }
}

/// Codec output: the planes plus the frame they were traversed in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Frame width after TFT resize and rotation
    pub width: u32,
    /// Frame height after TFT resize and rotation
    pub height: u32,
    pub planes: Vec<PixelPlane>,
}

impl EncodedImage {
    /// Concatenated plane data in transmission order (plane 0, then plane 1)
    pub fn to_payload(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(self.payload_len());
        for plane in &self.planes {
            payload.extend_from_slice(plane.as_bytes());
        }
        payload.freeze()
    }

    pub fn payload_len(&self) -> usize {
        self.planes.iter().map(PixelPlane::len).sum()
    }

    /// Render the planes back into a raster, in the frame the panel receives.
    ///
    /// Red wins over white/black so a preview shows exactly what a three-colour panel
    /// would draw.
    pub fn preview(&self) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for (index, pixel) in out.pixels_mut().enumerate() {
            let white = self.planes.first().and_then(|p| p.get(index)).unwrap_or(false);
            let red = self.planes.get(1).and_then(|p| p.get(index)).unwrap_or(false);
            *pixel = match (red, white) {
                (true, _) => Rgb([255, 0, 0]),
                (false, true) => Rgb([255, 255, 255]),
                (false, false) => Rgb([0, 0, 0]),
            };
        }
        out
    }
}

/// Open any raster format `image` understands
pub fn load_image(path: impl AsRef<Path>) -> Result<DynamicImage, GiciskyError> {
    Ok(image::open(path)?)
}

/// Relative luminance (Rec. 709 weights)
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.2126 * f32::from(r) + 0.7152 * f32::from(g) + 0.0722 * f32::from(b)
}

/// Convert `image` into the packed planes expected by `descriptor`'s panel
pub fn encode(
    image: &DynamicImage,
    descriptor: &DeviceDescriptor,
    thresholds: Thresholds,
) -> Result<EncodedImage, GiciskyError> {
    if descriptor.uses_compression {
        return Err(GiciskyError::UnsupportedFeature("compression"));
    }

    let canvas = prepare_canvas(image, descriptor);
    let (width, height) = canvas.dimensions();
    let pixels = width as usize * height as usize;
    debug!(
        source_width = image.width(),
        source_height = image.height(),
        width,
        height,
        "Encoding image for {}",
        descriptor.model
    );

    let mut black = PlaneWriter::with_capacity(pixels);
    let mut red = descriptor
        .supports_second_plane
        .then(|| PlaneWriter::with_capacity(pixels));

    for row in 0..height {
        let y = if descriptor.mirror_y { height - 1 - row } else { row };
        for col in 0..width {
            let x = if descriptor.mirror_x { width - 1 - col } else { col };
            let Rgba([r, g, b, _]) = *canvas.get_pixel(x, y);
            black.push(luminance(r, g, b) > f32::from(thresholds.black));
            if let Some(red) = red.as_mut() {
                red.push(r > thresholds.red && g < thresholds.red);
            }
        }
    }

    let planes: Vec<PixelPlane> = std::iter::once(black)
        .chain(red)
        .map(PlaneWriter::finish)
        .collect();

    let expected = descriptor.plane_len();
    for (plane, packed) in planes.iter().enumerate() {
        if packed.len() != expected {
            return Err(GiciskyError::InvalidPlaneLength {
                plane,
                expected,
                actual: packed.len(),
            });
        }
    }

    Ok(EncodedImage { width, height, planes })
}

/// Composite onto a white panel-sized canvas, then apply TFT resize and rotation
fn prepare_canvas(image: &DynamicImage, descriptor: &DeviceDescriptor) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(descriptor.width, descriptor.height, Rgba([255, 255, 255, 255]));
    let source = image.to_rgba8();
    // Negative offsets centre-crop sources larger than the panel
    let x = (i64::from(descriptor.width) - i64::from(source.width())) / 2;
    let y = (i64::from(descriptor.height) - i64::from(source.height())) / 2;
    imageops::overlay(&mut canvas, &source, x, y);

    if descriptor.is_tft_panel {
        canvas = imageops::resize(
            &canvas,
            descriptor.width / 2,
            descriptor.height * 2,
            FilterType::CatmullRom,
        );
    }

    match descriptor.rotation {
        Rotation::None => canvas,
        Rotation::Cw90 => imageops::rotate90(&canvas),
        Rotation::Cw180 => imageops::rotate180(&canvas),
        Rotation::Cw270 => imageops::rotate270(&canvas),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    fn descriptor(width: u32, height: u32) -> DeviceDescriptor {
        DeviceDescriptor {
            width,
            height,
            supports_second_plane: false,
            ..*registry::lookup(0x0B).unwrap()
        }
    }

    #[test]
    fn test_pack_msb_first_with_padding() {
        let plane = PixelPlane::pack([true, false, false, false, false, false, false, true, true, true]);
        assert_eq!(plane.as_bytes(), &[0x81, 0xC0]);
        assert_eq!(plane.pixel_count(), 10);
        assert_eq!(plane.get(8), Some(true));
        assert_eq!(plane.get(10), None);
    }

    #[test]
    fn test_mirror_x_reverses_columns() {
        // Left half white, right half black
        let mut img = RgbImage::from_pixel(16, 1, Rgb([0, 0, 0]));
        for x in 0..8 {
            img.put_pixel(x, 0, Rgb([255, 255, 255]));
        }
        let img = DynamicImage::ImageRgb8(img);

        let plain = encode(&img, &descriptor(16, 1), Thresholds::default()).unwrap();
        assert_eq!(plain.planes[0].as_bytes(), &[0xFF, 0x00]);

        let mirrored = DeviceDescriptor {
            mirror_x: true,
            ..descriptor(16, 1)
        };
        let flipped = encode(&img, &mirrored, Thresholds::default()).unwrap();
        assert_eq!(flipped.planes[0].as_bytes(), &[0x00, 0xFF]);
    }

    #[test]
    fn test_mirror_y_reverses_rows() {
        let mut img = RgbImage::from_pixel(8, 2, Rgb([0, 0, 0]));
        for x in 0..8 {
            img.put_pixel(x, 0, Rgb([255, 255, 255]));
        }
        let mirrored = DeviceDescriptor {
            mirror_y: true,
            ..descriptor(8, 2)
        };
        let encoded = encode(&DynamicImage::ImageRgb8(img), &mirrored, Thresholds::default()).unwrap();
        assert_eq!(encoded.planes[0].as_bytes(), &[0x00, 0xFF]);
    }

    #[test]
    fn test_rotation_swaps_frame() {
        let rotated = DeviceDescriptor {
            rotation: Rotation::Cw90,
            ..descriptor(16, 8)
        };
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 8, Rgb([255, 255, 255])));
        let encoded = encode(&img, &rotated, Thresholds::default()).unwrap();
        assert_eq!((encoded.width, encoded.height), (8, 16));
        assert_eq!(encoded.planes[0].len(), 16);
    }

    #[test]
    fn test_tft_frame_is_half_width_double_height() {
        let tft = registry::lookup(0xA0).unwrap();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(250, 132, Rgb([255, 255, 255])));
        let encoded = encode(&img, tft, Thresholds::default()).unwrap();
        assert_eq!((encoded.width, encoded.height), (125, 264));
        assert_eq!(encoded.planes.len(), 1);
        assert_eq!(encoded.planes[0].len(), tft.plane_len());
    }

    #[test]
    fn test_small_image_is_centred_on_white() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 1, Rgb([0, 0, 0])));
        let encoded = encode(&img, &descriptor(24, 1), Thresholds::default()).unwrap();
        assert_eq!(encoded.planes[0].as_bytes(), &[0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn test_compression_is_rejected() {
        let compressed = DeviceDescriptor {
            uses_compression: true,
            ..descriptor(8, 8)
        };
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        assert!(matches!(
            encode(&img, &compressed, Thresholds::default()),
            Err(GiciskyError::UnsupportedFeature("compression"))
        ));
    }

    #[test]
    fn test_preview_colours() {
        let encoded = EncodedImage {
            width: 3,
            height: 1,
            planes: vec![
                PixelPlane::pack([true, false, true]),
                PixelPlane::pack([false, false, true]),
            ],
        };
        let preview = encoded.preview();
        assert_eq!(preview.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(preview.get_pixel(1, 0), &Rgb([0, 0, 0]));
        assert_eq!(preview.get_pixel(2, 0), &Rgb([255, 0, 0]));
    }
}

//! Static table of known Gicisky display models.
//!
//! Every tag advertises a one-byte device-type code (first byte of its manufacturer
//! data). The code selects a [`DeviceDescriptor`] holding the panel geometry and the
//! rendering quirks the image codec has to honour. Unknown codes are an error: the
//! framing rules differ between panels and a guessed default renders garbage.

use crate::error::GiciskyError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

/// Clockwise rotation applied to the canvas before bit packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum Rotation {
    #[default]
    #[strum(to_string = "0°")]
    None = 0,
    #[strum(to_string = "90°")]
    Cw90 = 90,
    #[strum(to_string = "180°")]
    Cw180 = 180,
    #[strum(to_string = "270°")]
    Cw270 = 270,
}

impl Rotation {
    /// Whether the rotation swaps the horizontal and vertical axes
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Physical geometry and rendering quirks of one display model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceDescriptor {
    pub code: u8,
    pub name: &'static str,
    pub model: &'static str,
    pub manufacturer: &'static str,
    pub width: u32,
    pub height: u32,
    /// Panel has a red/yellow ink plane in addition to black/white
    pub supports_second_plane: bool,
    /// TFT panels take a half-width, double-height frame
    pub is_tft_panel: bool,
    pub mirror_x: bool,
    pub mirror_y: bool,
    pub rotation: Rotation,
    pub uses_compression: bool,
    /// Battery voltage reported as 0 %
    pub min_voltage: f32,
    /// Battery voltage reported as 100 %
    pub max_voltage: f32,
}

impl DeviceDescriptor {
    /// Number of ink planes transmitted per image
    pub fn plane_count(&self) -> usize {
        if self.supports_second_plane { 2 } else { 1 }
    }

    /// Packed size of a single plane in bytes
    pub fn plane_len(&self) -> usize {
        (self.width as usize * self.height as usize).div_ceil(8)
    }

    /// Total packed payload size announced to the device
    pub fn payload_len(&self) -> usize {
        self.plane_len() * self.plane_count()
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:02X} {} ({}) {}x{}{}",
            self.code,
            self.name,
            self.model,
            self.width,
            self.height,
            if self.supports_second_plane { " +red" } else { "" }
        )
    }
}

const MANUFACTURER: &str = "Gicisky";
const MIN_VOLTAGE: f32 = 2.2;
const MAX_VOLTAGE: f32 = 2.9;

const fn epd(
    code: u8,
    name: &'static str,
    model: &'static str,
    width: u32,
    height: u32,
    red: bool,
) -> DeviceDescriptor {
    DeviceDescriptor {
        code,
        name,
        model,
        manufacturer: MANUFACTURER,
        width,
        height,
        supports_second_plane: red,
        is_tft_panel: false,
        mirror_x: false,
        mirror_y: false,
        rotation: Rotation::None,
        uses_compression: false,
        min_voltage: MIN_VOLTAGE,
        max_voltage: MAX_VOLTAGE,
    }
}

const fn tft(
    code: u8,
    name: &'static str,
    model: &'static str,
    width: u32,
    height: u32,
    red: bool,
) -> DeviceDescriptor {
    let mut descriptor = epd(code, name, model, width, height, red);
    descriptor.is_tft_panel = true;
    descriptor
}

static DEVICE_TYPES: [DeviceDescriptor; 14] = [
    tft(0xA0, "TFT 21", "TFT 21 BW", 250, 132, false),
    epd(0x0B, "EPD 21", "EPD 21 BWR", 250, 128, true),
    epd(0x28, "EPD 29", "EPD 29 BW", 296, 128, false),
    epd(0x30, "EPD 29", "EPD 29 BW", 296, 128, false),
    epd(0x2B, "EPD 29", "EPD 29 BWR", 296, 128, true),
    epd(0x32, "EPD 29", "EPD 29 BWR", 296, 128, true),
    epd(0x33, "EPD 29", "EPD 29 BWR1", 296, 128, true),
    epd(0xEB, "EPD 29", "EPD 29 BWR SiLabs", 296, 128, true),
    epd(0x48, "EPD 42", "EPD 42 BW", 400, 300, false),
    epd(0x4B, "EPD 42", "EPD 42 BWR", 400, 300, true),
    tft(0x40, "TFT 42", "TFT 42 BW", 400, 300, false),
    tft(0x42, "TFT 42", "TFT 42 BWR", 400, 300, true),
    epd(0x68, "EPD 74", "EPD 74 BW", 800, 480, false),
    epd(0x6A, "EPD 74", "EPD 74 BWR", 800, 480, true),
];

/// Look up the descriptor for an advertised device-type code
pub fn lookup(code: u8) -> Result<&'static DeviceDescriptor, GiciskyError> {
    DEVICE_TYPES
        .iter()
        .find(|d| d.code == code)
        .ok_or(GiciskyError::UnknownDeviceKind(code))
}

/// All registered display models, in table order
pub fn all() -> impl Iterator<Item = &'static DeviceDescriptor> {
    DEVICE_TYPES.iter()
}

//! Manufacturer-data advertisement broadcast by every tag.

use crate::constants::ADVERTISEMENT_SIZE;
use crate::error::GiciskyError;
use crate::registry::{self, DeviceDescriptor};
use zerocopy::byteorder::big_endian::U16;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

/// Raw advertisement layout (5 bytes)
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct AdvertisementRaw {
    pub device_type: u8,
    /// Battery voltage in tenths of a volt
    pub battery: u8,
    pub firmware: U16,
    pub hardware: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advertisement {
    pub device_type: u8,
    pub descriptor: &'static DeviceDescriptor,
    pub battery_voltage: f32,
    pub firmware: u16,
    pub hardware: u8,
}

impl Advertisement {
    pub fn parse(data: &[u8]) -> Result<Self, GiciskyError> {
        if data.len() != ADVERTISEMENT_SIZE {
            return Err(GiciskyError::InvalidAdvertisement(data.len()));
        }
        let raw = AdvertisementRaw::ref_from_bytes(data).map_err(|_| GiciskyError::InvalidAdvertisement(data.len()))?;
        let descriptor = registry::lookup(raw.device_type)?;

        Ok(Self {
            device_type: raw.device_type,
            descriptor,
            battery_voltage: f32::from(raw.battery) / 10.0,
            firmware: raw.firmware.get(),
            hardware: raw.hardware,
        })
    }

    /// Battery level on the descriptor's voltage scale, rounded to 0.1 %.
    ///
    /// Not clamped: a fresh cell above the calibrated maximum reads over 100.
    pub fn battery_percent(&self) -> f32 {
        let d = self.descriptor;
        let percent = (self.battery_voltage - d.min_voltage) * 100.0 / (d.max_voltage - d.min_voltage);
        (percent * 10.0).round() / 10.0
    }

    pub fn battery_percent_clamped(&self) -> f32 {
        self.battery_percent().clamp(0.0, 100.0)
    }
}

impl std::fmt::Display for Advertisement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} battery {:.1} V ({:.1} %) fw {} hw {}",
            self.descriptor,
            self.battery_voltage,
            self.battery_percent_clamped(),
            self.firmware,
            self.hardware
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let adv = Advertisement::parse(&[0x0B, 29, 0x01, 0x02, 0x07]).unwrap();
        assert_eq!(adv.device_type, 0x0B);
        assert_eq!(adv.descriptor.width, 250);
        assert!((adv.battery_voltage - 2.9).abs() < 1e-6);
        assert_eq!(adv.firmware, 0x0102);
        assert_eq!(adv.hardware, 7);
        assert!((adv.battery_percent() - 100.0).abs() < 0.05);
    }

    #[test]
    fn test_wrong_length() {
        assert!(matches!(
            Advertisement::parse(&[0x0B, 29, 0x01, 0x02]),
            Err(GiciskyError::InvalidAdvertisement(4))
        ));
        assert!(matches!(
            Advertisement::parse(&[0x0B, 29, 0x01, 0x02, 0x07, 0x00]),
            Err(GiciskyError::InvalidAdvertisement(6))
        ));
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            Advertisement::parse(&[0xFF, 29, 0, 1, 0]),
            Err(GiciskyError::UnknownDeviceKind(0xFF))
        ));
    }
}

//! Ranging peripheral interface.
//!
//! The UWB ranging peripheral holds the installed beacon geometry and
//! computes position fixes, either locally or on behalf of a remote peer
//! addressed by its network id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beacons::{BeaconDescriptor, NetworkId};

/// Network id meaning "the local device".
pub const LOCAL_DEVICE: NetworkId = 0;

/// Why a peripheral request did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceFault {
    /// The device answered with a failure status.
    #[error("device reported failure")]
    Failure,
    /// The device's own timeout expired.
    #[error("device timed out")]
    Timeout,
    /// The addressed remote device could not be reached.
    #[error("device unreachable")]
    Unreachable,
}

/// Result of a peripheral request.
pub type DeviceResult<T> = std::result::Result<T, DeviceFault>;

/// Dimensionality of a position fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dimension {
    /// Planar fix; z is not solved.
    #[serde(rename = "2d")]
    TwoD,
    /// Planar fix at a known height.
    #[serde(rename = "2_5d")]
    TwoAndHalfD,
    /// Full 3D fix.
    #[default]
    #[serde(rename = "3d")]
    ThreeD,
}

/// Positioning algorithm run by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Independent fix from UWB ranges only.
    #[default]
    UwbOnly,
    /// Fix filtered with the previous ones.
    Tracking,
}

/// Parameters sent with each positioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositioningOptions {
    /// Fix dimensionality.
    pub dimension: Dimension,
    /// Algorithm to run.
    pub algorithm: Algorithm,
    /// Device height in millimeters, used by 2.5D fixes.
    pub height_mm: i32,
}

/// A position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    /// X in millimeters.
    pub x: i32,
    /// Y in millimeters.
    pub y: i32,
    /// Z in millimeters.
    pub z: i32,
}

impl Coordinates {
    /// Create new coordinates.
    #[must_use]
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x: {}mm y: {}mm z: {}mm", self.x, self.y, self.z)
    }
}

/// The ranging peripheral.
///
/// `remote` addresses a remote device by network id; `None` targets the
/// local device. Every call blocks until the device answers or its internal
/// timeout expires.
pub trait RangingDevice {
    /// Check that the peripheral answers.
    ///
    /// # Errors
    ///
    /// Returns a fault if the peripheral cannot be reached.
    fn connect(&mut self) -> DeviceResult<()>;

    /// Remove every registered device.
    ///
    /// # Errors
    ///
    /// Returns a fault if the device list cannot be cleared.
    fn clear_devices(&mut self, remote: Option<NetworkId>) -> DeviceResult<()>;

    /// Register one beacon's geometry.
    ///
    /// # Errors
    ///
    /// Returns a fault if the beacon cannot be registered.
    fn add_device(&mut self, beacon: &BeaconDescriptor, remote: Option<NetworkId>)
        -> DeviceResult<()>;

    /// Let the peripheral choose which of `count` beacons to range against.
    ///
    /// # Errors
    ///
    /// Returns a fault if the selection mode cannot be set.
    fn enable_auto_selection(&mut self, count: usize, remote: Option<NetworkId>)
        -> DeviceResult<()>;

    /// Compute one position fix.
    ///
    /// # Errors
    ///
    /// Returns a fault if no fix could be computed.
    fn do_positioning(
        &mut self,
        options: &PositioningOptions,
        remote: Option<NetworkId>,
    ) -> DeviceResult<Coordinates>;

    /// Fetch the last error code of a device.
    ///
    /// # Errors
    ///
    /// Returns a fault if the device does not answer.
    fn error_code(&mut self, remote: Option<NetworkId>) -> DeviceResult<u8>;
}

/// Address for requests on behalf of `id`; the local device is `None`.
#[must_use]
pub fn remote(id: NetworkId) -> Option<NetworkId> {
    (id != LOCAL_DEVICE).then_some(id)
}

/// Human-readable device name for diagnostics.
#[must_use]
pub fn device_name(id: NetworkId) -> String {
    if id == LOCAL_DEVICE {
        "local".to_string()
    } else {
        format!("0x{id:04x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_for_local_device() {
        assert_eq!(remote(0), None);
        assert_eq!(remote(0x7625), Some(0x7625));
    }

    #[test]
    fn test_device_name() {
        assert_eq!(device_name(0), "local");
        assert_eq!(device_name(0x0d31), "0x0d31");
        assert_eq!(device_name(0x7625), "0x7625");
    }

    #[test]
    fn test_coordinates_display() {
        let coords = Coordinates::new(520, 0, 1125);
        assert_eq!(coords.to_string(), "x: 520mm y: 0mm z: 1125mm");
    }

    #[test]
    fn test_dimension_serde_names() {
        assert_eq!(serde_json::to_string(&Dimension::TwoD).unwrap(), "\"2d\"");
        assert_eq!(
            serde_json::to_string(&Dimension::TwoAndHalfD).unwrap(),
            "\"2_5d\""
        );
        let dim: Dimension = serde_json::from_str("\"3d\"").unwrap();
        assert_eq!(dim, Dimension::ThreeD);
    }

    #[test]
    fn test_algorithm_serde_names() {
        let algo: Algorithm = serde_json::from_str("\"tracking\"").unwrap();
        assert_eq!(algo, Algorithm::Tracking);
        assert_eq!(Algorithm::default(), Algorithm::UwbOnly);
    }

    #[test]
    fn test_device_fault_display() {
        assert_eq!(DeviceFault::Timeout.to_string(), "device timed out");
        assert_eq!(DeviceFault::Unreachable.to_string(), "device unreachable");
    }
}

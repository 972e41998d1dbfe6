//! Beacon configuration.
//!
//! The beacon source is a row-oriented text file on the storage medium, one
//! device per row:
//!
//! ```text
//! # network_id  x     y     z     is_ranging_role
//! 0x681D        520   0     1125  0
//! 0x685C        3270  400   2150  0
//! 0x7625        0     0     0     1
//! ```
//!
//! Fields are separated by commas and/or whitespace. Rows flagged as ranging
//! role select the peer that performs positioning (the last one wins); every
//! other row is a beacon whose geometry is installed into the peripheral.

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::error::{Error, Result};
use crate::firmware::Runtime;
use crate::nvlog::{Fault, FaultKind};
use crate::nvmem::PersistentMemory;
use crate::ranging::{device_name, remote, DeviceFault, RangingDevice, LOCAL_DEVICE};
use crate::recording::RecordingMedium;

/// 16-bit network id of a ranging device.
pub type NetworkId = u16;

/// Beacon count above which the peripheral picks beacons itself.
pub const AUTO_SELECTION_THRESHOLD: usize = 4;

/// `network_id x y z is_ranging_role`, separated by commas and/or whitespace.
const ROW_PATTERN: &str = concat!(
    r"^(?:0[xX])?([0-9A-Fa-f]+)",
    r"[\s,]+([+-]?\d+)[\s,]+([+-]?\d+)[\s,]+([+-]?\d+)",
    r"[\s,]+(\d+)[\s,]*$",
);

/// What a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconRole {
    /// A fixed reference beacon.
    Beacon,
    /// The device that performs ranging.
    RangingRole,
}

/// One parsed row of the beacon source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BeaconDescriptor {
    /// Network id.
    pub network_id: NetworkId,
    /// X in millimeters.
    pub x: i32,
    /// Y in millimeters.
    pub y: i32,
    /// Z in millimeters.
    pub z: i32,
    /// What the row describes.
    pub role: BeaconRole,
}

impl BeaconDescriptor {
    /// Create a beacon row.
    #[must_use]
    pub fn beacon(network_id: NetworkId, x: i32, y: i32, z: i32) -> Self {
        Self {
            network_id,
            x,
            y,
            z,
            role: BeaconRole::Beacon,
        }
    }
}

/// Parse the beacon source.
///
/// Blank lines and `#` comments are ignored, as is a first row without digits
/// (a column header).
///
/// # Errors
///
/// Returns [`Error::BeaconSource`] for the first malformed row.
pub fn parse_beacon_source(text: &str) -> Result<Vec<BeaconDescriptor>> {
    let row = Regex::new(ROW_PATTERN).map_err(|e| Error::internal(e.to_string()))?;
    let mut rows = Vec::new();
    let mut seen_content = false;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let is_first = !seen_content;
        seen_content = true;

        let Some(caps) = row.captures(line) else {
            if is_first && !line.chars().any(|c| c.is_ascii_digit()) {
                continue;
            }
            return Err(Error::beacon_source(
                line_no,
                "expected network_id, x, y, z, is_ranging_role",
            ));
        };

        let id = u32::from_str_radix(&caps[1], 16)
            .map_err(|e| Error::beacon_source(line_no, format!("network id: {e}")))?;
        let network_id = NetworkId::try_from(id).map_err(|_| {
            Error::beacon_source(line_no, format!("network id 0x{id:x} exceeds 16 bits"))
        })?;
        let coordinate = |i: usize, axis: &str| {
            caps[i]
                .parse::<i32>()
                .map_err(|e| Error::beacon_source(line_no, format!("{axis}: {e}")))
        };
        let x = coordinate(2, "x")?;
        let y = coordinate(3, "y")?;
        let z = coordinate(4, "z")?;
        let flag = caps[5]
            .parse::<u8>()
            .map_err(|e| Error::beacon_source(line_no, format!("is_ranging_role: {e}")))?;

        rows.push(BeaconDescriptor {
            network_id,
            x,
            y,
            z,
            role: if flag == 0 {
                BeaconRole::Beacon
            } else {
                BeaconRole::RangingRole
            },
        });
    }
    Ok(rows)
}

/// Beacon geometry and the local ranging identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BeaconConfig {
    /// Beacons to install, in source order.
    pub beacons: Vec<BeaconDescriptor>,
    /// Peer performing the ranging; 0 when this device ranges itself.
    pub ranging_role_id: NetworkId,
}

impl BeaconConfig {
    /// Split parsed rows into the ranging identity and the beacon set.
    #[must_use]
    pub fn from_rows(rows: Vec<BeaconDescriptor>) -> Self {
        // Several ranging-role rows are not rejected; the last one is used.
        let ranging_role_id = rows
            .iter()
            .filter(|row| row.role == BeaconRole::RangingRole)
            .map(|row| row.network_id)
            .last()
            .unwrap_or(LOCAL_DEVICE);

        let beacons = rows
            .into_iter()
            .filter(|row| row.role == BeaconRole::Beacon)
            .collect();

        Self {
            beacons,
            ranging_role_id,
        }
    }
}

/// Outcome of a successful installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installation {
    /// Number of beacons registered.
    pub registered: usize,
    /// Whether automatic beacon selection was enabled.
    pub auto_selection: bool,
}

/// A peripheral request failed while installing geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{fault}: {cause}")]
pub struct InstallError {
    /// The fault to persist.
    pub fault: Fault,
    /// What the peripheral reported.
    #[source]
    pub cause: DeviceFault,
}

/// Install beacon geometry into the peripheral.
///
/// Clears the target's device list, registers every beacon, and enables
/// automatic selection when more than [`AUTO_SELECTION_THRESHOLD`] beacons are
/// registered. Stops at the first failure.
///
/// # Errors
///
/// Returns an [`InstallError`] carrying a `BeaconRegistration` fault for the
/// device that failed.
pub fn install<D: RangingDevice + ?Sized>(
    device: &mut D,
    config: &BeaconConfig,
) -> std::result::Result<Installation, InstallError> {
    let target = remote(config.ranging_role_id);
    let registration_fault = |device_id, cause| InstallError {
        fault: Fault::new(FaultKind::BeaconRegistration, device_id),
        cause,
    };

    device
        .clear_devices(target)
        .map_err(|cause| registration_fault(config.ranging_role_id, cause))?;

    let mut registered = 0;
    for beacon in &config.beacons {
        device
            .add_device(beacon, target)
            .map_err(|cause| registration_fault(beacon.network_id, cause))?;
        registered += 1;
    }

    let auto_selection = registered > AUTO_SELECTION_THRESHOLD;
    if auto_selection {
        device
            .enable_auto_selection(registered, target)
            .map_err(|cause| registration_fault(config.ranging_role_id, cause))?;
    }

    Ok(Installation {
        registered,
        auto_selection,
    })
}

/// Loads the beacon source from the medium and installs it.
#[derive(Debug, Clone, Copy)]
pub struct BeaconConfigLoader<'a> {
    source: &'a str,
}

impl<'a> BeaconConfigLoader<'a> {
    /// Create a loader for the named source on the medium.
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    /// Read, parse and install the beacon configuration.
    ///
    /// On success the runtime's ranging role and installed beacon set are
    /// updated. Every failure is recorded in the setup ring before it is
    /// returned, and the beacon set is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigMissing` fault if the source cannot be read or
    /// parsed, or a `BeaconRegistration` fault if installation fails.
    pub fn load<M, S, D, C>(
        &self,
        rt: &mut Runtime<M, S, D, C>,
    ) -> std::result::Result<BeaconConfig, Fault>
    where
        M: PersistentMemory,
        S: RecordingMedium,
        D: RangingDevice,
    {
        let text = match rt.medium.read_source(self.source) {
            Ok(text) => text,
            Err(err) => return Err(rt.fail(FaultKind::ConfigMissing, LOCAL_DEVICE, &err)),
        };
        let rows = match parse_beacon_source(&text) {
            Ok(rows) => rows,
            Err(err) => return Err(rt.fail(FaultKind::ConfigMissing, LOCAL_DEVICE, &err)),
        };

        let config = BeaconConfig::from_rows(rows);
        let installation = match install(&mut rt.device, &config) {
            Ok(installation) => installation,
            Err(err) => return Err(rt.fail(err.fault.kind, err.fault.device_id, &err.cause)),
        };

        for beacon in &config.beacons {
            info!(
                "beacon {} at ({}, {}, {}) mm",
                device_name(beacon.network_id),
                beacon.x,
                beacon.y,
                beacon.z
            );
        }
        info!(
            source = self.source,
            ranging_role = %device_name(config.ranging_role_id),
            beacons = installation.registered,
            auto_selection = installation.auto_selection,
            "beacon geometry installed"
        );

        rt.ranging_role = config.ranging_role_id;
        rt.beacons.clone_from(&config.beacons);
        Ok(config)
    }
}

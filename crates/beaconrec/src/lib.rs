//! `beaconrec` - UWB position recorder firmware core
//!
//! Boots a ranging device, installs beacon geometry from a storage card,
//! records periodic position fixes, and keeps a persistent circular log of
//! faults that survives uncontrolled reboots. Hardware is reached through the
//! [`PersistentMemory`], [`RecordingMedium`], [`RangingDevice`] and
//! [`Clock`] traits; [`host`] provides file-backed and simulated versions.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod beacons;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod firmware;
pub mod host;
pub mod logging;
pub mod nvlog;
pub mod nvmem;
pub mod ranging;
pub mod ranging_loop;
pub mod recording;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use beacons::{BeaconConfig, BeaconConfigLoader, BeaconDescriptor};
pub use clock::Clock;
pub use config::Config;
pub use error::{Error, Result};
pub use firmware::{Board, Firmware, FirmwareState};
pub use logging::init_logging;
pub use nvlog::{ErrorRecord, Fault, FaultKind, FaultLog, NonVolatileLog};
pub use nvmem::PersistentMemory;
pub use ranging::RangingDevice;
pub use ranging_loop::RangingLoop;
pub use recording::{RecordingMedium, RecordingSink};
pub use session::{SessionId, SessionRegistry};

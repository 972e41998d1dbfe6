//! Configuration for the host build of the firmware.
//!
//! Loaded with figment from defaults, a TOML file and `BEACONREC_`
//! environment variables. Nested keys use a double underscore in the
//! environment, e.g. `BEACONREC_RANGING__PERIOD_MS=250`.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::firmware::FirmwareSettings;
use crate::nvlog::LogRegion;
use crate::ranging::{Algorithm, Coordinates, Dimension, PositioningOptions};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the platform config and data dirs.
const APP_DIR_NAME: &str = "beaconrec";

/// Default memory image file name.
const IMAGE_FILE_NAME: &str = "eeprom.bin";

/// Default directory standing in for the storage card.
const CARD_DIR_NAME: &str = "card";

/// Application configuration.
///
/// Precedence, highest first:
/// 1. Environment variables prefixed with `BEACONREC_`
/// 2. TOML config file at `~/.config/beaconrec/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistent memory layout.
    pub memory: MemoryConfig,
    /// Recording output.
    pub recording: RecordingConfig,
    /// Ranging loop.
    pub ranging: RangingConfig,
    /// Simulated ranging peripheral.
    pub simulation: SimulationConfig,
}

/// Persistent memory layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Image file backing the memory.
    /// Defaults to `~/.local/share/beaconrec/eeprom.bin`
    pub image_path: Option<PathBuf>,
    /// Capacity in bytes.
    pub size: usize,
    /// Address of the session byte.
    pub session_address: usize,
    /// Ring for setup faults.
    pub setup_ring: LogRegion,
    /// Ring for loop faults.
    pub loop_ring: LogRegion,
}

/// Recording output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Root of the storage card.
    /// Defaults to `~/.local/share/beaconrec/card`
    pub directory: Option<PathBuf>,
    /// Recording file name prefix.
    pub file_prefix: String,
    /// Appends between forced commits; 0 disables them.
    pub flush_period: u32,
}

/// Ranging loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    /// Beacon source file on the card.
    pub beacon_source: String,
    /// Loop period in milliseconds.
    pub period_ms: u32,
    /// Fix dimensionality.
    pub dimension: Dimension,
    /// Positioning algorithm.
    pub algorithm: Algorithm,
    /// Device height for 2.5D fixes, in millimeters.
    pub height_mm: i32,
}

/// Simulated ranging peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Position every fix reports.
    pub position: Coordinates,
    /// Fail every n-th positioning request; 0 never fails.
    pub fail_every: u32,
    /// Whether a remote ranging peer answers error-code queries.
    pub peer_reachable: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            size: 1024,
            session_address: 0,
            setup_ring: LogRegion { begin: 4, end: 260 },
            loop_ring: LogRegion {
                begin: 260,
                end: 1024,
            },
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "REC".to_string(),
            flush_period: 32,
        }
    }
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            beacon_source: "BEACONS.TXT".to_string(),
            period_ms: 100,
            dimension: Dimension::ThreeD,
            algorithm: Algorithm::UwbOnly,
            height_mm: 1000,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            position: Coordinates::new(1500, 2000, 1200),
            fail_every: 0,
            peer_reachable: true,
        }
    }
}

impl Config {
    /// Load configuration from the default file, the environment and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and the environment apply.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let config: Config = Self::figment(&config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed("BEACONREC_").split("__"))
    }

    /// Default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(APP_DIR_NAME)
    }

    /// Check the memory layout and loop parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let memory = &self.memory;
        for (name, ring) in [("setup_ring", &memory.setup_ring), ("loop_ring", &memory.loop_ring)] {
            ring.validate()
                .map_err(|e| Error::config_validation(format!("memory.{name}: {e}")))?;
            if ring.end > memory.size {
                return Err(Error::config_validation(format!(
                    "memory.{name} ({ring}) exceeds memory size {}",
                    memory.size
                )));
            }
            if ring.contains(memory.session_address) {
                return Err(Error::config_validation(format!(
                    "memory.session_address ({}) lies inside memory.{name} ({ring})",
                    memory.session_address
                )));
            }
        }
        if memory.setup_ring.overlaps(&memory.loop_ring) {
            return Err(Error::config_validation(format!(
                "memory.setup_ring ({}) overlaps memory.loop_ring ({})",
                memory.setup_ring, memory.loop_ring
            )));
        }
        if memory.session_address >= memory.size {
            return Err(Error::config_validation(format!(
                "memory.session_address ({}) exceeds memory size {}",
                memory.session_address, memory.size
            )));
        }

        if self.ranging.period_ms == 0 {
            return Err(Error::config_validation(
                "ranging.period_ms must be greater than 0",
            ));
        }
        if self.recording.file_prefix.is_empty() {
            return Err(Error::config_validation(
                "recording.file_prefix must not be empty",
            ));
        }
        if self.ranging.beacon_source.is_empty() {
            return Err(Error::config_validation(
                "ranging.beacon_source must not be empty",
            ));
        }
        Ok(())
    }

    /// Memory image path, resolving the default if not set.
    #[must_use]
    pub fn image_path(&self) -> PathBuf {
        self.memory
            .image_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(IMAGE_FILE_NAME))
    }

    /// Storage card directory, resolving the default if not set.
    #[must_use]
    pub fn card_dir(&self) -> PathBuf {
        self.recording
            .directory
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(CARD_DIR_NAME))
    }

    /// Positioning options sent with each request.
    #[must_use]
    pub fn positioning(&self) -> PositioningOptions {
        PositioningOptions {
            dimension: self.ranging.dimension,
            algorithm: self.ranging.algorithm,
            height_mm: self.ranging.height_mm,
        }
    }

    /// Everything the firmware needs to boot.
    #[must_use]
    pub fn firmware_settings(&self) -> FirmwareSettings {
        FirmwareSettings {
            session_address: self.memory.session_address,
            setup_ring: self.memory.setup_ring,
            loop_ring: self.memory.loop_ring,
            beacon_source: self.ranging.beacon_source.clone(),
            file_prefix: self.recording.file_prefix.clone(),
            flush_period: self.recording.flush_period,
            period_ms: self.ranging.period_ms,
            positioning: self.positioning(),
        }
    }
}

//! Persisted fault records.
//!
//! A record is four bytes: `[session_id][kind][device_id lo][device_id hi]`.

use serde::Serialize;

use crate::ranging::device_name;
use crate::session::EMPTY_SESSION;

/// Size of one encoded record in bytes.
pub const RECORD_SIZE: usize = 4;

/// What went wrong.
///
/// Setup faults halt the device; loop faults are recorded and the loop moves
/// on to the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The durable storage medium failed to initialize.
    StorageInit,
    /// The ranging peripheral did not answer at boot.
    RangingSubsystemConnect,
    /// The beacon source could not be opened or parsed.
    ConfigMissing,
    /// The recording file could not be opened.
    DataFileOpen,
    /// A beacon could not be registered with the peripheral.
    BeaconRegistration,
    /// A ranging request failed and the device reported an error code.
    PeerError,
    /// The ranging peer did not answer an error-code query.
    PeerUnreachable,
    /// A kind byte this firmware does not know, read back from memory.
    Unknown(u8),
}

impl FaultKind {
    /// The persisted code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::StorageInit => 0,
            Self::RangingSubsystemConnect => 1,
            Self::ConfigMissing => 2,
            Self::DataFileOpen => 3,
            Self::BeaconRegistration => 4,
            Self::PeerError => 5,
            Self::PeerUnreachable => 6,
            Self::Unknown(code) => code,
        }
    }

    /// Decode a persisted code.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::StorageInit,
            1 => Self::RangingSubsystemConnect,
            2 => Self::ConfigMissing,
            3 => Self::DataFileOpen,
            4 => Self::BeaconRegistration,
            5 => Self::PeerError,
            6 => Self::PeerUnreachable,
            other => Self::Unknown(other),
        }
    }

    /// Whether this fault halts the device.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::StorageInit
                | Self::RangingSubsystemConnect
                | Self::ConfigMissing
                | Self::DataFileOpen
                | Self::BeaconRegistration
        )
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageInit => write!(f, "storage_init"),
            Self::RangingSubsystemConnect => write!(f, "ranging_subsystem_connect"),
            Self::ConfigMissing => write!(f, "config_missing"),
            Self::DataFileOpen => write!(f, "data_file_open"),
            Self::BeaconRegistration => write!(f, "beacon_registration"),
            Self::PeerError => write!(f, "peer_error"),
            Self::PeerUnreachable => write!(f, "peer_unreachable"),
            Self::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// A fault and the device it concerns, before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fault {
    /// What went wrong.
    pub kind: FaultKind,
    /// Network id of the device involved; 0 for the local device.
    pub device_id: u16,
}

impl Fault {
    /// Create a new fault.
    #[must_use]
    pub fn new(kind: FaultKind, device_id: u16) -> Self {
        Self { kind, device_id }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.kind, device_name(self.device_id))
    }
}

/// One persisted fault record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    /// Session that wrote the record.
    pub session_id: u8,
    /// What went wrong.
    pub kind: FaultKind,
    /// Device involved; 0 for the local device.
    pub device_id: u16,
}

impl ErrorRecord {
    /// Create a new record.
    #[must_use]
    pub fn new(session_id: u8, kind: FaultKind, device_id: u16) -> Self {
        Self {
            session_id,
            kind,
            device_id,
        }
    }

    /// Encode into the on-memory layout.
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let [lo, hi] = self.device_id.to_le_bytes();
        [self.session_id, self.kind.code(), lo, hi]
    }

    /// Decode a slot, or `None` if the slot is empty.
    #[must_use]
    pub fn decode(bytes: [u8; RECORD_SIZE]) -> Option<Self> {
        if bytes[0] == EMPTY_SESSION {
            return None;
        }
        Some(Self {
            session_id: bytes[0],
            kind: FaultKind::from_code(bytes[1]),
            device_id: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session {} {} on {}",
            self.session_id,
            self.kind,
            device_name(self.device_id)
        )
    }
}

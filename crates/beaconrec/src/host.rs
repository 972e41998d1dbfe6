//! Host stand-ins for the device's hardware.
//!
//! - [`FileMemory`]: persistent memory backed by an image file;
//! - [`DirectoryMedium`]: a directory playing the storage card;
//! - [`SimulatedRanger`]: a ranging peripheral reporting a fixed position.
//!
//! The clock is [`crate::clock::SystemClock`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::beacons::{BeaconDescriptor, NetworkId};
use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::nvmem::{check_bounds, MemoryArena, PersistentMemory, ERASED_BYTE};
use crate::ranging::{
    Coordinates, DeviceFault, DeviceResult, Dimension, PositioningOptions, RangingDevice,
};
use crate::recording::{DurableFile, RecordingMedium};

/// Read a memory image without creating or changing it.
///
/// A missing image reads as erased memory. A short image is padded with
/// erased bytes; a longer one is truncated to `size`.
///
/// # Errors
///
/// Returns [`Error::MemoryImage`] if the file exists but cannot be read.
pub fn read_image(path: &Path, size: usize) -> Result<MemoryArena> {
    let mut bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(source) => {
            return Err(Error::MemoryImage {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    bytes.resize(size, ERASED_BYTE);
    Ok(MemoryArena::from_bytes(bytes))
}

/// Persistent memory backed by an image file.
///
/// Reads are served from a working copy; every write goes through to the
/// file and is synced before returning, so a killed process loses nothing
/// that was reported written.
#[derive(Debug)]
pub struct FileMemory {
    path: PathBuf,
    file: File,
    arena: MemoryArena,
}

impl FileMemory {
    /// Open the image at `path`, creating an erased one of `size` bytes if it
    /// doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryImage`] if the image cannot be opened, read or
    /// extended, and [`Error::DirectoryCreate`] if its directory cannot be
    /// created.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let image_error = |source| Error::MemoryImage {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(image_error)?;

        let mut bytes = Vec::with_capacity(size);
        file.read_to_end(&mut bytes).map_err(image_error)?;
        let existing = bytes.len();
        bytes.resize(size, ERASED_BYTE);

        if existing < size {
            file.seek(SeekFrom::Start(existing as u64))
                .and_then(|_| file.write_all(&bytes[existing..]))
                .and_then(|()| file.sync_data())
                .map_err(image_error)?;
            info!(path = %path.display(), size, "memory image initialised");
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            arena: MemoryArena::from_bytes(bytes),
        })
    }

    /// Path of the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentMemory for FileMemory {
    fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        self.arena.read(address, buf)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<()> {
        check_bounds(address, data.len(), self.capacity())?;
        self.file.seek(SeekFrom::Start(address as u64))?;
        self.file.write_all(data)?;
        self.file.sync_data()?;
        self.arena.write(address, data)
    }
}

/// A directory standing in for the storage card.
#[derive(Debug, Clone)]
pub struct DirectoryMedium {
    root: PathBuf,
}

impl DirectoryMedium {
    /// Use `root` as the card.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The card's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RecordingMedium for DirectoryMedium {
    type File = DirectoryFile;

    fn init(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let metadata = fs::metadata(&self.root)?;
        if !metadata.is_dir() {
            return Err(io::Error::other(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        debug!(root = %self.root.display(), "card mounted");
        Ok(())
    }

    fn read_source(&mut self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(name))
    }

    fn open_append(&mut self, name: &str) -> io::Result<DirectoryFile> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(name))?;
        Ok(DirectoryFile { file })
    }
}

/// An append-only file on a [`DirectoryMedium`].
#[derive(Debug)]
pub struct DirectoryFile {
    file: File,
}

impl Write for DirectoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl DurableFile for DirectoryFile {
    fn commit(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// Ranging peripheral that always reports the same position.
///
/// 2D fixes report z = 0 and 2.5D fixes report the configured height, the
/// way a real peripheral does when z is not solved.
#[derive(Debug, Clone)]
pub struct SimulatedRanger {
    config: SimulationConfig,
    requests: u32,
    last_error: u8,
}

impl SimulatedRanger {
    /// Error code reported after a simulated failure.
    pub const FAILURE_CODE: u8 = 0xFF;

    /// Create a simulated peripheral.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            requests: 0,
            last_error: 0,
        }
    }

    /// Positioning requests served so far.
    #[must_use]
    pub fn requests(&self) -> u32 {
        self.requests
    }
}

impl RangingDevice for SimulatedRanger {
    fn connect(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    fn clear_devices(&mut self, _remote: Option<NetworkId>) -> DeviceResult<()> {
        Ok(())
    }

    fn add_device(
        &mut self,
        beacon: &BeaconDescriptor,
        _remote: Option<NetworkId>,
    ) -> DeviceResult<()> {
        debug!(network_id = beacon.network_id, "simulated beacon added");
        Ok(())
    }

    fn enable_auto_selection(
        &mut self,
        _count: usize,
        _remote: Option<NetworkId>,
    ) -> DeviceResult<()> {
        Ok(())
    }

    fn do_positioning(
        &mut self,
        options: &PositioningOptions,
        remote: Option<NetworkId>,
    ) -> DeviceResult<Coordinates> {
        self.requests = self.requests.wrapping_add(1);
        let fail_every = self.config.fail_every;
        if fail_every > 0 && self.requests % fail_every == 0 {
            self.last_error = Self::FAILURE_CODE;
            return Err(if remote.is_some() {
                DeviceFault::Timeout
            } else {
                DeviceFault::Failure
            });
        }
        self.last_error = 0;

        let position = self.config.position;
        let z = match options.dimension {
            Dimension::TwoD => 0,
            Dimension::TwoAndHalfD => options.height_mm,
            Dimension::ThreeD => position.z,
        };
        Ok(Coordinates::new(position.x, position.y, z))
    }

    fn error_code(&mut self, remote: Option<NetworkId>) -> DeviceResult<u8> {
        if remote.is_some() && !self.config.peer_reachable {
            return Err(DeviceFault::Unreachable);
        }
        Ok(self.last_error)
    }
}

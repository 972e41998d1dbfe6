//! Byte-addressable persistent memory.
//!
//! The device keeps its session byte and both fault rings in a small
//! non-volatile memory (EEPROM on the target). Everything above this module
//! addresses it through [`PersistentMemory`], whose accessors are bounds
//! checked against the memory's capacity.

use crate::error::{Error, Result};

/// Value of an erased (never written) byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Byte-addressable non-volatile memory.
pub trait PersistentMemory {
    /// Capacity of the memory in bytes.
    fn capacity(&self) -> usize;

    /// Read `buf.len()` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryOutOfBounds`] if the range exceeds the capacity,
    /// or an implementation-specific error if the medium cannot be read.
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MemoryOutOfBounds`] if the range exceeds the capacity,
    /// or an implementation-specific error if the medium cannot be written.
    fn write(&mut self, address: usize, data: &[u8]) -> Result<()>;

    /// Read a single byte.
    ///
    /// # Errors
    ///
    /// See [`PersistentMemory::read`].
    fn read_byte(&self, address: usize) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read(address, &mut buf)?;
        Ok(buf[0])
    }

    /// Write a single byte.
    ///
    /// # Errors
    ///
    /// See [`PersistentMemory::write`].
    fn write_byte(&mut self, address: usize, value: u8) -> Result<()> {
        self.write(address, &[value])
    }
}

/// Check that `len` bytes at `address` fit in `capacity`.
///
/// # Errors
///
/// Returns [`Error::MemoryOutOfBounds`] when they don't.
pub fn check_bounds(address: usize, len: usize, capacity: usize) -> Result<()> {
    match address.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(Error::MemoryOutOfBounds {
            address,
            len,
            capacity,
        }),
    }
}

/// Persistent memory held in RAM.
///
/// Used directly in tests and as the working copy behind file-backed images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryArena {
    bytes: Vec<u8>,
}

impl MemoryArena {
    /// Create an erased arena of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![ERASED_BYTE; capacity],
        }
    }

    /// Wrap existing contents.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw contents of the arena.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl PersistentMemory for MemoryArena {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(address, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[address..address + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<()> {
        check_bounds(address, data.len(), self.bytes.len())?;
        self.bytes[address..address + data.len()].copy_from_slice(data);
        Ok(())
    }
}

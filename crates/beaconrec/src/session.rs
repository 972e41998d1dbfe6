//! Boot session identifiers.
//!
//! Every boot takes the next id from one reserved byte of persistent memory.
//! The id tags every fault record and names the recording file, so records
//! from different boots that share ring slots stay attributable.

use serde::Serialize;

use crate::error::Result;
use crate::nvmem::PersistentMemory;

/// Session byte value reserved for "slot empty".
pub const EMPTY_SESSION: u8 = 0xFF;

/// Largest id handed out before wrapping back to 0.
pub const LAST_SESSION: u8 = 253;

/// Identifier of one boot session. Never the empty sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(u8);

impl SessionId {
    /// Wrap a raw session byte, rejecting the empty sentinel.
    #[must_use]
    pub fn new(value: u8) -> Option<Self> {
        (value != EMPTY_SESSION).then_some(Self(value))
    }

    /// The raw byte.
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assigns session ids from a single persistent byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRegistry {
    address: usize,
}

impl SessionRegistry {
    /// Create a registry whose counter lives at `address`.
    #[must_use]
    pub fn new(address: usize) -> Self {
        Self { address }
    }

    /// Address of the session byte.
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    /// The id that follows `previous`.
    ///
    /// Ids run `0..=253` and then wrap to 0. An erased byte (255) and the
    /// unused value 254 also restart the sequence at 0.
    #[must_use]
    pub fn next(previous: u8) -> SessionId {
        if previous >= LAST_SESSION {
            SessionId(0)
        } else {
            SessionId(previous + 1)
        }
    }

    /// The id stored by the last boot, if any boot has happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the session byte cannot be read.
    pub fn current<M: PersistentMemory + ?Sized>(&self, memory: &M) -> Result<Option<SessionId>> {
        Ok(SessionId::new(memory.read_byte(self.address)?))
    }

    /// Take the next id and persist it before anything else touches memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the session byte cannot be read or written.
    pub fn assign<M: PersistentMemory + ?Sized>(&self, memory: &mut M) -> Result<SessionId> {
        let previous = memory.read_byte(self.address)?;
        let session = Self::next(previous);
        memory.write_byte(self.address, session.get())?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvmem::MemoryArena;

    #[test]
    fn test_next_increments() {
        assert_eq!(SessionRegistry::next(0).get(), 1);
        assert_eq!(SessionRegistry::next(41).get(), 42);
        assert_eq!(SessionRegistry::next(252).get(), 253);
    }

    #[test]
    fn test_next_wraps_after_253() {
        assert_eq!(SessionRegistry::next(253).get(), 0);
    }

    #[test]
    fn test_next_never_yields_sentinel() {
        for previous in 0..=u8::MAX {
            let next = SessionRegistry::next(previous).get();
            assert_ne!(next, EMPTY_SESSION, "previous {previous}");
            assert!(next <= LAST_SESSION);
        }
    }

    #[test]
    fn test_erased_byte_starts_at_zero() {
        assert_eq!(SessionRegistry::next(EMPTY_SESSION).get(), 0);
        assert_eq!(SessionRegistry::next(254).get(), 0);
    }

    #[test]
    fn test_session_id_rejects_sentinel() {
        assert!(SessionId::new(EMPTY_SESSION).is_none());
        assert_eq!(SessionId::new(7).map(SessionId::get), Some(7));
    }

    #[test]
    fn test_assign_persists_new_id() {
        let mut memory = MemoryArena::new(8);
        let registry = SessionRegistry::new(0);

        assert_eq!(registry.current(&memory).unwrap(), None);

        let first = registry.assign(&mut memory).unwrap();
        assert_eq!(first.get(), 0);
        assert_eq!(memory.read_byte(0).unwrap(), 0);

        let second = registry.assign(&mut memory).unwrap();
        assert_eq!(second.get(), 1);
        assert_eq!(registry.current(&memory).unwrap(), Some(second));
    }

    #[test]
    fn test_assign_from_253_wraps() {
        let mut memory = MemoryArena::new(8);
        memory.write_byte(3, 253).unwrap();
        let session = SessionRegistry::new(3).assign(&mut memory).unwrap();
        assert_eq!(session.get(), 0);
    }

    #[test]
    fn test_assign_out_of_bounds() {
        let mut memory = MemoryArena::new(4);
        assert!(SessionRegistry::new(4).assign(&mut memory).is_err());
    }

    #[test]
    fn test_session_display() {
        assert_eq!(SessionRegistry::next(9).to_string(), "10");
    }
}

//! Persistent circular fault log.
//!
//! A [`NonVolatileLog`] is a ring of fixed-size [`ErrorRecord`] slots inside a
//! [`LogRegion`] of persistent memory. Nothing but the records themselves is
//! stored, so after an uncontrolled reboot the write position is recovered by
//! scanning the session bytes:
//!
//! - an empty first slot means an empty ring, head at slot 0;
//! - otherwise the scan walks forward while session bytes are present and do
//!   not decrease; the first empty slot or drop is the head (the oldest
//!   record, overwritten next);
//! - a scan reaching the end of the region puts the head back at slot 0.
//!
//! The scan relies on session ids increasing across reboots. A ring filled by
//! a single session cannot be told apart from a ring that wrapped exactly at
//! slot 0, and an id sequence that wraps from 253 to 0 inside one ring's span
//! puts the head at the wrap point rather than at the true oldest record.
//!
//! [`FaultLog`] pairs the setup ring (fatal faults) with the loop ring
//! (recoverable faults) over one shared memory.

mod record;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::nvmem::PersistentMemory;
use crate::ranging::device_name;
use crate::session::{SessionId, EMPTY_SESSION};

pub use record::{ErrorRecord, Fault, FaultKind, RECORD_SIZE};

/// A byte range of persistent memory holding one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRegion {
    /// First byte of the region.
    pub begin: usize,
    /// One past the last byte of the region.
    pub end: usize,
}

impl LogRegion {
    /// Create a validated region.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is empty or not a whole number of records.
    pub fn new(begin: usize, end: usize) -> Result<Self> {
        let region = Self { begin, end };
        region.validate()?;
        Ok(region)
    }

    /// Check the region's shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is empty or not a whole number of records.
    pub fn validate(&self) -> Result<()> {
        if self.begin >= self.end {
            return Err(Error::invalid_region(self.begin, self.end, "region is empty"));
        }
        if (self.end - self.begin) % RECORD_SIZE != 0 {
            return Err(Error::invalid_region(
                self.begin,
                self.end,
                format!("length is not a multiple of {RECORD_SIZE}"),
            ));
        }
        Ok(())
    }

    /// Number of record slots.
    #[must_use]
    pub fn slots(&self) -> usize {
        (self.end - self.begin) / RECORD_SIZE
    }

    /// Address of the given slot.
    #[must_use]
    pub fn slot_address(&self, slot: usize) -> usize {
        self.begin + slot * RECORD_SIZE
    }

    /// Whether `address` lies inside the region.
    #[must_use]
    pub fn contains(&self, address: usize) -> bool {
        (self.begin..self.end).contains(&address)
    }

    /// Whether the two regions share any byte.
    #[must_use]
    pub fn overlaps(&self, other: &LogRegion) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

impl std::fmt::Display for LogRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.begin, self.end)
    }
}

/// Which ring a log serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Boot-time faults, all fatal.
    Setup,
    /// Ranging loop faults, all recoverable.
    Loop,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Loop => write!(f, "loop"),
        }
    }
}

/// Read the session byte of one slot.
fn slot_session<M: PersistentMemory + ?Sized>(
    memory: &M,
    region: &LogRegion,
    slot: usize,
) -> Result<u8> {
    memory.read_byte(region.slot_address(slot))
}

/// Read and decode one slot.
fn read_slot<M: PersistentMemory + ?Sized>(
    memory: &M,
    region: &LogRegion,
    slot: usize,
) -> Result<Option<ErrorRecord>> {
    let mut bytes = [0u8; RECORD_SIZE];
    memory.read(region.slot_address(slot), &mut bytes)?;
    Ok(ErrorRecord::decode(bytes))
}

/// Recover the head slot of a ring from its contents.
///
/// # Errors
///
/// Returns an error if the region cannot be read.
pub fn recover_head<M: PersistentMemory + ?Sized>(memory: &M, region: &LogRegion) -> Result<usize> {
    let first = slot_session(memory, region, 0)?;
    if first == EMPTY_SESSION {
        return Ok(0);
    }

    let mut previous = first;
    for slot in 1..region.slots() {
        let current = slot_session(memory, region, slot)?;
        if current == EMPTY_SESSION || current < previous {
            return Ok(slot);
        }
        previous = current;
    }

    // Walked the whole ring without finding a boundary.
    Ok(0)
}

/// Read a ring's history, oldest first, without a session.
///
/// This is what an external collector does with a memory image.
///
/// # Errors
///
/// Returns an error if the region is invalid, doesn't fit the memory, or
/// cannot be read.
pub fn read_history<M: PersistentMemory + ?Sized>(
    memory: &M,
    region: &LogRegion,
) -> Result<Vec<ErrorRecord>> {
    check_region(memory, region)?;
    if slot_session(memory, region, 0)? == EMPTY_SESSION {
        return Ok(Vec::new());
    }

    let head = recover_head(memory, region)?;
    let slots = region.slots();
    let mut records = Vec::with_capacity(slots);
    for offset in 0..slots {
        if let Some(record) = read_slot(memory, region, (head + offset) % slots)? {
            records.push(record);
        }
    }
    Ok(records)
}

fn check_region<M: PersistentMemory + ?Sized>(memory: &M, region: &LogRegion) -> Result<()> {
    region.validate()?;
    if region.end > memory.capacity() {
        return Err(Error::invalid_region(
            region.begin,
            region.end,
            format!("exceeds memory capacity {}", memory.capacity()),
        ));
    }
    Ok(())
}

/// One ring of fault records with its recovered write cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonVolatileLog {
    phase: Phase,
    region: LogRegion,
    head: usize,
    session: SessionId,
}

impl NonVolatileLog {
    /// Open a ring and recover its head.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is invalid, doesn't fit the memory, or
    /// cannot be read.
    pub fn open<M: PersistentMemory + ?Sized>(
        memory: &M,
        phase: Phase,
        region: LogRegion,
        session: SessionId,
    ) -> Result<Self> {
        check_region(memory, &region)?;
        let head = recover_head(memory, &region)?;
        Ok(Self {
            phase,
            region,
            head,
            session,
        })
    }

    /// The ring's phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The ring's region.
    #[must_use]
    pub fn region(&self) -> LogRegion {
        self.region
    }

    /// Slot the next record will be written to.
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Session stamped on new records.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Write one record at the head and advance it.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory write fails; the head does not move.
    pub fn log<M: PersistentMemory + ?Sized>(
        &mut self,
        memory: &mut M,
        kind: FaultKind,
        device_id: u16,
    ) -> Result<ErrorRecord> {
        let record = ErrorRecord::new(self.session.get(), kind, device_id);
        let slot = self.head;
        memory.write(self.region.slot_address(slot), &record.encode())?;
        self.head = (slot + 1) % self.region.slots();

        if kind.is_fatal() {
            error!(
                ring = %self.phase,
                slot,
                session = record.session_id,
                kind = %kind,
                device = %device_name(device_id),
                "fault recorded"
            );
        } else {
            warn!(
                ring = %self.phase,
                slot,
                session = record.session_id,
                kind = %kind,
                device = %device_name(device_id),
                "fault recorded"
            );
        }
        Ok(record)
    }

    /// Walk the ring once from the head, oldest record first.
    pub fn replay<'m, M: PersistentMemory + ?Sized>(&self, memory: &'m M) -> Replay<'m, M> {
        // An empty first slot means nothing has ever been written.
        let remaining = match slot_session(memory, &self.region, 0) {
            Ok(EMPTY_SESSION) => 0,
            Ok(_) => self.region.slots(),
            Err(err) => {
                warn!(ring = %self.phase, error = %err, "cannot read ring for replay");
                0
            }
        };
        Replay {
            memory,
            phase: self.phase,
            region: self.region,
            slot: self.head,
            remaining,
        }
    }
}

/// A single pass over a ring's records, oldest first.
///
/// Yields at most one record per slot and skips empty slots. A read failure
/// ends the pass early.
#[derive(Debug)]
pub struct Replay<'m, M: ?Sized> {
    memory: &'m M,
    phase: Phase,
    region: LogRegion,
    slot: usize,
    remaining: usize,
}

impl<M: PersistentMemory + ?Sized> Iterator for Replay<'_, M> {
    type Item = ErrorRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let slot = self.slot;
            self.slot = (slot + 1) % self.region.slots();
            self.remaining -= 1;

            match read_slot(self.memory, &self.region, slot) {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(err) => {
                    warn!(ring = %self.phase, slot, error = %err, "replay stopped");
                    self.remaining = 0;
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// The setup and loop rings over one persistent memory.
#[derive(Debug)]
pub struct FaultLog<M> {
    memory: M,
    setup: NonVolatileLog,
    run: NonVolatileLog,
}

/// Check that the two rings and the session byte can share one memory.
///
/// # Errors
///
/// Returns [`Error::InvalidRegion`] if the rings overlap or either one
/// contains the session byte.
pub fn check_layout(
    setup_region: &LogRegion,
    loop_region: &LogRegion,
    session_address: usize,
) -> Result<()> {
    if setup_region.overlaps(loop_region) {
        return Err(Error::invalid_region(
            loop_region.begin,
            loop_region.end,
            format!("overlaps setup ring {setup_region}"),
        ));
    }
    for region in [setup_region, loop_region] {
        if region.contains(session_address) {
            return Err(Error::invalid_region(
                region.begin,
                region.end,
                format!("contains the session byte at {session_address}"),
            ));
        }
    }
    Ok(())
}

impl<M: PersistentMemory> FaultLog<M> {
    /// Open both rings.
    ///
    /// # Errors
    ///
    /// Returns an error if either region is invalid, the layout fails
    /// [`check_layout`], or the memory cannot be read.
    pub fn open(
        memory: M,
        setup_region: LogRegion,
        loop_region: LogRegion,
        session_address: usize,
        session: SessionId,
    ) -> Result<Self> {
        check_layout(&setup_region, &loop_region, session_address)?;
        let setup = NonVolatileLog::open(&memory, Phase::Setup, setup_region, session)?;
        let run = NonVolatileLog::open(&memory, Phase::Loop, loop_region, session)?;
        Ok(Self { memory, setup, run })
    }

    /// Persist a fault in the ring its kind belongs to.
    ///
    /// A failed write is reported on the diagnostic interface and dropped;
    /// there is no retry.
    pub fn record(&mut self, kind: FaultKind, device_id: u16) -> Option<ErrorRecord> {
        let ring = if kind.is_fatal() {
            &mut self.setup
        } else {
            &mut self.run
        };
        match ring.log(&mut self.memory, kind, device_id) {
            Ok(record) => Some(record),
            Err(err) => {
                error!(ring = %ring.phase(), kind = %kind, error = %err, "fault not persisted");
                None
            }
        }
    }

    /// Replay the setup ring.
    pub fn replay_setup(&self) -> Replay<'_, M> {
        self.setup.replay(&self.memory)
    }

    /// Replay the loop ring.
    pub fn replay_loop(&self) -> Replay<'_, M> {
        self.run.replay(&self.memory)
    }

    /// Emit both rings' history on the diagnostic interface.
    ///
    /// Returns how many records each ring replayed, setup ring first.
    pub fn report_history(&self) -> [usize; 2] {
        let rings = [
            (&self.setup, self.replay_setup()),
            (&self.run, self.replay_loop()),
        ];
        let mut counts = [0usize; 2];
        for ((ring, replay), count) in rings.into_iter().zip(&mut counts) {
            for record in replay {
                info!(ring = %ring.phase(), "history: {record}");
                *count += 1;
            }
            info!(
                ring = %ring.phase(),
                region = %ring.region(),
                head = ring.head(),
                records = *count,
                "fault ring recovered"
            );
        }
        counts
    }

    /// The setup ring.
    #[must_use]
    pub fn setup(&self) -> &NonVolatileLog {
        &self.setup
    }

    /// The loop ring.
    #[must_use]
    pub fn run(&self) -> &NonVolatileLog {
        &self.run
    }

    /// The underlying memory.
    #[must_use]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Release the underlying memory.
    #[must_use]
    pub fn into_memory(self) -> M {
        self.memory
    }
}

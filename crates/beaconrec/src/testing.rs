//! In-memory doubles for the board: medium, ranging peripheral and clock,
//! plus a scoped capture of diagnostic output.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use crate::beacons::{BeaconDescriptor, NetworkId};
use crate::clock::Clock;
use crate::firmware::{Board, Firmware, FirmwareSettings, Runtime};
use crate::nvlog::{FaultLog, LogRegion};
use crate::nvmem::MemoryArena;
use crate::ranging::{Coordinates, DeviceFault, DeviceResult, PositioningOptions, RangingDevice};
use crate::recording::{DurableFile, RecordingMedium};
use crate::session::SessionId;

pub(crate) type TestRuntime = Runtime<MemoryArena, MemoryMedium, ScriptedRanger, ManualClock>;
pub(crate) type TestFirmware = Firmware<MemoryArena, MemoryMedium, ScriptedRanger, ManualClock>;

/// What a test can observe about one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FileState {
    pub bytes: Vec<u8>,
    pub writes: usize,
    pub commits: usize,
}

type Files = Rc<RefCell<BTreeMap<String, FileState>>>;

/// Storage medium kept in memory. Clones share their files.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryMedium {
    files: Files,
    sources: BTreeMap<String, String>,
    write_fails: Rc<Cell<bool>>,
    pub fail_init: bool,
    pub fail_open: bool,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, name: &str, text: &str) {
        self.sources.insert(name.to_string(), text.to_string());
    }

    pub fn file(&self, name: &str) -> Option<FileState> {
        self.files.borrow().get(name).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.borrow().keys().cloned().collect()
    }

    /// Make every write through an open file fail.
    pub fn fail_writes(&self, fail: bool) {
        self.write_fails.set(fail);
    }
}

impl RecordingMedium for MemoryMedium {
    type File = MemoryFile;

    fn init(&mut self) -> io::Result<()> {
        if self.fail_init {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no card"));
        }
        Ok(())
    }

    fn read_source(&mut self, name: &str) -> io::Result<String> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{name} not found")))
    }

    fn open_append(&mut self, name: &str) -> io::Result<MemoryFile> {
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        self.files.borrow_mut().entry(name.to_string()).or_default();
        Ok(MemoryFile {
            name: name.to_string(),
            files: Rc::clone(&self.files),
            write_fails: Rc::clone(&self.write_fails),
        })
    }
}

/// Append handle into a [`MemoryMedium`].
#[derive(Debug)]
pub(crate) struct MemoryFile {
    name: String,
    files: Files,
    write_fails: Rc<Cell<bool>>,
}

impl MemoryFile {
    fn with_state<T>(&self, f: impl FnOnce(&mut FileState) -> T) -> T {
        let mut files = self.files.borrow_mut();
        f(files.entry(self.name.clone()).or_default())
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_fails.get() {
            return Err(io::Error::other("write rejected"));
        }
        self.with_state(|state| {
            state.bytes.extend_from_slice(buf);
            state.writes += 1;
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DurableFile for MemoryFile {
    fn commit(&mut self) -> io::Result<()> {
        self.with_state(|state| state.commits += 1);
        Ok(())
    }
}

/// Ranging peripheral that replays queued fixes and records every request.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedRanger {
    fixes: VecDeque<DeviceResult<Coordinates>>,
    pub connect_fails: bool,
    pub reject_beacon: Option<NetworkId>,
    pub peer_reachable: bool,
    pub cleared: Vec<Option<NetworkId>>,
    pub added: Vec<(Option<NetworkId>, NetworkId)>,
    pub auto_selection: Option<(usize, Option<NetworkId>)>,
    pub positioning_targets: Vec<Option<NetworkId>>,
    pub error_queries: Vec<Option<NetworkId>>,
}

impl ScriptedRanger {
    pub fn new() -> Self {
        Self {
            fixes: VecDeque::new(),
            connect_fails: false,
            reject_beacon: None,
            peer_reachable: true,
            cleared: Vec::new(),
            added: Vec::new(),
            auto_selection: None,
            positioning_targets: Vec::new(),
            error_queries: Vec::new(),
        }
    }

    /// Queue the answer to the next positioning request.
    pub fn push_fix(&mut self, fix: DeviceResult<Coordinates>) {
        self.fixes.push_back(fix);
    }
}

impl RangingDevice for ScriptedRanger {
    fn connect(&mut self) -> DeviceResult<()> {
        if self.connect_fails {
            return Err(DeviceFault::Timeout);
        }
        Ok(())
    }

    fn clear_devices(&mut self, remote: Option<NetworkId>) -> DeviceResult<()> {
        self.cleared.push(remote);
        Ok(())
    }

    fn add_device(
        &mut self,
        beacon: &BeaconDescriptor,
        remote: Option<NetworkId>,
    ) -> DeviceResult<()> {
        if self.reject_beacon == Some(beacon.network_id) {
            return Err(DeviceFault::Failure);
        }
        self.added.push((remote, beacon.network_id));
        Ok(())
    }

    fn enable_auto_selection(
        &mut self,
        count: usize,
        remote: Option<NetworkId>,
    ) -> DeviceResult<()> {
        self.auto_selection = Some((count, remote));
        Ok(())
    }

    fn do_positioning(
        &mut self,
        _options: &PositioningOptions,
        remote: Option<NetworkId>,
    ) -> DeviceResult<Coordinates> {
        self.positioning_targets.push(remote);
        self.fixes
            .pop_front()
            .unwrap_or(Ok(Coordinates::new(100, 200, 300)))
    }

    fn error_code(&mut self, remote: Option<NetworkId>) -> DeviceResult<u8> {
        self.error_queries.push(remote);
        if remote.is_some() && !self.peer_reachable {
            return Err(DeviceFault::Unreachable);
        }
        Ok(0x03)
    }
}

/// Clock moved only by the test and by sleeps.
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
    now: Cell<u32>,
    /// Added to the time on every read, before it is returned.
    pub advance_per_read: u32,
    pub sleeps: Vec<u32>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: u32) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        let now = self.now.get().wrapping_add(self.advance_per_read);
        self.now.set(now);
        now
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.sleeps.push(ms);
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

/// Setup ring used by the test layout: four slots after the session byte.
pub(crate) fn setup_ring() -> LogRegion {
    LogRegion { begin: 4, end: 20 }
}

/// Loop ring used by the test layout: four slots.
pub(crate) fn loop_ring() -> LogRegion {
    LogRegion { begin: 20, end: 36 }
}

pub(crate) fn settings() -> FirmwareSettings {
    FirmwareSettings {
        session_address: 0,
        setup_ring: setup_ring(),
        loop_ring: loop_ring(),
        beacon_source: "BEACONS.TXT".to_string(),
        file_prefix: "REC".to_string(),
        flush_period: 32,
        period_ms: 100,
        positioning: PositioningOptions::default(),
    }
}

pub(crate) fn board(
    memory: MemoryArena,
    medium: MemoryMedium,
    device: ScriptedRanger,
) -> Board<MemoryArena, MemoryMedium, ScriptedRanger, ManualClock> {
    Board {
        memory,
        medium,
        device,
        clock: ManualClock::new(),
    }
}

/// A runtime in session 0 with empty rings and the local device ranging.
pub(crate) fn runtime() -> TestRuntime {
    let session = SessionId::new(0).unwrap();
    Runtime {
        session,
        faults: FaultLog::open(MemoryArena::new(64), setup_ring(), loop_ring(), 0, session)
            .unwrap(),
        medium: MemoryMedium::new(),
        device: ScriptedRanger::new(),
        clock: ManualClock::new(),
        ranging_role: 0,
        beacons: Vec::new(),
    }
}

/// Beacon source with `count` beacons `0x1000..` and, unless `ranging_role`
/// is 0, a ranging-role row for it.
pub(crate) fn beacon_source(count: usize, ranging_role: NetworkId) -> String {
    let mut text = String::from("# network_id, x, y, z, is_ranging_role\n");
    for i in 0..count {
        let offset = i32::try_from(i).unwrap() * 1000;
        text.push_str(&format!("0x{:04X}, {offset}, {}, 1500, 0\n", 0x1000 + i, 2 * offset));
    }
    if ranging_role != 0 {
        text.push_str(&format!("0x{ranging_role:04X}, 0, 0, 0, 1\n"));
    }
    text
}

/// Diagnostic output captured while a closure runs on this thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Run `f` with a subscriber that writes every event into the capture.
    pub(crate) fn capture<R>(f: impl FnOnce() -> R) -> (R, Self) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .with_writer(logs.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, logs)
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_owned)
            .collect()
    }

    pub(crate) fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }

    /// Lines emitted at error level.
    pub(crate) fn errors(&self) -> Vec<String> {
        self.lines_containing("ERROR")
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CapturedWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

//! Boot sequence and runtime context.
//!
//! [`Firmware::boot`] walks the start-up stages in order:
//!
//! 1. assign the session id (before any other persistent access);
//! 2. open both fault rings and replay their history to diagnostics;
//! 3. bring up the storage medium;
//! 4. connect to the ranging peripheral;
//! 5. load and install the beacon geometry;
//! 6. open the session's recording file.
//!
//! A failure in stages 3 to 6 is recorded in the setup ring and leaves the
//! firmware in [`FirmwareState::Halted`], where it makes no further progress
//! until the next boot. Otherwise it is [`FirmwareState::Running`] and
//! [`Firmware::run_for`] drives the ranging loop.

use std::fmt::Display;

use tracing::{error, info};

use crate::beacons::{BeaconConfigLoader, BeaconDescriptor, NetworkId};
use crate::clock::Clock;
use crate::error::Result;
use crate::nvlog::{check_layout, Fault, FaultKind, FaultLog, LogRegion};
use crate::nvmem::PersistentMemory;
use crate::ranging::{PositioningOptions, RangingDevice, LOCAL_DEVICE};
use crate::ranging_loop::{RangingLoop, TickOutcome};
use crate::recording::{RecordingMedium, RecordingSink};
use crate::session::{SessionId, SessionRegistry};

/// Everything boot needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSettings {
    /// Address of the session byte.
    pub session_address: usize,
    /// Ring for setup faults.
    pub setup_ring: LogRegion,
    /// Ring for loop faults.
    pub loop_ring: LogRegion,
    /// Name of the beacon source on the medium.
    pub beacon_source: String,
    /// Recording file name prefix.
    pub file_prefix: String,
    /// Appends between forced commits; 0 disables them.
    pub flush_period: u32,
    /// Ranging loop period.
    pub period_ms: u32,
    /// Options sent with each positioning request.
    pub positioning: PositioningOptions,
}

/// The hardware a firmware instance runs on.
#[derive(Debug)]
pub struct Board<M, S, D, C> {
    /// Non-volatile memory holding the session byte and fault rings.
    pub memory: M,
    /// Durable storage for the beacon source and recordings.
    pub medium: S,
    /// Ranging peripheral.
    pub device: D,
    /// Uptime clock.
    pub clock: C,
}

/// Shared state of a booted device.
#[derive(Debug)]
pub struct Runtime<M, S, D, C> {
    /// This boot's session.
    pub session: SessionId,
    /// Both fault rings.
    pub faults: FaultLog<M>,
    /// Durable storage.
    pub medium: S,
    /// Ranging peripheral.
    pub device: D,
    /// Uptime clock.
    pub clock: C,
    /// Peer performing the ranging; 0 for the local device.
    pub ranging_role: NetworkId,
    /// Beacon geometry installed in the peripheral.
    pub beacons: Vec<BeaconDescriptor>,
}

impl<M: PersistentMemory, S, D, C> Runtime<M, S, D, C> {
    /// Record a setup fault and hand it back as the halt reason.
    ///
    /// The fault itself is mirrored by the fault log; only the cause is
    /// reported here.
    pub(crate) fn fail(
        &mut self,
        kind: FaultKind,
        device_id: NetworkId,
        cause: &dyn Display,
    ) -> Fault {
        error!(session = %self.session, cause = %cause, "setup step failed");
        self.faults.record(kind, device_id);
        Fault::new(kind, device_id)
    }
}

/// Where the firmware is.
#[derive(Debug)]
pub enum FirmwareState<F> {
    /// Boot completed; the loop is ready to tick.
    Running {
        /// The session's recording.
        sink: RecordingSink<F>,
        /// The ranging loop.
        ranging: RangingLoop,
    },
    /// A setup fault stopped the boot.
    Halted {
        /// The fault that stopped it.
        reason: Fault,
    },
}

/// A booted firmware instance.
#[derive(Debug)]
pub struct Firmware<M, S: RecordingMedium, D, C> {
    runtime: Runtime<M, S, D, C>,
    state: FirmwareState<S::File>,
}

impl<M, S, D, C> Firmware<M, S, D, C>
where
    M: PersistentMemory,
    S: RecordingMedium,
    D: RangingDevice,
    C: Clock,
{
    /// Boot the device.
    ///
    /// # Errors
    ///
    /// Returns an error only if the persistent memory itself is unusable:
    /// the rings overlap or cover the session byte, or the session byte or a
    /// ring cannot be read or written. Nothing is written for a bad layout.
    /// Setup faults are not errors: they produce a halted firmware.
    pub fn boot(board: Board<M, S, D, C>, settings: &FirmwareSettings) -> Result<Self> {
        let Board {
            mut memory,
            medium,
            device,
            clock,
        } = board;

        check_layout(&settings.setup_ring, &settings.loop_ring, settings.session_address)?;
        let session = SessionRegistry::new(settings.session_address).assign(&mut memory)?;
        info!(session = %session, "boot");

        let faults = FaultLog::open(
            memory,
            settings.setup_ring,
            settings.loop_ring,
            settings.session_address,
            session,
        )?;
        faults.report_history();

        let mut runtime = Runtime {
            session,
            faults,
            medium,
            device,
            clock,
            ranging_role: LOCAL_DEVICE,
            beacons: Vec::new(),
        };

        let state = match Self::bring_up(&mut runtime, settings) {
            Ok(sink) => {
                info!(session = %session, period_ms = settings.period_ms, "ranging loop started");
                FirmwareState::Running {
                    sink,
                    ranging: RangingLoop::new(settings.period_ms, settings.positioning),
                }
            }
            Err(reason) => {
                info!(session = %session, reason = %reason, "halted");
                FirmwareState::Halted { reason }
            }
        };

        Ok(Self { runtime, state })
    }

    fn bring_up(
        rt: &mut Runtime<M, S, D, C>,
        settings: &FirmwareSettings,
    ) -> std::result::Result<RecordingSink<S::File>, Fault> {
        if let Err(err) = rt.medium.init() {
            return Err(rt.fail(FaultKind::StorageInit, LOCAL_DEVICE, &err));
        }
        if let Err(err) = rt.device.connect() {
            return Err(rt.fail(FaultKind::RangingSubsystemConnect, LOCAL_DEVICE, &err));
        }

        BeaconConfigLoader::new(&settings.beacon_source).load(rt)?;

        match RecordingSink::open(
            &mut rt.medium,
            &settings.file_prefix,
            rt.session,
            settings.flush_period,
        ) {
            Ok(sink) => Ok(sink),
            Err(err) => Err(rt.fail(FaultKind::DataFileOpen, LOCAL_DEVICE, &err)),
        }
    }

    /// Run up to `ticks` loop iterations and return how many ran.
    ///
    /// A halted firmware runs none.
    pub fn run_for(&mut self, ticks: u64) -> u64 {
        let FirmwareState::Running { sink, ranging } = &mut self.state else {
            return 0;
        };
        for _ in 0..ticks {
            ranging.tick(&mut self.runtime, sink);
        }
        ticks
    }

    /// Run one tick, if running.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        match &mut self.state {
            FirmwareState::Running { sink, ranging } => Some(ranging.tick(&mut self.runtime, sink)),
            FirmwareState::Halted { .. } => None,
        }
    }

    /// Run until power loss.
    ///
    /// Returns only when the firmware is halted, with the halt reason.
    pub fn run(&mut self) -> Fault {
        loop {
            if let FirmwareState::Halted { reason } = &self.state {
                return *reason;
            }
            self.tick();
        }
    }

    /// This boot's session.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.runtime.session
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &FirmwareState<S::File> {
        &self.state
    }

    /// The halt reason, if halted.
    #[must_use]
    pub fn halt_reason(&self) -> Option<Fault> {
        match &self.state {
            FirmwareState::Halted { reason } => Some(*reason),
            FirmwareState::Running { .. } => None,
        }
    }

    /// Whether boot ended in a halt.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halt_reason().is_some()
    }

    /// The runtime context.
    #[must_use]
    pub fn runtime(&self) -> &Runtime<M, S, D, C> {
        &self.runtime
    }

    /// The runtime context, mutably.
    pub fn runtime_mut(&mut self) -> &mut Runtime<M, S, D, C> {
        &mut self.runtime
    }

    /// Power off, handing back the runtime context.
    #[must_use]
    pub fn into_runtime(self) -> Runtime<M, S, D, C> {
        self.runtime
    }
}

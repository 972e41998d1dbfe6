//! The periodic ranging loop.
//!
//! Each tick issues one blocking positioning request, appends the fix to the
//! session recording or records the failure in the loop ring, then sleeps
//! out the rest of the period. Nothing that happens here halts the device.

use serde::Serialize;
use tracing::{info, trace, warn};

use crate::clock::Clock;
use crate::firmware::Runtime;
use crate::nvlog::{ErrorRecord, FaultKind};
use crate::nvmem::PersistentMemory;
use crate::ranging::{
    device_name, remote, DeviceFault, PositioningOptions, RangingDevice, LOCAL_DEVICE,
};
use crate::recording::{PositionSample, RecordingMedium, RecordingSink};

/// Where the loop is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Between ticks.
    #[default]
    Idle,
    /// A positioning request is in flight.
    Ranging,
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A fix was taken and handed to the recording.
    Recorded(PositionSample),
    /// Positioning failed; these records were persisted.
    Faulted {
        /// Records written to the loop ring.
        records: Vec<ErrorRecord>,
    },
}

/// Fixed-period driver of positioning requests.
#[derive(Debug, Clone)]
pub struct RangingLoop {
    period_ms: u32,
    options: PositioningOptions,
    state: LoopState,
    ticks: u64,
}

impl RangingLoop {
    /// Create a loop with the given period.
    #[must_use]
    pub fn new(period_ms: u32, options: PositioningOptions) -> Self {
        Self {
            period_ms,
            options,
            state: LoopState::Idle,
            ticks: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Ticks completed.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Tick period in milliseconds.
    #[must_use]
    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    /// Run one tick.
    pub fn tick<M, S, D, C>(
        &mut self,
        rt: &mut Runtime<M, S, D, C>,
        sink: &mut RecordingSink<S::File>,
    ) -> TickOutcome
    where
        M: PersistentMemory,
        S: RecordingMedium,
        D: RangingDevice,
        C: Clock,
    {
        let t0 = rt.clock.now_ms();

        self.state = LoopState::Ranging;
        let result = rt.device.do_positioning(&self.options, remote(rt.ranging_role));
        self.state = LoopState::Idle;

        let outcome = match result {
            Ok(position) => {
                let sample = PositionSample {
                    timestamp_ms: t0,
                    x: position.x,
                    y: position.y,
                    z: position.z,
                };
                info!(
                    "POS [{}] t={}ms ({})",
                    device_name(rt.ranging_role),
                    t0,
                    position
                );
                if let Err(err) = sink.append(&sample) {
                    warn!(file = sink.name(), error = %err, "sample not recorded");
                }
                TickOutcome::Recorded(sample)
            }
            Err(fault) => TickOutcome::Faulted {
                records: Self::record_failure(rt, fault),
            },
        };
        self.ticks += 1;

        let elapsed = rt.clock.now_ms().wrapping_sub(t0);
        let delay = self.period_ms.saturating_sub(elapsed);
        trace!(elapsed, delay, "tick done");
        rt.clock.sleep_ms(delay);

        outcome
    }

    /// Find out which device failed and persist that.
    fn record_failure<M, S, D, C>(
        rt: &mut Runtime<M, S, D, C>,
        fault: DeviceFault,
    ) -> Vec<ErrorRecord>
    where
        M: PersistentMemory,
        D: RangingDevice,
    {
        let peer = rt.ranging_role;
        let mut records = Vec::new();

        if peer != LOCAL_DEVICE {
            match rt.device.error_code(Some(peer)) {
                Ok(code) => {
                    warn!(
                        "positioning error on {} ({fault}): code 0x{code:02x}",
                        device_name(peer)
                    );
                    records.extend(rt.faults.record(FaultKind::PeerError, peer));
                    return records;
                }
                Err(_) => {
                    warn!("positioning error on {} ({fault}): unreachable", device_name(peer));
                    records.extend(rt.faults.record(FaultKind::PeerUnreachable, peer));
                }
            }
        }

        match rt.device.error_code(None) {
            Ok(code) => warn!("positioning error on local device ({fault}): code 0x{code:02x}"),
            Err(err) => warn!("positioning error on local device ({fault}): no error code ({err})"),
        }
        records.extend(rt.faults.record(FaultKind::PeerError, LOCAL_DEVICE));
        records
    }
}

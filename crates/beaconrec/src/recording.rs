//! Durable position recordings.
//!
//! Each boot session appends fixed 16-byte samples to its own file on the
//! storage medium: `[timestamp_ms][x][y][z]`, all little-endian 32-bit
//! integers, millimeters and milliseconds.

use std::io::{self, Write};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::session::SessionId;

/// Size of one encoded sample in bytes.
pub const SAMPLE_SIZE: usize = 16;

/// One recorded position fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionSample {
    /// Uptime when the ranging request was issued.
    pub timestamp_ms: u32,
    /// X in millimeters.
    pub x: i32,
    /// Y in millimeters.
    pub y: i32,
    /// Z in millimeters.
    pub z: i32,
}

impl PositionSample {
    /// Encode into the file layout.
    #[must_use]
    pub fn encode(&self) -> [u8; SAMPLE_SIZE] {
        let mut out = [0u8; SAMPLE_SIZE];
        out[0..4].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        out[4..8].copy_from_slice(&self.x.to_le_bytes());
        out[8..12].copy_from_slice(&self.y.to_le_bytes());
        out[12..16].copy_from_slice(&self.z.to_le_bytes());
        out
    }

    /// Decode one sample.
    #[must_use]
    pub fn decode(bytes: &[u8; SAMPLE_SIZE]) -> Self {
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        Self {
            timestamp_ms: u32::from_le_bytes(word(0)),
            x: i32::from_le_bytes(word(4)),
            y: i32::from_le_bytes(word(8)),
            z: i32::from_le_bytes(word(12)),
        }
    }
}

/// A decoded recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Recording {
    /// Every complete sample, in file order.
    pub samples: Vec<PositionSample>,
    /// Bytes after the last complete sample. A power loss in the middle of
    /// an append leaves a torn sample here.
    pub trailing_bytes: usize,
}

/// Decode a whole recording.
///
/// Complete samples are always returned; a torn tail is counted in
/// [`Recording::trailing_bytes`] and otherwise ignored.
#[must_use]
pub fn decode_recording(bytes: &[u8]) -> Recording {
    let chunks = bytes.chunks_exact(SAMPLE_SIZE);
    let trailing_bytes = chunks.remainder().len();
    let samples = chunks
        .filter_map(|chunk| <&[u8; SAMPLE_SIZE]>::try_from(chunk).ok())
        .map(PositionSample::decode)
        .collect();
    Recording {
        samples,
        trailing_bytes,
    }
}

/// Mean position of a recording, ignoring the first sample.
///
/// The first fix after boot is usually taken before the filter settles.
/// Returns `None` with fewer than two samples.
#[must_use]
pub fn average_position(samples: &[PositionSample]) -> Option<[f64; 3]> {
    let rest = samples.get(1..).filter(|rest| !rest.is_empty())?;
    let mut sum = [0f64; 3];
    for sample in rest {
        sum[0] += f64::from(sample.x);
        sum[1] += f64::from(sample.y);
        sum[2] += f64::from(sample.z);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = rest.len() as f64;
    Some([sum[0] / n, sum[1] / n, sum[2] / n])
}

/// Name of a session's recording file.
#[must_use]
pub fn recording_file_name(prefix: &str, session: SessionId) -> String {
    format!("{prefix}{:03}.DAT", session.get())
}

/// A file on the storage medium that can be forced to physical storage.
pub trait DurableFile: Write {
    /// Force buffered writes to the medium.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium rejects the commit.
    fn commit(&mut self) -> io::Result<()>;
}

/// The durable storage medium (an SD card on the target).
pub trait RecordingMedium {
    /// Append-only file handle.
    type File: DurableFile;

    /// Bring the medium up.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium is absent or unusable.
    fn init(&mut self) -> io::Result<()>;

    /// Read a whole text file, such as the beacon source.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    fn read_source(&mut self, name: &str) -> io::Result<String>;

    /// Open a file for appending, creating it if needed. Existing contents
    /// are never truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    fn open_append(&mut self, name: &str) -> io::Result<Self::File>;
}

/// Appends a session's samples and commits them on a fixed cadence.
#[derive(Debug)]
pub struct RecordingSink<F> {
    name: String,
    file: F,
    flush_period: u32,
    pending: u32,
    appended: u64,
}

impl<F: DurableFile> RecordingSink<F> {
    /// Open the session's recording file.
    ///
    /// `flush_period` is the number of appends between forced commits; 0
    /// disables forced commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot open the file.
    pub fn open<S>(
        medium: &mut S,
        prefix: &str,
        session: SessionId,
        flush_period: u32,
    ) -> io::Result<Self>
    where
        S: RecordingMedium<File = F> + ?Sized,
    {
        let name = recording_file_name(prefix, session);
        let file = medium.open_append(&name)?;
        info!(file = %name, flush_period, "recording opened");
        Ok(Self {
            name,
            file,
            flush_period,
            pending: 0,
            appended: 0,
        })
    }

    /// Append one sample, committing when the cadence is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the commit fails.
    pub fn append(&mut self, sample: &PositionSample) -> Result<()> {
        self.file.write_all(&sample.encode())?;
        self.appended += 1;
        self.pending = self.pending.saturating_add(1);

        if self.flush_period > 0 && self.pending >= self.flush_period {
            self.commit()?;
        }
        Ok(())
    }

    /// Force everything appended so far to the medium.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn commit(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.commit()?;
        debug!(file = %self.name, samples = self.pending, "recording committed");
        self.pending = 0;
        Ok(())
    }

    /// Name of the file on the medium.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends since the last commit.
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Total appends this session.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Appends between forced commits.
    #[must_use]
    pub fn flush_period(&self) -> u32 {
        self.flush_period
    }
}

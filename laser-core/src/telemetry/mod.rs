//! Pulse timing records and rig fault reporting.
//!
//! Each channel keeps a bounded ring of train start/end timestamps so host
//! tooling can audit what was actually emitted. Faults classified anywhere
//! in the command path are funneled into a [`FaultSink`], which the
//! surrounding target persists (append-only file on the host, RAM ring plus
//! diagnostics output on the MCU).

use alloc::string::String;
use core::fmt;

use heapless::HistoryBuf;

use crate::clock::Ticks;

/// Number of pulse-train boundary timestamps retained per channel.
pub const PULSE_HISTORY_DEPTH: usize = 16;

/// Ring of recent train start/end timestamps for one channel.
pub struct PulseHistory {
    starts: HistoryBuf<Ticks, PULSE_HISTORY_DEPTH>,
    ends: HistoryBuf<Ticks, PULSE_HISTORY_DEPTH>,
    total_starts: u32,
    total_ends: u32,
}

impl PulseHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self {
            starts: HistoryBuf::new(),
            ends: HistoryBuf::new(),
            total_starts: 0,
            total_ends: 0,
        }
    }

    /// Records the first edge of a train.
    pub fn record_start(&mut self, at: Ticks) {
        self.starts.write(at);
        self.total_starts = self.total_starts.saturating_add(1);
    }

    /// Records the final de-assertion of a train.
    pub fn record_end(&mut self, at: Ticks) {
        self.ends.write(at);
        self.total_ends = self.total_ends.saturating_add(1);
    }

    /// Timestamp of the most recent train start, if any.
    pub fn last_start(&self) -> Option<Ticks> {
        self.starts.recent().copied()
    }

    /// Timestamp of the most recent train end, if any.
    pub fn last_end(&self) -> Option<Ticks> {
        self.ends.recent().copied()
    }

    /// Lifetime count of recorded train starts.
    pub const fn total_starts(&self) -> u32 {
        self.total_starts
    }

    /// Lifetime count of recorded train ends.
    pub const fn total_ends(&self) -> u32 {
        self.total_ends
    }

    /// Drops all recorded timestamps and counters.
    pub fn clear(&mut self) {
        self.starts.clear();
        self.ends.clear();
        self.total_starts = 0;
        self.total_ends = 0;
    }
}

impl Default for PulseHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Classified failure recorded by the top-level loop fault boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RigFault {
    /// Inbound line was not valid JSON or not a recognized payload shape.
    BadCommand { detail: String },
    /// A per-name configuration section failed to decode.
    BadSection { target: String, detail: String },
    /// A configuration key matched no channel and no trigger.
    UnknownTarget { name: String },
    /// A calibration request named a channel that does not exist or has no DAC.
    BadCalibrationTarget { name: String },
    /// The serial line buffer overflowed without a newline and was dropped.
    LineOverflow { dropped: usize },
    /// A reply frame could not be encoded.
    ReplyEncoding { detail: String },
}

impl RigFault {
    /// Short stable tag identifying the fault class in persisted logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            RigFault::BadCommand { .. } => "bad-command",
            RigFault::BadSection { .. } => "bad-section",
            RigFault::UnknownTarget { .. } => "unknown-target",
            RigFault::BadCalibrationTarget { .. } => "bad-calibration-target",
            RigFault::LineOverflow { .. } => "line-overflow",
            RigFault::ReplyEncoding { .. } => "reply-encoding",
        }
    }
}

impl fmt::Display for RigFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RigFault::BadCommand { detail } => write!(f, "{}: {detail}", self.kind()),
            RigFault::BadSection { target, detail } => {
                write!(f, "{}: {target}: {detail}", self.kind())
            }
            RigFault::UnknownTarget { name } => write!(f, "{}: {name}", self.kind()),
            RigFault::BadCalibrationTarget { name } => write!(f, "{}: {name}", self.kind()),
            RigFault::LineOverflow { dropped } => {
                write!(f, "{}: dropped {dropped} bytes", self.kind())
            }
            RigFault::ReplyEncoding { detail } => write!(f, "{}: {detail}", self.kind()),
        }
    }
}

/// Destination for persisted fault records.
pub trait FaultSink {
    /// Appends one fault record.
    fn record(&mut self, fault: &RigFault);
}

/// Sink that drops every record, for contexts without persistence.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopFaultSink;

impl FaultSink for NoopFaultSink {
    fn record(&mut self, _: &RigFault) {}
}

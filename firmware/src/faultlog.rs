//! RAM-resident fault journal.
//!
//! This target has no filesystem, so the append-only fault log the host
//! tooling expects is kept as a bounded ring of rendered records. Each
//! record is also emitted on the diagnostics channel as it arrives.

#![allow(dead_code)]

use core::fmt::Write as _;

use heapless::{HistoryBuf, String};
use laser_core::telemetry::{FaultSink, RigFault};

/// Maximum rendered length of one record; longer details are truncated.
pub const FAULT_RECORD_LEN: usize = 128;

/// Number of records retained.
pub const FAULT_LOG_DEPTH: usize = 16;

/// Bounded append-only journal of `{kind}: {detail}` fault records.
pub struct FaultRing {
    records: HistoryBuf<String<FAULT_RECORD_LEN>, FAULT_LOG_DEPTH>,
    total: u32,
}

impl FaultRing {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self {
            records: HistoryBuf::new(),
            total: 0,
        }
    }

    /// Lifetime count of recorded faults, including evicted ones.
    pub const fn total(&self) -> u32 {
        self.total
    }

    /// Most recent record, if any.
    pub fn recent(&self) -> Option<&str> {
        self.records.recent().map(|record| record.as_str())
    }

    /// Oldest-first iteration over the retained records.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = &'a str> + 'a {
        self.records.oldest_ordered().map(|record| record.as_str())
    }
}

impl Default for FaultRing {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultSink for FaultRing {
    fn record(&mut self, fault: &RigFault) {
        let mut line: String<FAULT_RECORD_LEN> = String::new();
        // Truncation on overflow is fine; the kind tag always fits.
        let _ = write!(line, "{fault}");
        #[cfg(target_os = "none")]
        defmt::error!("fault: {=str}", line.as_str());
        self.records.write(line);
        self.total = self.total.saturating_add(1);
    }
}

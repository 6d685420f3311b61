//! Port allocator — process-local reservation of free TCP ports.
//!
//! Ports handed out once are never handed out again in the same run, even
//! before anything binds them; the reservation set is cleared by `reset()`
//! at the start of each generation.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use crate::process::port_is_free;

/// Default search range when no preferred port is available.
pub const DEFAULT_PORT_RANGE: Range<u16> = 8000..9000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("no free port available in {start}..{end}", start = .0.start, end = .0.end)]
    Exhausted(Range<u16>),
}

/// Thread-safe free-port reservation.
pub struct PortAllocator {
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        PortAllocator {
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Return the first port that is not yet reserved by this allocator and
    /// binds successfully on 127.0.0.1. Preferred ports are tried before the
    /// fallback range.
    pub fn allocate(&self, preferred: &[u16], range: Range<u16>) -> Result<u16, PortError> {
        let mut reserved = self.reserved.lock().unwrap();

        for port in preferred.iter().copied().chain(range.clone()) {
            if reserved.contains(&port) {
                continue;
            }
            if port_is_free(port) {
                reserved.insert(port);
                debug!(port, "allocated port");
                return Ok(port);
            }
        }
        Err(PortError::Exhausted(range))
    }

    /// Allocate with the default fallback range.
    pub fn allocate_default(&self, preferred: &[u16]) -> Result<u16, PortError> {
        self.allocate(preferred, DEFAULT_PORT_RANGE)
    }

    /// Forget all reservations. Call at the start of a new run.
    pub fn reset(&self) {
        self.reserved.lock().unwrap().clear();
    }

    /// Number of currently reserved ports.
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().unwrap().len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

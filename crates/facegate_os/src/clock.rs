#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;

use facegate_kernel_contracts::MonotonicTimeNs;

/// Time source for decision cycles: monotonic time for ordering and windows,
/// local wall time for the `data_acesso`/`horario_acesso` columns.
pub trait AccessClock: Send + Sync {
    fn now(&self) -> MonotonicTimeNs;
    fn local_date_time(&self) -> NaiveDateTime;
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessClock for SystemClock {
    fn now(&self) -> MonotonicTimeNs {
        // +1 keeps the first reading distinct from the zero default.
        MonotonicTimeNs(self.origin.elapsed().as_nanos() as u64 + 1)
    }

    fn local_date_time(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    mono_ns: AtomicU64,
    wall: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: MonotonicTimeNs, wall: NaiveDateTime) -> Self {
        Self {
            mono_ns: AtomicU64::new(start.0),
            wall: Mutex::new(wall),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        let ns = ms.saturating_mul(1_000_000);
        self.mono_ns.fetch_add(ns, Ordering::SeqCst);
        let mut wall = self.wall.lock();
        *wall += chrono::Duration::milliseconds(ms as i64);
    }
}

impl AccessClock for ManualClock {
    fn now(&self) -> MonotonicTimeNs {
        MonotonicTimeNs(self.mono_ns.load(Ordering::SeqCst))
    }

    fn local_date_time(&self) -> NaiveDateTime {
        *self.wall.lock()
    }
}

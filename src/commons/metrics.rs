//! In-process counters and timers.
//!
//! These only collect values. Exposing them, e.g. in Prometheus format, is
//! left to whoever embeds the engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};


//------------ Counter -------------------------------------------------------

#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Counter {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.get())
    }
}


//------------ Timer ---------------------------------------------------------

/// Keeps the number of timed operations and their total duration.
#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    help: &'static str,
    count: AtomicU64,
    total_micros: AtomicU64,
}

impl Timer {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Timer {
            name,
            help,
            count: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
        }
    }

    /// Runs the given closure and records how long it took.
    pub fn record<F, T>(&self, op: F) -> T
    where
        F: FnOnce() -> T,
    {
        let started = Instant::now();
        let res = op();
        self.observe(started.elapsed());
        res
    }

    pub fn observe(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Duration {
        Duration::from_micros(self.total_micros.load(Ordering::Relaxed))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f, "{} count={} total={}us",
            self.name, self.count(), self.total().as_micros()
        )
    }
}


//============ Tests =========================================================

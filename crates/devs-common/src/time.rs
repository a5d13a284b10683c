//! ---
//! devs_section: "01-common"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Shared primitives for the composition kernel."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Point on the simulation time axis.
///
/// Simulation time is a plain `f64` measured in model units. Ordering uses
/// `f64::total_cmp` so the type can be used as a sort key by schedulers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    pub const fn as_f64(self) -> f64 {
        self.0
    }
}

impl From<f64> for SimTime {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only view of the surrounding simulator's clock.
pub trait TimeSource: Send + Sync {
    fn current_time(&self) -> SimTime;
}

/// Clock advanced explicitly by the driver. Used by tests and simple drivers
/// that do not run a full scheduler.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: RwLock<SimTime>,
}

impl ManualClock {
    pub fn new(start: SimTime) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, time: SimTime) {
        *self.now.write() = time;
    }

    /// Move the clock forward by `delta` model units and return the new time.
    pub fn advance(&self, delta: f64) -> SimTime {
        let mut guard = self.now.write();
        *guard = SimTime(guard.0 + delta);
        *guard
    }
}

impl TimeSource for ManualClock {
    fn current_time(&self) -> SimTime {
        *self.now.read()
    }
}

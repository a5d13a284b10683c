//! ---
//! devs_section: "01-common"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Shared primitives for the composition kernel."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
//! Shared primitives for the DEVS composition workspace.
//! This crate exposes simulation time, configuration loading, and the
//! tracing setup consumed by the kernel and its drivers.

pub mod config;
pub mod logging;
pub mod macros;
pub mod time;

pub use config::{CyclePolicy, KernelConfig, LoggingConfig, ReportingConfig, RoutingConfig};
pub use logging::{init_tracing, LogContext, LogFormat};
pub use time::{ManualClock, SimTime, TimeSource};

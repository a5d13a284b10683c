//! ---
//! devs_section: "01-common"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Shared primitives for the composition kernel."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::time::SimTime;

const LOG_ENV: &str = "DEVS_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for kernel drivers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `DEVS_LOG` overrides the filter (e.g. `info`, `devs_core=trace`). When unset the
///   standard `RUST_LOG` variable is honoured, finally falling back to
///   `config.default_filter`.
/// * A daily rolling JSON file is written next to stdout output when
///   `config.directory` is set.
///
/// Calling this more than once is harmless; only the first subscriber is installed.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to {}",
                LOG_ENV, err, config.default_filter
            );
            EnvFilter::new(&config.default_filter)
        }),
        Err(_) => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_filter)),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let file_appender = daily(
                directory,
                format!("{}-{}.log", config.file_prefix, service_name),
            );
            let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
            let _ = FILE_GUARD.set(file_guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .json()
                    .with_writer(file_writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = ?config.directory,
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Full name of the model the event concerns.
    pub model: Option<&'a str>,
    /// Port name on that model.
    pub port: Option<&'a str>,
    /// Simulation time of the event.
    pub time: Option<SimTime>,
}

impl<'a> LogContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: &'a str) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_port(mut self, port: &'a str) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_time(mut self, time: SimTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Time as a plain float for structured fields; `NaN` when absent.
    pub fn time_value(&self) -> f64 {
        self.time.map(SimTime::as_f64).unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig::default();
        init_tracing("devs-test", &config).expect("first init");
        init_tracing("devs-test", &config).expect("second init");
    }

    #[test]
    fn macros_emit_without_panic() {
        let ctx = LogContext::new()
            .with_model("root.a")
            .with_port("out")
            .with_time(SimTime::new(2.0));
        assert_eq!(ctx.time_value(), 2.0);
        crate::devs_debug!(context = ctx.clone(), "delivered {}", 42);
        crate::devs_warn!(context = ctx, "delivery failed");
        crate::devs_error!("no context");
        assert!(LogContext::new().time_value().is_nan());
    }
}

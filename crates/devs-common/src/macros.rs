//! ---
//! devs_section: "01-common"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Structured log macros carrying model context."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---

/// Emit a trace log enriched with model context.
#[macro_export]
macro_rules! devs_trace {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::TRACE, context = $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::TRACE, context = $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with model context.
#[macro_export]
macro_rules! devs_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::DEBUG, context = $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::DEBUG, context = $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with model context.
#[macro_export]
macro_rules! devs_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::WARN, context = $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::WARN, context = $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error enriched with model context.
#[macro_export]
macro_rules! devs_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::ERROR, context = $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::devs_event!(tracing::Level::ERROR, context = $crate::LogContext::default(), $($arg)+)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! devs_event {
    ($level:expr, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            model = ctx.model.unwrap_or(""),
            port = ctx.port.unwrap_or(""),
            sim_time = ctx.time_value(),
            message = %format_args!($($arg)+)
        );
    }};
}

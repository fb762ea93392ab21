//! ---
//! fsd_section: "03-persistence-logging"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Structured logging adapters and sinks."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---

#[doc(hidden)]
#[macro_export]
macro_rules! __fsd_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            user = ctx.user.unwrap_or(""),
            task = ctx.task.unwrap_or(""),
            scenario = ctx.scenario.unwrap_or(""),
            step = ctx.step.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with dashboard context.
#[macro_export]
macro_rules! fsd_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with dashboard context.
#[macro_export]
macro_rules! fsd_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with dashboard context.
#[macro_export]
macro_rules! fsd_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with dashboard context.
#[macro_export]
macro_rules! fsd_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fsd_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}

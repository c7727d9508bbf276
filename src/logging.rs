//! Logging infrastructure - structured tracing for the marshalling layer
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log level, overridable through `RUST_LOG`
//! - Zero-cost when disabled
//! - Optional JSON output and file output via `tracing-appender`
//! - Span-based performance tracking for native calls

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer flushing until process exit
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable performance tracking
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // TYPTHON_FFI_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("TYPTHON_FFI_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // TYPTHON_FFI_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("TYPTHON_FFI_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("TYPTHON_FFI_LOG_JSON").is_ok();
        config.show_spans = std::env::var("TYPTHON_FFI_LOG_SPANS").is_ok();

        if let Ok(val) = std::env::var("TYPTHON_FFI_LOG_PERF") {
            config.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("typthon_ffi.log".to_string()),
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Parse a level name as used in env vars and config files
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber. If the host already installed a
/// global subscriber, ours is silently skipped.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "typthon_ffi={}",
                config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let writer = match (&config.log_path, config.file_output) {
            (Some(path), true) => file_writer(Path::new(path)),
            _ => BoxMakeWriter::new(io::stderr),
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions))
            .with_line_number(cfg!(debug_assertions));

        let layer = if config.json_format {
            layer.json().with_filter(env_filter).boxed()
        } else {
            layer.with_filter(env_filter).boxed()
        };

        // Ignore error if the host already installed a subscriber
        tracing_subscriber::registry().with(layer).try_init().ok();
    });
}

fn file_writer(path: &Path) -> BoxMakeWriter {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|f| f.to_os_string())
        .unwrap_or_else(|| "typthon_ffi.log".into());

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    FILE_GUARD.set(guard).ok();
    BoxMakeWriter::new(non_blocking)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// FFI-specific logging functions
// ============================================================================

/// Log native function call
#[inline]
pub fn log_ffi_call(address: usize, arg_count: usize) {
    trace!(
        event = "ffi_call",
        address = format_args!("{:#x}", address),
        args = arg_count,
        "native function called"
    );
}

/// Log native function return
#[inline]
pub fn log_ffi_return(address: usize, errno: Option<i32>) {
    trace!(
        event = "ffi_return",
        address = format_args!("{:#x}", address),
        errno = ?errno,
        "native function returned"
    );
}

/// Log a marshalling failure before the native call
pub fn log_ffi_error(address: usize, error: &str) {
    debug!(
        event = "ffi_error",
        address = format_args!("{:#x}", address),
        error = error,
        "argument marshalling failed"
    );
}

/// Log memory allocation
#[inline]
pub fn log_allocation(size: usize, ptr: *const u8) {
    trace!(
        event = "allocation",
        size_bytes = size,
        address = ?ptr,
        "native memory allocated"
    );
}

/// Log memory deallocation
#[inline]
pub fn log_deallocation(ptr: *const u8) {
    trace!(
        event = "deallocation",
        address = ?ptr,
        "native memory released"
    );
}

pub fn log_pool_grow(slots: usize, total: usize) {
    debug!(
        event = "trampoline_pool_grow",
        new_slots = slots,
        total_slots = total,
        "trampoline pool grown"
    );
}

#[inline]
pub fn log_trampoline_bind(code: usize, params: usize) {
    trace!(
        event = "trampoline_bind",
        code = format_args!("{:#x}", code),
        params = params,
        "trampoline bound"
    );
}

#[inline]
pub fn log_trampoline_release(code: usize) {
    trace!(
        event = "trampoline_release",
        code = format_args!("{:#x}", code),
        "trampoline returned to pool"
    );
}

/// Log a managed callback failure raised from native code
pub fn log_callback_error(code: usize, error: &str) {
    warn!(
        event = "callback_error",
        code = format_args!("{:#x}", code),
        error = error,
        "managed callback failed, returning zeroed result"
    );
}

pub fn log_library_open(name: &str, flags: i32) {
    debug!(
        event = "library_open",
        library = name,
        flags = flags,
        "shared library opened"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

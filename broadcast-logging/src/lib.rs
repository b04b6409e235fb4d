//! Structured logging setup for broadcast components

use std::fmt::Write;

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize structured logging for a broadcast component
///
/// This sets up:
/// - JSON formatted logs (for production)
/// - Environment-based log level filtering (`RUST_LOG` wins over `default_level`)
/// - Component name tagging
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(component: &str, default_level: &str) -> bool {
    let installed = tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(component, "Logging initialized");
    }
    installed
}

/// Initialize simple console logging (for development and tests)
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_console_logging(component: &str, default_level: &str) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(component, "Console logging initialized");
    }
    installed
}

/// Render `buf` as lowercase hex, `separator` after every byte and a line
/// break after every `bytes_per_line` bytes.
pub fn hex_dump(buf: &[u8], separator: &str, bytes_per_line: usize) -> String {
    let mut out = String::with_capacity(buf.len() * (2 + separator.len()) + buf.len() / 8);
    for (i, byte) in buf.iter().enumerate() {
        let _ = write!(out, "{:02x}{}", byte, separator);
        if bytes_per_line > 0 && i % bytes_per_line == bytes_per_line - 1 {
            out.push('\n');
        }
    }
    out
}

/// Emit a hex dump of `buf` at debug level.
pub fn dump_buffer(desc: &str, buf: &[u8], separator: &str, bytes_per_line: usize) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(size = buf.len(), "{}:\n{}", desc, hex_dump(buf, separator, bytes_per_line));
    }
}

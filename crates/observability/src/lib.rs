//! Tracing/logging setup shared by every `queuectl` entry point.

/// Initialize process-wide tracing with the given output format.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}

pub use tracing::LogFormat;

/// Tracing configuration (filters, formats).
pub mod tracing;

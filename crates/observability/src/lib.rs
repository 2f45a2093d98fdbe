//! Tracing/logging setup shared by taskhive binaries and tests.

/// Initialize process-wide tracing with the format chosen by `TASKHIVE_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    crate::tracing::init(crate::tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

//! Log format versions
//!
//! Every segment file carries the format version it was written in. This
//! build writes `LOG_VERSION_CURRENT` and can read back to
//! `LOG_VERSION_MIN_SUPPORTED`. Logs from versions at or above
//! `LOG_VERSION_MIN_DIRTY_RECOVERY` can still go through ordinary crash
//! recovery when the previous shutdown was not clean; anything older must
//! have been shut down cleanly before it can be upgraded.

/// Format version written by this build.
pub const LOG_VERSION_CURRENT: u32 = 29;

/// Oldest format version this build can upgrade from.
pub const LOG_VERSION_MIN_SUPPORTED: u32 = 21;

/// Oldest format version that crash recovery can replay directly.
pub const LOG_VERSION_MIN_DIRTY_RECOVERY: u32 = 25;

/// Version implied by a segment name without a version suffix.
pub const LOG_VERSION_LEGACY: u32 = 1;

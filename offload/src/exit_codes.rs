//! Stable exit codes for offload CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid config, arguments, or I/O errors.
pub const INVALID: i32 = 1;
/// `offload check-log` found damaged lines, or `offload plan --dry-run`
/// had a script fail verification.
pub const UNVERIFIED: i32 = 2;

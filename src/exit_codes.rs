//! Exit code constants for the gslock CLI.
//!
//! gslock only has two codes of its own:
//! - 0: Success (the guarded command exited 0)
//! - 1: Failure (bad args, malformed location, storage or spawn errors)
//!
//! Every other status is the guarded command's own exit code, passed through.

/// Any failure that gslock itself reports.
pub const FAILURE: i32 = 1;

/// Offset added to a signal number when the child was killed by a signal.
pub const SIGNAL_BASE: i32 = 128;


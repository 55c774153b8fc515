//! Exit code contract
//!
//! Scripts depend on these; change them only with a major version.

/// Transfer completed
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, missing file, malformed code
pub const USER_ERROR: i32 = 1;

/// Transport failure: could not connect, connection lost, relay refused
pub const TRANSPORT_FAILURE: i32 = 2;

/// Authentication failure: PAKE mismatch, signature invalid, session abort
pub const AUTH_FAILURE: i32 = 3;

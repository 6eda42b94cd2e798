//! Constant variables.

/// Width of a ring identifier in bits.
pub const ID_BITS: usize = 256;
/// Width of a ring identifier in bytes.
pub const ID_BYTES: usize = ID_BITS / 8;
/// Default length of the successor list (replication factor R).
pub const DEFAULT_SUCCESSOR_LIST_SIZE: usize = 3;
pub const DEFAULT_STABILIZE_INTERVAL_MS: u64 = 30 * 1000;
pub const DEFAULT_FIX_FINGERS_INTERVAL_MS: u64 = 30 * 1000;
pub const DEFAULT_CHECK_PREDECESSOR_INTERVAL_MS: u64 = 30 * 1000;
/// default rpc timeout in ms
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 180 * 1000;
pub const DEFAULT_CONNECT_RATE_LIMIT_MS: u64 =
    chordring_transport::core::transport::DEFAULT_CONNECT_RATE_LIMIT_MS;
pub const DEFAULT_CONNECTION_OPEN_TIMEOUT_MS: u64 =
    chordring_transport::core::transport::DEFAULT_CONNECTION_OPEN_TIMEOUT_MS;
/// A lookup is tried through this many hops before it fails.
pub const LOOKUP_ATTEMPTS: usize = 2;

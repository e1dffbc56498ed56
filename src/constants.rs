//! Core constants used across the mock replica set.

use std::time::Duration;

/// Default bounded wait for a request to arrive on the shared queue
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Logical replica-set name embedded in every handshake response
pub const REPLICA_SET_NAME: &str = "rs";

/// Address members bind to; port 0 picks an unused port per member
pub const BIND_ADDR: &str = "127.0.0.1:0";

/// Upper bound on a single wire message (48 MB, matching the protocol's
/// historical maxMessageSizeBytes)
pub const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

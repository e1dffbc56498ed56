//! Mock replica set test double for binary-wire database clients.
//!
//! Spins up independent localhost listeners, organizes them into a
//! simulated primary/secondary/arbiter topology, and lets a test program
//! assert on exactly which requests arrive and script exactly which
//! responses go back, including topology-discovery handshakes.
//!
//! ## Components
//!
//! | Component | Type | Role |
//! |-----------|------|------|
//! | Replica set façade | [`MockReplicaSet`] | create, run, receive, reply, destroy |
//! | Member | [`MockServer`] | one listener with an ordered responder chain |
//! | Request handle | [`Request`] | owned, poppable, match-and-reply |
//! | Shared queue | [`SyncQueue`] | cross-member FIFO with bounded-wait pop |
//!
//! ## Example
//!
//! ```no_run
//! use replmock::{MockReplicaSet, wire};
//! use serde_json::json;
//!
//! let mut rs = MockReplicaSet::with_auto_hello(4, 2, 0);
//! rs.run().unwrap();
//!
//! // connect a client under test to rs.uri() ...
//!
//! if let Some(request) =
//!     rs.receives_query("db.coll", wire::QUERY_NONE, 0, 1, &json!({"x": 1}), None)
//! {
//!     rs.replies(request, 0, 0, 0, 1, &[json!({"x": 1})]).unwrap();
//! }
//! rs.shutdown();
//! ```
//!
//! Handshake requests never reach the queue; members answer them in
//! place with per-role canned documents carrying the full host list, so
//! a client discovers the whole topology from any one member.

#![warn(missing_docs)]

pub mod constants;
pub mod doc;
pub mod error;
pub mod replica_set;
pub mod request;
pub mod server;
pub mod sync_queue;
mod topology;
pub mod wire;

pub use doc::Document;
pub use error::{MockError, Result};
pub use replica_set::{MemberRole, MockReplicaSet};
pub use request::Request;
pub use server::{AutoResponder, MockServer};
pub use sync_queue::SyncQueue;

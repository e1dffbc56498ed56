//! The mock replica set façade: member pool assembly, the shared request
//! queue, receive/match/reply, and join-before-release teardown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{DEFAULT_REQUEST_TIMEOUT, REPLICA_SET_NAME};
use crate::doc::Document;
use crate::error::{MockError, Result};
use crate::request::Request;
use crate::server::MockServer;
use crate::sync_queue::SyncQueue;
use crate::topology::TopologyScripter;

/// Role of one member within the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// The single writable member
    Primary,
    /// A replicating read-only member
    Secondary,
    /// A voting member holding no data
    Arbiter,
}

struct Member {
    role: MemberRole,
    server: MockServer,
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Destroyed,
}

/// A simulated replica set: one primary, N secondaries, M arbiters, each
/// an independent listener, plus one shared FIFO of unhandled requests.
///
/// Lifecycle is linear: create, [`run`](MockReplicaSet::run), drive the
/// test, [`shutdown`](MockReplicaSet::shutdown) (or drop). `uri`,
/// `hosts`, `receives_*` and `replies` are valid only while Running.
pub struct MockReplicaSet {
    max_wire_version: i32,
    n_secondaries: usize,
    n_arbiters: usize,
    members: Vec<Member>,
    queue: Arc<SyncQueue<Request>>,
    hosts_str: String,
    uri: String,
    request_timeout: Duration,
    verbose: bool,
    state: State,
}

impl MockReplicaSet {
    /// A new mock replica set whose members each auto-answer the topology
    /// handshake. Call [`run`](MockReplicaSet::run) to start it, then
    /// [`uri`](MockReplicaSet::uri) to connect a client.
    pub fn with_auto_hello(max_wire_version: i32, n_secondaries: usize, n_arbiters: usize) -> Self {
        Self {
            max_wire_version,
            n_secondaries,
            n_arbiters,
            members: Vec::new(),
            queue: Arc::new(SyncQueue::new()),
            hosts_str: String::new(),
            uri: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            verbose: false,
            state: State::Created,
        }
    }

    /// Tell the set whether to log traffic during normal operation.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
        for member in &self.members {
            member.server.set_verbose(verbose);
        }
    }

    /// Change the bounded wait used by `receives_*` (default 100 ms).
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    /// Start every member listening on an unused port, wire the shared
    /// queue, and install the per-role handshake responders.
    ///
    /// Member order is fixed forever: primary first, then secondaries,
    /// then arbiters. A bind failure is fatal and propagated.
    pub fn run(&mut self) -> Result<()> {
        if self.state != State::Created {
            debug_assert!(false, "MockReplicaSet::run called twice");
            return Err(MockError::state("run called twice"));
        }

        let mut members = Vec::with_capacity(1 + self.n_secondaries + self.n_arbiters);
        members.push(start_member(MemberRole::Primary)?);
        for _ in 0..self.n_secondaries {
            members.push(start_member(MemberRole::Secondary)?);
        }
        for _ in 0..self.n_arbiters {
            members.push(start_member(MemberRole::Arbiter)?);
        }

        // Catch-all first, so it runs last, after the handshake responder.
        for member in &members {
            let queue = self.queue.clone();
            member.server.autoresponds(Box::new(move |request| {
                queue.push(request);
                None
            }));
        }

        // All ports are bound now; the host list and URI are final.
        let hosts: Vec<String> = members.iter().map(|m| m.server.host_and_port()).collect();
        self.hosts_str = hosts.join(",");
        self.uri = format!(
            "mongodb://{}/?replicaSet={}",
            self.hosts_str, REPLICA_SET_NAME
        );

        let scripter = TopologyScripter::new(REPLICA_SET_NAME, self.max_wire_version, hosts);
        for member in &members {
            member.server.auto_hello(scripter.hello_document(member.role));
            member.server.set_verbose(self.verbose);
        }

        self.members = members;
        self.state = State::Running;
        debug!(uri = %self.uri, "mock replica set running");
        Ok(())
    }

    /// Connection string listing every member, tagged with the set name.
    /// Valid only while Running.
    pub fn uri(&self) -> &str {
        debug_assert_eq!(self.state, State::Running, "uri before run");
        &self.uri
    }

    /// Comma-joined "host:port" list in member order (primary first,
    /// then secondaries, then arbiters). Valid only while Running.
    pub fn hosts(&self) -> &str {
        debug_assert_eq!(self.state, State::Running, "hosts before run");
        &self.hosts_str
    }

    /// Pop the next unhandled request and match it against an expected
    /// query shape (loose document comparison; use
    /// [`Request::matches_query`] directly for key-order-strict matching).
    ///
    /// Returns `None` on mismatch or when no request arrives within the
    /// configured timeout; both outcomes are logged distinctly.
    pub fn receives_query(
        &self,
        ns: &str,
        flags: u32,
        skip: i32,
        n_return: i32,
        query: &Document,
        fields: Option<&Document>,
    ) -> Option<Request> {
        let request = self.pop_request()?;
        if request.matches_query(ns, flags, skip, n_return, query, fields, false) {
            Some(request)
        } else {
            None
        }
    }

    /// Pop the next unhandled request and match it against an expected
    /// single-id kill-cursors. Multi-id kills are unsupported and never
    /// match. Returns `None` on mismatch or timeout.
    pub fn receives_kill_cursors(&self, cursor_id: i64) -> Option<Request> {
        let request = self.pop_request()?;
        if request.matches_kill_cursors(cursor_id) {
            Some(request)
        } else {
            None
        }
    }

    /// Send a scripted reply to a previously received request.
    #[allow(clippy::too_many_arguments)]
    pub fn replies(
        &self,
        request: Request,
        flags: u32,
        cursor_id: i64,
        starting_from: i32,
        number_returned: i32,
        docs: &[Document],
    ) -> Result<()> {
        debug_assert_eq!(self.state, State::Running, "replies before run");
        request.replies(flags, cursor_id, starting_from, number_returned, docs)
    }

    /// Stop and join every member, then release the queue. Members are
    /// joined strictly first so no accept or connection thread can push
    /// into a queue that is shutting down. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if self.state == State::Destroyed {
            return;
        }
        for member in &mut self.members {
            member.server.stop();
        }
        self.members.clear();
        self.queue.shutdown();
        self.state = State::Destroyed;
    }

    fn pop_request(&self) -> Option<Request> {
        debug_assert_eq!(self.state, State::Running, "receive before run");
        match self.queue.pop(self.request_timeout) {
            Some(request) => Some(request),
            None => {
                warn!(
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "timed out waiting for a client request"
                );
                None
            }
        }
    }
}

impl Drop for MockReplicaSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_member(role: MemberRole) -> Result<Member> {
    let mut server = MockServer::new();
    server.run()?;
    Ok(Member { role, server })
}

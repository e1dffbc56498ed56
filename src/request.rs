//! Pending client requests: the owned handles popped from the shared
//! queue, their structural matchers, and the scripted-reply path.

use std::net::SocketAddr;

use tracing::warn;

use crate::doc::{docs_equal, Document};
use crate::error::Result;
use crate::server::ConnectionHandle;
use crate::wire::{MessageBody, WireMessage};

/// One client request no member auto-answered.
///
/// Owned by whoever pops it from the queue. Dropping it releases it;
/// [`replies`](Request::replies) consumes it, so a request can be answered
/// at most once and never after release.
pub struct Request {
    body: MessageBody,
    request_id: i32,
    client_addr: SocketAddr,
    server_host: String,
    conn: ConnectionHandle,
}

impl Request {
    pub(crate) fn new(
        msg: WireMessage,
        client_addr: SocketAddr,
        server_host: String,
        conn: ConnectionHandle,
    ) -> Self {
        Self {
            body: msg.body,
            request_id: msg.header.request_id,
            client_addr,
            server_host,
            conn,
        }
    }

    /// Decoded payload of the request.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Wire id the client assigned to this request.
    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    /// Address of the client connection that sent this request.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// "host:port" of the member that received this request.
    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    /// Short description for traffic logs.
    pub fn describe(&self) -> String {
        match &self.body {
            MessageBody::Query { ns, query, .. } => {
                format!("query {} {}", ns, query)
            }
            MessageBody::KillCursors { cursor_ids } => {
                format!("kill_cursors {:?}", cursor_ids)
            }
            MessageBody::Other { op_code } => format!("opcode {}", op_code),
        }
    }

    /// Structurally compare this request against an expected query shape.
    ///
    /// `strict` makes document comparison sensitive to key order. An
    /// expected `fields` of `None` matches only a request that carried no
    /// selector. Logs the first divergent field on mismatch.
    #[allow(clippy::too_many_arguments)]
    pub fn matches_query(
        &self,
        exp_ns: &str,
        exp_flags: u32,
        exp_skip: i32,
        exp_n_return: i32,
        exp_query: &Document,
        exp_fields: Option<&Document>,
        strict: bool,
    ) -> bool {
        let (ns, flags, skip, n_return, query, fields) = match &self.body {
            MessageBody::Query {
                ns,
                flags,
                skip,
                n_return,
                query,
                fields,
            } => (ns, flags, skip, n_return, query, fields),
            other => {
                warn!(got = %self.describe(), "expected a query, got {:?}", other);
                return false;
            }
        };

        if ns != exp_ns {
            warn!(expected = exp_ns, actual = %ns, "query namespace mismatch");
            return false;
        }
        if *flags != exp_flags {
            warn!(expected = exp_flags, actual = *flags, "query flags mismatch");
            return false;
        }
        if *skip != exp_skip {
            warn!(expected = exp_skip, actual = *skip, "query skip mismatch");
            return false;
        }
        if *n_return != exp_n_return {
            warn!(expected = exp_n_return, actual = *n_return, "query n_return mismatch");
            return false;
        }
        if !docs_equal(exp_query, query, strict) {
            warn!(expected = %exp_query, actual = %query, "query document mismatch");
            return false;
        }
        match (exp_fields, fields) {
            (None, None) => {}
            (Some(exp), Some(actual)) => {
                if !docs_equal(exp, actual, strict) {
                    warn!(expected = %exp, actual = %actual, "fields selector mismatch");
                    return false;
                }
            }
            (Some(exp), None) => {
                warn!(expected = %exp, "fields selector missing from request");
                return false;
            }
            (None, Some(actual)) => {
                warn!(actual = %actual, "request carried an unexpected fields selector");
                return false;
            }
        }
        true
    }

    /// Compare this request against an expected single-id kill-cursors.
    ///
    /// Multi-id kills are not supported: a request carrying more than one
    /// cursor id never matches, and the diagnostic names the id count.
    pub fn matches_kill_cursors(&self, exp_cursor_id: i64) -> bool {
        let cursor_ids = match &self.body {
            MessageBody::KillCursors { cursor_ids } => cursor_ids,
            other => {
                warn!(got = %self.describe(), "expected kill_cursors, got {:?}", other);
                return false;
            }
        };
        if cursor_ids.len() != 1 {
            warn!(
                count = cursor_ids.len(),
                "kill_cursors id-count mismatch (only single-id kills are supported)"
            );
            return false;
        }
        if cursor_ids[0] != exp_cursor_id {
            warn!(
                expected = exp_cursor_id,
                actual = cursor_ids[0],
                "kill_cursors cursor id mismatch"
            );
            return false;
        }
        true
    }

    /// Send a scripted `OP_REPLY` back on the originating connection,
    /// consuming the request.
    pub fn replies(
        self,
        flags: u32,
        cursor_id: i64,
        starting_from: i32,
        number_returned: i32,
        docs: &[Document],
    ) -> Result<()> {
        self.conn.send_reply(
            self.request_id,
            flags,
            cursor_id,
            starting_from,
            number_returned,
            docs,
        )
    }
}

//! Legacy binary wire protocol: framing, opcodes, message encode/decode.
//!
//! Every message starts with a 16-byte little-endian header (total length,
//! request id, response-to, opcode). This module understands `OP_QUERY`
//! and `OP_KILL_CURSORS` on the inbound path and `OP_REPLY` on the
//! outbound path; anything else is surfaced as an opaque message so the
//! catch-all responder still sees it.

use std::io::{Cursor, Read, Write};

use crate::constants::MAX_MESSAGE_SIZE;
use crate::doc::{document_len, read_document, write_document, Document};
use crate::error::{MockError, Result};

/// Server-to-client reply to a query
pub const OP_REPLY: i32 = 1;
/// Client query against a namespace
pub const OP_QUERY: i32 = 2004;
/// Client request to close server-side cursors
pub const OP_KILL_CURSORS: i32 = 2007;

/// No query flags set
pub const QUERY_NONE: u32 = 0;
/// Cursor stays open after the first batch is exhausted
pub const QUERY_TAILABLE_CURSOR: u32 = 1 << 1;
/// Query may run against a secondary
pub const QUERY_SECONDARY_OK: u32 = 1 << 2;
/// Server keeps an idle cursor alive indefinitely
pub const QUERY_NO_CURSOR_TIMEOUT: u32 = 1 << 4;
/// Tailable cursor blocks awaiting new data
pub const QUERY_AWAIT_DATA: u32 = 1 << 5;
/// Stream multiple batches without further get-mores
pub const QUERY_EXHAUST: u32 = 1 << 6;

/// Reply flag: the requested cursor id is unknown to the server
pub const REPLY_CURSOR_NOT_FOUND: u32 = 1;
/// Reply flag: the query failed; the single document carries the error
pub const REPLY_QUERY_FAILURE: u32 = 1 << 1;

/// Fixed 16-byte message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message length in bytes, header included
    pub message_length: i32,
    /// Sender-assigned id for this message
    pub request_id: i32,
    /// Id of the request this message answers, 0 if unsolicited
    pub response_to: i32,
    /// One of the `OP_*` opcodes
    pub op_code: i32,
}

impl MessageHeader {
    /// Serialize the header.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.message_length.to_le_bytes())?;
        w.write_all(&self.request_id.to_le_bytes())?;
        w.write_all(&self.response_to.to_le_bytes())?;
        w.write_all(&self.op_code.to_le_bytes())?;
        Ok(())
    }
}

/// Decoded payload of one inbound message
#[derive(Debug, Clone)]
pub enum MessageBody {
    /// An `OP_QUERY` against a namespace
    Query {
        /// Full namespace, "db.collection"
        ns: String,
        /// `QUERY_*` flag bits
        flags: u32,
        /// Number of documents to skip
        skip: i32,
        /// Requested batch size (0 = server default)
        n_return: i32,
        /// The query document
        query: Document,
        /// Optional projection selector
        fields: Option<Document>,
    },
    /// An `OP_KILL_CURSORS` carrying one or more cursor ids
    KillCursors {
        /// Cursor ids the client wants closed
        cursor_ids: Vec<i64>,
    },
    /// Any opcode this double does not model; body bytes are discarded
    Other {
        /// The unrecognized opcode
        op_code: i32,
    },
}

/// One decoded inbound message
#[derive(Debug, Clone)]
pub struct WireMessage {
    /// The framing header as received
    pub header: MessageHeader,
    /// The decoded payload
    pub body: MessageBody,
}

/// Read one message from the stream.
///
/// Returns `Ok(None)` on a clean end-of-stream at a message boundary.
/// A connection torn down mid-header is a protocol error.
pub fn read_message<R: Read>(r: &mut R) -> Result<Option<WireMessage>> {
    let mut head = [0u8; 16];
    let mut filled = 0;
    while filled < head.len() {
        let n = r.read(&mut head[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(MockError::protocol("connection closed mid-header"));
        }
        filled += n;
    }

    let header = MessageHeader {
        message_length: i32::from_le_bytes(head[0..4].try_into().unwrap()),
        request_id: i32::from_le_bytes(head[4..8].try_into().unwrap()),
        response_to: i32::from_le_bytes(head[8..12].try_into().unwrap()),
        op_code: i32::from_le_bytes(head[12..16].try_into().unwrap()),
    };

    if header.message_length < 16 || header.message_length as usize > MAX_MESSAGE_SIZE {
        return Err(MockError::protocol(format!(
            "message length {} out of range",
            header.message_length
        )));
    }

    let mut body = vec![0u8; header.message_length as usize - 16];
    r.read_exact(&mut body)?;
    let mut body = Cursor::new(body);

    let body = match header.op_code {
        OP_QUERY => read_query_body(&mut body)?,
        OP_KILL_CURSORS => read_kill_cursors_body(&mut body)?,
        other => MessageBody::Other { op_code: other },
    };

    Ok(Some(WireMessage { header, body }))
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_cstring<R: Read>(r: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).map_err(|_| MockError::protocol("namespace is not UTF-8"))
}

fn read_query_body(r: &mut Cursor<Vec<u8>>) -> Result<MessageBody> {
    let flags = read_i32(r)? as u32;
    let ns = read_cstring(r)?;
    let skip = read_i32(r)?;
    let n_return = read_i32(r)?;
    let query = read_document(r)?;
    let fields = if r.position() < r.get_ref().len() as u64 {
        Some(read_document(r)?)
    } else {
        None
    };
    Ok(MessageBody::Query {
        ns,
        flags,
        skip,
        n_return,
        query,
        fields,
    })
}

fn read_kill_cursors_body(r: &mut Cursor<Vec<u8>>) -> Result<MessageBody> {
    let _zero = read_i32(r)?;
    let count = read_i32(r)?;
    if count < 0 {
        return Err(MockError::protocol("negative cursor-id count"));
    }
    let mut cursor_ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        cursor_ids.push(read_i64(r)?);
    }
    Ok(MessageBody::KillCursors { cursor_ids })
}

/// Encode and send an `OP_QUERY`.
#[allow(clippy::too_many_arguments)]
pub fn write_query<W: Write>(
    w: &mut W,
    request_id: i32,
    ns: &str,
    flags: u32,
    skip: i32,
    n_return: i32,
    query: &Document,
    fields: Option<&Document>,
) -> Result<()> {
    let mut len = 16 + 4 + ns.len() + 1 + 4 + 4 + document_len(query)?;
    if let Some(fields) = fields {
        len += document_len(fields)?;
    }
    let header = MessageHeader {
        message_length: len as i32,
        request_id,
        response_to: 0,
        op_code: OP_QUERY,
    };
    header.write(w)?;
    w.write_all(&(flags as i32).to_le_bytes())?;
    w.write_all(ns.as_bytes())?;
    w.write_all(&[0])?;
    w.write_all(&skip.to_le_bytes())?;
    w.write_all(&n_return.to_le_bytes())?;
    write_document(w, query)?;
    if let Some(fields) = fields {
        write_document(w, fields)?;
    }
    w.flush()?;
    Ok(())
}

/// Encode and send an `OP_KILL_CURSORS`.
pub fn write_kill_cursors<W: Write>(w: &mut W, request_id: i32, cursor_ids: &[i64]) -> Result<()> {
    let len = 16 + 4 + 4 + 8 * cursor_ids.len();
    let header = MessageHeader {
        message_length: len as i32,
        request_id,
        response_to: 0,
        op_code: OP_KILL_CURSORS,
    };
    header.write(w)?;
    w.write_all(&0i32.to_le_bytes())?;
    w.write_all(&(cursor_ids.len() as i32).to_le_bytes())?;
    for id in cursor_ids {
        w.write_all(&id.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

/// Encode and send an `OP_REPLY`.
#[allow(clippy::too_many_arguments)]
pub fn write_reply<W: Write>(
    w: &mut W,
    request_id: i32,
    response_to: i32,
    flags: u32,
    cursor_id: i64,
    starting_from: i32,
    number_returned: i32,
    docs: &[Document],
) -> Result<()> {
    let mut len = 16 + 4 + 8 + 4 + 4;
    for doc in docs {
        len += document_len(doc)?;
    }
    let header = MessageHeader {
        message_length: len as i32,
        request_id,
        response_to,
        op_code: OP_REPLY,
    };
    header.write(w)?;
    w.write_all(&(flags as i32).to_le_bytes())?;
    w.write_all(&cursor_id.to_le_bytes())?;
    w.write_all(&starting_from.to_le_bytes())?;
    w.write_all(&number_returned.to_le_bytes())?;
    for doc in docs {
        write_document(w, doc)?;
    }
    w.flush()?;
    Ok(())
}

/// Decoded `OP_REPLY`, used by test clients to assert on scripted replies.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The framing header as received
    pub header: MessageHeader,
    /// `REPLY_*` flag bits
    pub flags: u32,
    /// Server cursor id, 0 if the batch is final
    pub cursor_id: i64,
    /// Offset of the first returned document
    pub starting_from: i32,
    /// Number of documents in this reply
    pub number_returned: i32,
    /// The returned documents
    pub docs: Vec<Document>,
}

/// Read one `OP_REPLY` from the stream.
pub fn read_reply<R: Read>(r: &mut R) -> Result<Reply> {
    let mut head = [0u8; 16];
    r.read_exact(&mut head)?;
    let header = MessageHeader {
        message_length: i32::from_le_bytes(head[0..4].try_into().unwrap()),
        request_id: i32::from_le_bytes(head[4..8].try_into().unwrap()),
        response_to: i32::from_le_bytes(head[8..12].try_into().unwrap()),
        op_code: i32::from_le_bytes(head[12..16].try_into().unwrap()),
    };
    if header.op_code != OP_REPLY {
        return Err(MockError::protocol(format!(
            "expected OP_REPLY, got opcode {}",
            header.op_code
        )));
    }
    if header.message_length < 36 || header.message_length as usize > MAX_MESSAGE_SIZE {
        return Err(MockError::protocol(format!(
            "reply length {} out of range",
            header.message_length
        )));
    }
    let mut body = vec![0u8; header.message_length as usize - 16];
    r.read_exact(&mut body)?;
    let mut body = Cursor::new(body);

    let flags = read_i32(&mut body)? as u32;
    let cursor_id = read_i64(&mut body)?;
    let starting_from = read_i32(&mut body)?;
    let number_returned = read_i32(&mut body)?;
    let mut docs = Vec::with_capacity(number_returned.max(0) as usize);
    for _ in 0..number_returned {
        docs.push(read_document(&mut body)?);
    }
    Ok(Reply {
        header,
        flags,
        cursor_id,
        starting_from,
        number_returned,
        docs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_roundtrip() {
        let mut buf = Vec::new();
        let query = json!({"x": 1});
        let fields = json!({"_id": 0});
        write_query(&mut buf, 7, "db.coll", QUERY_SECONDARY_OK, 2, 5, &query, Some(&fields))
            .unwrap();

        let msg = read_message(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(msg.header.request_id, 7);
        assert_eq!(msg.header.op_code, OP_QUERY);
        match msg.body {
            MessageBody::Query {
                ns,
                flags,
                skip,
                n_return,
                query: q,
                fields: f,
            } => {
                assert_eq!(ns, "db.coll");
                assert_eq!(flags, QUERY_SECONDARY_OK);
                assert_eq!(skip, 2);
                assert_eq!(n_return, 5);
                assert_eq!(q, query);
                assert_eq!(f, Some(fields));
            }
            other => panic!("wrong body: {:?}", other),
        }
    }

    #[test]
    fn test_query_without_fields() {
        let mut buf = Vec::new();
        write_query(&mut buf, 1, "t.c", QUERY_NONE, 0, 0, &json!({}), None).unwrap();
        let msg = read_message(&mut Cursor::new(buf)).unwrap().unwrap();
        match msg.body {
            MessageBody::Query { fields, .. } => assert!(fields.is_none()),
            other => panic!("wrong body: {:?}", other),
        }
    }

    #[test]
    fn test_kill_cursors_roundtrip() {
        let mut buf = Vec::new();
        write_kill_cursors(&mut buf, 3, &[42, 43]).unwrap();
        let msg = read_message(&mut Cursor::new(buf)).unwrap().unwrap();
        match msg.body {
            MessageBody::KillCursors { cursor_ids } => assert_eq!(cursor_ids, vec![42, 43]),
            other => panic!("wrong body: {:?}", other),
        }
    }

    #[test]
    fn test_reply_roundtrip() {
        let mut buf = Vec::new();
        let doc = json!({"ok": 1});
        write_reply(&mut buf, 9, 7, REPLY_CURSOR_NOT_FOUND, 123, 0, 1, &[doc.clone()]).unwrap();

        let reply = read_reply(&mut Cursor::new(buf)).unwrap();
        assert_eq!(reply.header.response_to, 7);
        assert_eq!(reply.flags, REPLY_CURSOR_NOT_FOUND);
        assert_eq!(reply.cursor_id, 123);
        assert_eq!(reply.number_returned, 1);
        assert_eq!(reply.docs, vec![doc]);
    }

    #[test]
    fn test_eof_at_boundary_is_none() {
        let buf: Vec<u8> = Vec::new();
        assert!(read_message(&mut Cursor::new(buf)).unwrap().is_none());
    }

    #[test]
    fn test_truncated_header_is_error() {
        let buf = vec![1u8, 2, 3];
        assert!(read_message(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_unknown_opcode_is_other() {
        let mut buf = Vec::new();
        let header = MessageHeader {
            message_length: 20,
            request_id: 1,
            response_to: 0,
            op_code: 2013,
        };
        header.write(&mut buf).unwrap();
        buf.extend_from_slice(&0i32.to_le_bytes());
        let msg = read_message(&mut Cursor::new(buf)).unwrap().unwrap();
        assert!(matches!(msg.body, MessageBody::Other { op_code: 2013 }));
    }
}

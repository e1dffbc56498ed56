//! Document payloads and the structural equality relation used by matching.
//!
//! Documents travel on the wire as length-prefixed JSON: a little-endian
//! `i32` total size (prefix included) followed by the UTF-8 JSON bytes.
//! Key order is preserved end to end so that strict comparison is
//! meaningful.

use std::io::{Read, Write};

use serde_json::Value;

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::{MockError, Result};

/// A wire document. Always a JSON object at the top level.
pub type Document = Value;

/// Serialize one document with its length prefix.
pub fn write_document<W: Write>(w: &mut W, doc: &Document) -> Result<()> {
    let body = serde_json::to_vec(doc)?;
    let total = (body.len() + 4) as i32;
    w.write_all(&total.to_le_bytes())?;
    w.write_all(&body)?;
    Ok(())
}

/// Read one length-prefixed document.
pub fn read_document<R: Read>(r: &mut R) -> Result<Document> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let total = i32::from_le_bytes(len_buf);
    if total < 4 || total as usize > MAX_MESSAGE_SIZE {
        return Err(MockError::protocol(format!(
            "document length {} out of range",
            total
        )));
    }
    let mut body = vec![0u8; total as usize - 4];
    r.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Encoded size of a document, prefix included.
pub fn document_len(doc: &Document) -> Result<usize> {
    Ok(serde_json::to_vec(doc)?.len() + 4)
}

/// Structural document equality.
///
/// Loose (`strict == false`) treats objects as unordered maps at every
/// nesting level. Strict additionally requires identical key order, which
/// some topology tests rely on to detect byte-level drift. Arrays are
/// ordered under both relations.
pub fn docs_equal(expected: &Document, actual: &Document, strict: bool) -> bool {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            if e.len() != a.len() {
                return false;
            }
            if strict {
                e.iter()
                    .zip(a.iter())
                    .all(|((ek, ev), (ak, av))| ek == ak && docs_equal(ev, av, strict))
            } else {
                e.iter().all(|(k, ev)| {
                    a.get(k).is_some_and(|av| docs_equal(ev, av, strict))
                })
            }
        }
        (Value::Array(e), Value::Array(a)) => {
            e.len() == a.len()
                && e.iter().zip(a.iter()).all(|(ev, av)| docs_equal(ev, av, strict))
        }
        // Numbers compare by value so 1 == 1.0 across client encoders.
        (Value::Number(e), Value::Number(a)) => {
            e.as_f64() == a.as_f64()
        }
        (e, a) => e == a,
    }
}

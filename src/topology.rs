//! Per-role topology-handshake documents.
//!
//! Every member answers discovery with one canned document carrying its
//! role flags, the wire-capability version, the set name, and the full
//! member list, so a client discovers the whole topology from any node.

use serde_json::{json, Value};

use crate::doc::Document;
use crate::replica_set::MemberRole;

/// Builds the handshake response installed on each member.
pub(crate) struct TopologyScripter {
    set_name: &'static str,
    max_wire_version: i32,
    hosts: Vec<String>,
}

impl TopologyScripter {
    pub(crate) fn new(set_name: &'static str, max_wire_version: i32, hosts: Vec<String>) -> Self {
        Self {
            set_name,
            max_wire_version,
            hosts,
        }
    }

    /// The canned handshake document for one role.
    ///
    /// An arbiter answers `ismaster: true` alongside `arbiterOnly: true`.
    /// That is intentional emulation of the observed legacy server
    /// behavior, not a bug.
    pub(crate) fn hello_document(&self, role: MemberRole) -> Document {
        let hosts: Vec<Value> = self.hosts.iter().map(|h| json!(h)).collect();
        match role {
            MemberRole::Primary => json!({
                "ok": 1,
                "ismaster": true,
                "secondary": false,
                "maxWireVersion": self.max_wire_version,
                "setName": self.set_name,
                "hosts": hosts,
            }),
            MemberRole::Secondary => json!({
                "ok": 1,
                "ismaster": false,
                "secondary": true,
                "maxWireVersion": self.max_wire_version,
                "setName": self.set_name,
                "hosts": hosts,
            }),
            MemberRole::Arbiter => json!({
                "ok": 1,
                "ismaster": true,
                "arbiterOnly": true,
                "maxWireVersion": self.max_wire_version,
                "setName": self.set_name,
                "hosts": hosts,
            }),
        }
    }
}

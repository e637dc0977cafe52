// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The collective membership contract (§6) — an external collaborator.
//!
//! "Collective" is this system's term for the federation of cluster
//! management processes; each node is owned by exactly one member at a
//! time. The core only needs to know its own identity and how to resolve
//! a peer's address and TLS certificate fingerprint.

use std::collections::HashMap;
use std::sync::RwLock;

/// A peer cluster member's console-proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectiveMember {
    pub address: String,
    /// The peer's TLS certificate fingerprint, compared byte-for-byte
    /// against the certificate presented during the proxy TLS handshake.
    pub fingerprint: Vec<u8>,
}

/// The collective membership contract consumed by the core (§6).
pub trait Collective: Send + Sync + 'static {
    /// This process's own identity within the collective.
    fn get_myname(&self) -> String;

    /// Resolve a named collective member's proxy endpoint, if known.
    fn get_collective_member(&self, name: &str) -> Option<CollectiveMember>;
}

/// Minimal in-memory [`Collective`] for the demo binary and tests.
pub struct StaticCollective {
    myname: String,
    members: RwLock<HashMap<String, CollectiveMember>>,
}

impl StaticCollective {
    pub fn new(myname: impl Into<String>) -> Self {
        Self { myname: myname.into(), members: RwLock::new(HashMap::new()) }
    }

    pub fn with_member(self, name: impl Into<String>, member: CollectiveMember) -> Self {
        self.members.write().unwrap_or_else(|e| e.into_inner()).insert(name.into(), member);
        self
    }
}

impl Collective for StaticCollective {
    fn get_myname(&self) -> String {
        self.myname.clone()
    }

    fn get_collective_member(&self, name: &str) -> Option<CollectiveMember> {
        self.members.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }
}

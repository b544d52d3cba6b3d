//! Consistent hash ring over server identifiers
//!
//! Each server contributes `replicas` virtual positions. Keys resolve to the
//! first position at or after their hash, wrapping around to the smallest.
//! Positions are derived only from `(server id, replica index)`, so two rings
//! holding the same server set agree on every key regardless of the order the
//! servers were added in.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use hashring::HashRing;

use crate::error::{DispatchError, Result};

/// Virtual positions per server when none is configured
pub const DEFAULT_REPLICAS: u32 = 100;

/// One synthetic ring position owned by a server
#[derive(Debug, Clone, PartialEq, Eq)]
struct VirtualNode {
    server_id: String,
    replica: u32,
}

// Hashed by hand: the derived impl would feed a native-endian length prefix,
// and every node in the cluster has to compute identical positions.
impl Hash for VirtualNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.server_id.as_bytes());
        state.write(&self.replica.to_le_bytes());
    }
}

pub struct TaskRing {
    ring: HashRing<VirtualNode>,
    servers: BTreeSet<String>,
    replicas: u32,
}

impl TaskRing {
    /// Create an empty ring. A replica count of zero is raised to one so every
    /// registered server always owns at least one position.
    pub fn new(replicas: u32) -> Self {
        Self {
            ring: HashRing::new(),
            servers: BTreeSet::new(),
            replicas: replicas.max(1),
        }
    }

    pub fn with_servers<I, S>(replicas: u32, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = Self::new(replicas);
        for server in servers {
            ring.add_server(server.as_ref());
        }
        ring
    }

    /// Insert all virtual positions for `server_id`.
    ///
    /// Returns `false` when the server was already present.
    pub fn add_server(&mut self, server_id: &str) -> bool {
        if !self.servers.insert(server_id.to_string()) {
            return false;
        }
        for replica in 0..self.replicas {
            self.ring.add(VirtualNode {
                server_id: server_id.to_string(),
                replica,
            });
        }
        true
    }

    /// Drop every virtual position of `server_id`.
    ///
    /// Returns `false` when the server was not a member.
    pub fn remove_server(&mut self, server_id: &str) -> bool {
        if !self.servers.remove(server_id) {
            return false;
        }
        for replica in 0..self.replicas {
            self.ring.remove(&VirtualNode {
                server_id: server_id.to_string(),
                replica,
            });
        }
        true
    }

    /// Resolve the server owning `key`.
    pub fn locate(&self, key: &str) -> Result<&str> {
        if self.servers.is_empty() {
            return Err(DispatchError::EmptyRing);
        }
        self.ring
            .get(&key)
            .map(|node| node.server_id.as_str())
            .ok_or(DispatchError::EmptyRing)
    }

    pub fn contains(&self, server_id: &str) -> bool {
        self.servers.contains(server_id)
    }

    /// Registered servers in sorted order
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(String::as_str)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn position_count(&self) -> usize {
        self.servers.len() * self.replicas as usize
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl Default for TaskRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl fmt::Debug for TaskRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRing")
            .field("servers", &self.servers)
            .field("replicas", &self.replicas)
            .finish()
    }
}

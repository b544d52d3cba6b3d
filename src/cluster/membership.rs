//! Process-wide view of live servers
//!
//! Handles:
//! - Seeding the hash ring at startup
//! - Applying already-decided join/leave signals
//! - Answering ownership queries for the dispatcher

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::ring::{TaskRing, DEFAULT_REPLICAS};
use crate::error::{DispatchError, Result};

#[derive(Debug)]
struct MembershipState {
    self_id: String,
    ring: TaskRing,
}

/// Shared membership handle.
///
/// Readers (the poll loop, ownership queries) take the read lock; only the
/// membership signal handlers take the write lock. No lock is held across an
/// await point.
#[derive(Debug)]
pub struct Membership {
    replicas: u32,
    state: RwLock<Option<MembershipState>>,
}

impl Membership {
    pub fn new(replicas: u32) -> Self {
        Self {
            replicas,
            state: RwLock::new(None),
        }
    }

    /// Seed the ring with every known server and record this node's id.
    pub fn init<I, S>(&self, all_servers: I, self_id: impl Into<String>) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let self_id = self_id.into();
        let mut state = self.state.write();
        if state.is_some() {
            return Err(DispatchError::AlreadyInitialized);
        }

        let ring = TaskRing::with_servers(self.replicas, all_servers);
        if !ring.contains(&self_id) {
            warn!(server = %self_id, "Local server is not part of the initial membership");
        }
        info!(
            server = %self_id,
            members = ring.server_count(),
            replicas = ring.replicas(),
            "Membership initialized"
        );

        *state = Some(MembershipState { self_id, ring });
        Ok(())
    }

    /// Forget the ring and local id. A later `init` starts from scratch.
    pub fn teardown(&self) {
        if self.state.write().take().is_some() {
            info!("Membership torn down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn self_id(&self) -> Result<String> {
        self.with_state(|s| Ok(s.self_id.clone()))
    }

    pub fn add_server(&self, server_id: &str) -> Result<bool> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(DispatchError::NotInitialized)?;
        let added = state.ring.add_server(server_id);
        if added {
            info!(server = %server_id, members = state.ring.server_count(), "Server joined");
        } else {
            debug!(server = %server_id, "Server already a member");
        }
        Ok(added)
    }

    pub fn remove_server(&self, server_id: &str) -> Result<bool> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(DispatchError::NotInitialized)?;
        let removed = state.ring.remove_server(server_id);
        if removed {
            info!(server = %server_id, members = state.ring.server_count(), "Server left");
        } else {
            debug!(server = %server_id, "Server was not a member");
        }
        Ok(removed)
    }

    /// Owning server for `key`
    pub fn locate(&self, key: &str) -> Result<String> {
        self.with_state(|s| s.ring.locate(key).map(str::to_string))
    }

    /// Whether this node owns `key`
    pub fn is_local(&self, key: &str) -> Result<bool> {
        self.with_state(|s| Ok(s.ring.locate(key)? == s.self_id))
    }

    pub fn is_member(&self, server_id: &str) -> Result<bool> {
        self.with_state(|s| Ok(s.ring.contains(server_id)))
    }

    pub fn members(&self) -> Result<Vec<String>> {
        self.with_state(|s| Ok(s.ring.servers().map(str::to_string).collect()))
    }

    fn with_state<T>(&self, f: impl FnOnce(&MembershipState) -> Result<T>) -> Result<T> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(DispatchError::NotInitialized)?;
        f(state)
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

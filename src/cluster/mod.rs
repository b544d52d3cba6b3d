//! Cluster ownership
//!
//! - Consistent hash ring with virtual nodes
//! - Membership tracking for live servers and the local identity

pub mod membership;
pub mod ring;

pub use membership::Membership;
pub use ring::{TaskRing, DEFAULT_REPLICAS};

//! Leadership oracles for the scheduling loop.
//!
//! The loop only asks one question, [`LeaderElection::is_leader`]. How the
//! answer is reached (a consensus protocol, a lock service, a config flag) is
//! up to the embedding process.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tells the scheduling loop whether this process should drive passes.
#[async_trait]
pub trait LeaderElection: Send + Sync {
    async fn is_leader(&self) -> bool;
}

/// Always the leader. For single-process deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLeader;

#[async_trait]
impl LeaderElection for AlwaysLeader {
    async fn is_leader(&self) -> bool {
        true
    }
}

/// Leadership flag flipped by an external election mechanism.
///
/// Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct LeadershipFlag {
    leader: Arc<AtomicBool>,
}

impl LeadershipFlag {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: Arc::new(AtomicBool::new(leader)),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderElection for LeadershipFlag {
    async fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

//! Coordination gate shared between ingestion and maintenance work.
//!
//! Each envelope's unit of work runs while holding the gate, and so does any
//! maintenance job (retention sweeps, backups, schema changes) that must not
//! interleave with ingestion writes. The gate does not protect reads.
//!
//! ```rust,no_run
//! use meshingest::gate::CoordinationGate;
//!
//! # async fn demo() {
//! let gate = CoordinationGate::new();
//! let maintenance = gate.clone();
//! maintenance
//!     .run_exclusive(async {
//!         // ingestion is paused here
//!     })
//!     .await;
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A process-wide mutual-exclusion token. Clones share the same lock.
///
/// Backed by `tokio::sync::Mutex`, so waiters are served in FIFO order and
/// holding the guard across `.await` points is fine.
#[derive(Debug, Clone, Default)]
pub struct CoordinationGate {
    inner: Arc<Mutex<()>>,
}

/// Proof of exclusive access. The gate is released on drop.
pub type GateGuard = OwnedMutexGuard<()>;

impl CoordinationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the gate is free and take it.
    pub async fn acquire(&self) -> GateGuard {
        self.inner.clone().lock_owned().await
    }

    /// Take the gate only if nobody holds it.
    pub fn try_acquire(&self) -> Option<GateGuard> {
        self.inner.clone().try_lock_owned().ok()
    }

    /// Run `work` while holding the gate.
    pub async fn run_exclusive<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire().await;
        work.await
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_one_lock() {
        let gate = CoordinationGate::new();
        let other = gate.clone();
        let guard = gate.acquire().await;
        assert!(other.is_held());
        assert!(other.try_acquire().is_none());
        drop(guard);
        assert!(!other.is_held());
        assert!(other.try_acquire().is_some());
    }

    #[tokio::test]
    async fn run_exclusive_releases_after_completion() {
        let gate = CoordinationGate::new();
        let value = gate.run_exclusive(async { 7 }).await;
        assert_eq!(value, 7);
        assert!(!gate.is_held());
    }
}

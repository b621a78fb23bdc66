use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::RouteId;

/// Per-route mutual exclusion.
///
/// The engine's renumbering logic reads the full ordered link list and
/// writes back a consistent result, so mutations of one route must not
/// interleave. Relocation propagation locks affected routes one at a time.
#[derive(Debug, Clone, Default)]
pub struct RouteLocker {
    inner: Arc<RouteLockerInner>,
}

impl RouteLocker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, route_id: RouteId) -> RouteLockGuard {
        let lock = self
            .inner
            .locks
            .entry(route_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        RouteLockGuard { route_id, inner: Arc::clone(&self.inner), guard: Some(guard) }
    }
}

#[derive(Debug, Default)]
struct RouteLockerInner {
    locks: DashMap<RouteId, Arc<Mutex<()>>>,
}

pub struct RouteLockGuard {
    route_id: RouteId,
    inner: Arc<RouteLockerInner>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RouteLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        if let Some(entry) = self.inner.locks.get(&self.route_id) {
            if Arc::strong_count(entry.value()) == 1 {
                self.inner.locks.remove(&self.route_id);
            }
        }
    }
}

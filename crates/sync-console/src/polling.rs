//! # Polling Orchestrator
//!
//! Keeps watched dependencies fresh. Each distinct dependency gets at most
//! one background poller, however many views register for it:
//!
//! - the first `register` starts the poller, if the dependency's
//!   [`UpdateStrategy`] polls at all,
//! - later registrations only add owners (and resume a paused poller),
//! - the last `unregister` pauses it; the task stays parked until an owner
//!   returns or the orchestrator shuts down.
//!
//! Pollers sleep first and refresh second, so registering never triggers an
//! immediate request.

use crate::dependency::{Dependency, DependencyId, DependencyRequest};
use crate::error::RegistryError;
use crate::registry::ServiceRegistry;
use crate::strategy::UpdateStrategy;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sync_framework::event::lock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Whoever keeps a dependency polled, typically one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn next() -> Self {
        OwnerId(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

struct Poller {
    owners: HashSet<OwnerId>,
    active: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct PollingOrchestrator {
    registry: Arc<ServiceRegistry>,
    pollers: Mutex<HashMap<DependencyId, Poller>>,
    shutdown: watch::Sender<bool>,
}

impl PollingOrchestrator {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            pollers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Adds `owner` to the dependency's poller, starting or resuming it.
    /// Returns `false` for dependencies that are never polled. Must be
    /// called within a Tokio runtime.
    pub fn register(&self, request: &DependencyRequest, owner: OwnerId) -> Result<bool, RegistryError> {
        if *self.shutdown.borrow() {
            return Ok(false);
        }
        let dependency = self.registry.get_dependency(request)?;
        let strategy = dependency.strategy(self.registry.catalog());
        if !strategy.should_poll() {
            debug!(dependency = %dependency.describe(), "Not polled");
            return Ok(false);
        }

        let id = dependency.identity();
        let mut pollers = lock(&self.pollers);
        if let Some(poller) = pollers.get_mut(&id) {
            poller.owners.insert(owner);
            if !*poller.active.borrow() {
                info!(dependency = %dependency.describe(), "Resuming poller");
                poller.active.send_replace(true);
            }
            return Ok(true);
        }

        info!(dependency = %dependency.describe(), ?strategy, "Starting poller");
        let (active, paused) = watch::channel(true);
        let task = tokio::spawn(poll(dependency, strategy, paused, self.shutdown.subscribe()));
        pollers.insert(
            id,
            Poller {
                owners: HashSet::from([owner]),
                active,
                task,
            },
        );
        Ok(true)
    }

    /// Removes `owner`. The poller pauses once nobody owns it. Returns
    /// whether `owner` was registered.
    pub fn unregister(&self, request: &DependencyRequest, owner: OwnerId) -> Result<bool, RegistryError> {
        let dependency = self.registry.get_dependency(request)?;
        let mut pollers = lock(&self.pollers);
        let Some(poller) = pollers.get_mut(&dependency.identity()) else {
            return Ok(false);
        };
        let removed = poller.owners.remove(&owner);
        if poller.owners.is_empty() && *poller.active.borrow() {
            info!(dependency = %dependency.describe(), "Pausing poller");
            poller.active.send_replace(false);
        }
        Ok(removed)
    }

    pub fn is_polling(&self, request: &DependencyRequest) -> bool {
        self.with_poller(request, |poller| *poller.active.borrow())
            .unwrap_or(false)
    }

    pub fn owner_count(&self, request: &DependencyRequest) -> usize {
        self.with_poller(request, |poller| poller.owners.len())
            .unwrap_or(0)
    }

    fn with_poller<T>(&self, request: &DependencyRequest, read: impl FnOnce(&Poller) -> T) -> Option<T> {
        let id = self.registry.get_dependency(request).ok()?.identity();
        lock(&self.pollers).get(&id).map(read)
    }

    /// Stops every poller and waits for in-flight refreshes to wind down.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = lock(&self.pollers)
            .drain()
            .map(|(_, poller)| poller.task)
            .collect();
        info!(pollers = tasks.len(), "Shutting down pollers");
        for task in tasks {
            if let Err(error) = task.await {
                warn!(%error, "Poller ended abnormally");
            }
        }
    }
}

async fn poll(
    dependency: Dependency,
    strategy: UpdateStrategy,
    mut active: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let describe = dependency.describe();
    let mut failures = 0u32;
    loop {
        let is_active = *active.borrow_and_update();
        if !is_active {
            tokio::select! {
                changed = active.changed() => if changed.is_err() { break },
                _ = shutdown.changed() => break,
            }
            continue;
        }
        let Some(delay) = strategy.delay_after(failures) else {
            break;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
            changed = active.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }
        let settlement = tokio::select! {
            settlement = dependency.refresh() => settlement,
            _ = shutdown.changed() => break,
        };
        if settlement.is_loaded() {
            failures = 0;
        } else {
            failures = failures.saturating_add(1);
            warn!(dependency = %describe, failures, ?settlement, "Poll failed");
        }
        debug!(dependency = %describe, ?delay, "Polled");
    }
    debug!(dependency = %describe, "Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_ids_are_unique() {
        let first = OwnerId::next();
        let second = OwnerId::next();
        assert_ne!(first, second);
    }
}

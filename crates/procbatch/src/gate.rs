//! Concurrency gates protecting connections, pools and databases

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use procbatch_core::{BatchError, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

/// What a gate protects. The order is the acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GateKind {
    Database,
    Pool,
    Connection,
}

struct GateInner {
    id: u64,
    kind: GateKind,
    name: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    acquisitions: AtomicUsize,
}

/// A bounded-concurrency semaphore with a stable identity.
///
/// Clones share the same semaphore; equality and ordering follow the
/// identity, so a gate referenced from several places dedups in a `GateSet`.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Create a gate allowing `capacity` concurrent holders (at least one)
    pub fn new(kind: GateKind, name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(GateInner {
                id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                name: name.into(),
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                acquisitions: AtomicUsize::new(0),
            }),
        }
    }

    pub fn connection(name: impl Into<String>, capacity: usize) -> Self {
        Self::new(GateKind::Connection, name, capacity)
    }

    pub fn pool(name: impl Into<String>, capacity: usize) -> Self {
        Self::new(GateKind::Pool, name, capacity)
    }

    pub fn database(name: impl Into<String>, capacity: usize) -> Self {
        Self::new(GateKind::Database, name, capacity)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> GateKind {
        self.inner.kind
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Total number of successful acquisitions over the gate's lifetime
    pub fn acquisitions(&self) -> usize {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    fn key(&self) -> (GateKind, u64) {
        (self.inner.kind, self.inner.id)
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BatchError::InvalidOperation(format!("gate {} is closed", self.name())))?;
        self.inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(permit)
    }
}

impl PartialEq for Gate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Gate {}

impl std::hash::Hash for Gate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("name", &self.inner.name)
            .field("available", &self.available())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// A deduplicated, deterministically ordered set of gates
#[derive(Debug, Clone, Default)]
pub struct GateSet {
    gates: BTreeMap<(GateKind, u64), Gate>,
}

impl GateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a gate; returns false if it was already present
    pub fn insert(&mut self, gate: Gate) -> bool {
        let key = gate.key();
        if self.gates.contains_key(&key) {
            return false;
        }
        self.gates.insert(key, gate);
        true
    }

    pub fn extend(&mut self, other: &GateSet) {
        for gate in other.iter() {
            self.insert(gate.clone());
        }
    }

    pub fn contains(&self, gate: &Gate) -> bool {
        self.gates.contains_key(&gate.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gate> {
        self.gates.values()
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Acquire every gate in order, holding them until the guard drops.
    ///
    /// On timeout or cancellation the permits taken so far are released and
    /// nothing else is touched.
    pub async fn acquire(&self, timeout: Duration, cancel: &CancellationToken) -> Result<GateGuard> {
        let mut guard = GateGuard {
            permits: Vec::with_capacity(self.gates.len()),
        };

        let acquire_all = async {
            for gate in self.gates.values() {
                let permit = gate.acquire().await?;
                tracing::trace!(gate = %gate.name(), kind = ?gate.kind(), "gate acquired");
                guard.permits.push((gate.clone(), permit));
            }
            Ok::<(), BatchError>(())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BatchError::Cancelled),
            result = tokio::time::timeout(timeout, acquire_all) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(BatchError::Timeout(format!(
                    "timed out acquiring {} gate(s) (timeout: {:?})",
                    self.gates.len(),
                    timeout
                ))),
            },
        }?;

        Ok(guard)
    }
}

/// Permits held for one target execution; released exactly once on drop
pub struct GateGuard {
    permits: Vec<(Gate, OwnedSemaphorePermit)>,
}

impl GateGuard {
    /// Number of gates held
    pub fn len(&self) -> usize {
        self.permits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permits.is_empty()
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        for (gate, permit) in self.permits.drain(..).rev() {
            drop(permit);
            tracing::trace!(gate = %gate.name(), kind = ?gate.kind(), "gate released");
        }
    }
}

impl std::fmt::Debug for GateGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateGuard")
            .field("gates", &self.permits.len())
            .finish()
    }
}

//! Live reactor registry
//!
//! A reactor is inserted when it starts and removed only once both of its
//! I/O tasks have returned, whoever else still holds (or dropped) a handle
//! to it. The registry is process scoped: the binary creates one and passes
//! it to the client or server.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

pub type ReactorId = u64;

/// The part of a reactor the registry needs, independent of its message types.
pub trait LiveReactor: Send + Sync + 'static {
    fn id(&self) -> ReactorId;
    fn is_alive(&self) -> bool;
    fn shutdown(&self);
}

#[derive(Clone, Default)]
pub struct ReactorRegistry {
    next_id: Arc<AtomicU64>,
    live: Arc<Mutex<HashMap<ReactorId, Arc<dyn LiveReactor>>>>,
}

impl ReactorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&self) -> ReactorId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn insert(&self, reactor: Arc<dyn LiveReactor>) {
        trace!("reactor {} registered", reactor.id());
        self.live.lock().insert(reactor.id(), reactor);
    }

    /// Called when the transport confirmed teardown.
    pub fn release(&self, id: ReactorId) -> bool {
        let removed = self.live.lock().remove(&id).is_some();
        if removed {
            trace!("reactor {} released", id);
        }
        removed
    }

    pub fn contains(&self, id: ReactorId) -> bool {
        self.live.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    /// Ask every live reactor to stop. Entries stay until their tasks end.
    pub fn shutdown_all(&self) {
        let live: Vec<_> = self.live.lock().values().cloned().collect();
        for reactor in live {
            reactor.shutdown();
        }
    }
}

// # Automaton Registry
//
// Process-wide index of live automaton instances.
//
// ## Purpose
//
// Every automaton registers on creation and unregisters on destroy. The
// registry hands out ids (`<machine name>_<n>`, counted per machine name),
// tracks the current state of each live instance and fans state changes
// out to observers.
//
// ## Observation
//
// - Callbacks: `subscribe` closures run synchronously on every change
// - Stream: `watch()` yields changes through a bounded broadcast channel;
//   slow watchers skip lagged changes instead of blocking conversations
//
// After `shutdown()` no further changes are delivered and every watch
// stream ends.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Capacity of the state change broadcast channel
pub const DEFAULT_WATCH_CAPACITY: usize = 256;

/// A state change of one automaton instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Process-wide instance index
    pub index: u64,
    /// Instance id, e.g. `domain_synchronizer_3`
    pub id: String,
    /// Machine name
    pub name: &'static str,
    pub old_state: String,
    pub new_state: String,
}

/// Snapshot of a live automaton
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAutomaton {
    pub index: u64,
    pub id: String,
    pub name: &'static str,
    pub state: String,
}

type Observer = Arc<dyn Fn(&StateChange) + Send + Sync>;

struct Inner {
    live: RwLock<BTreeMap<u64, LiveAutomaton>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    next_index: AtomicU64,
    observers: RwLock<Vec<Observer>>,
    changes: Mutex<Option<broadcast::Sender<StateChange>>>,
}

/// Index of live automata
///
/// Cloning is cheap and clones share the index. Locks recover from
/// poisoning: a panicking observer must not take the index down with it.
#[derive(Clone)]
pub struct AutomatonRegistry {
    inner: Arc<Inner>,
}

impl Default for AutomatonRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WATCH_CAPACITY)
    }
}

impl std::fmt::Debug for AutomatonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomatonRegistry")
            .field("live", &self.live_count())
            .finish()
    }
}

impl AutomatonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose watch channel buffers `capacity` changes
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                live: RwLock::new(BTreeMap::new()),
                counters: Mutex::new(HashMap::new()),
                next_index: AtomicU64::new(1),
                observers: RwLock::new(Vec::new()),
                changes: Mutex::new(Some(changes)),
            }),
        }
    }

    /// Register a new instance, returning its index and id
    pub(crate) fn register(&self, name: &'static str, state: String) -> (u64, String) {
        let index = self.inner.next_index.fetch_add(1, Ordering::Relaxed);
        let id = {
            let mut counters = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
            let counter = counters.entry(name).or_insert(0);
            *counter += 1;
            format!("{}_{}", name, counter)
        };

        let mut live = self.inner.live.write().unwrap_or_else(|e| e.into_inner());
        live.insert(
            index,
            LiveAutomaton {
                index,
                id: id.clone(),
                name,
                state,
            },
        );
        (index, id)
    }

    /// Remove an instance; returns false if it was not registered
    pub(crate) fn unregister(&self, index: u64) -> bool {
        let mut live = self.inner.live.write().unwrap_or_else(|e| e.into_inner());
        live.remove(&index).is_some()
    }

    /// Record a state change and deliver it to observers and watchers
    pub(crate) fn notify(&self, change: StateChange) {
        {
            let mut live = self.inner.live.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = live.get_mut(&change.index) {
                entry.state = change.new_state.clone();
            }
        }

        let observers: Vec<Observer> = self
            .inner
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer(&change);
        }

        let changes = self.inner.changes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = changes.as_ref() {
            // No receivers is fine
            let _ = sender.send(change);
        }
    }

    /// Run `observer` on every state change of every instance
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let mut observers = self.inner.observers.write().unwrap_or_else(|e| e.into_inner());
        observers.push(Arc::new(observer));
    }

    /// Stream of state changes from now on
    ///
    /// The stream ends after [`shutdown`](Self::shutdown). Changes a slow
    /// consumer lagged behind on are skipped.
    pub fn watch(&self) -> Pin<Box<dyn Stream<Item = StateChange> + Send + 'static>> {
        let changes = self.inner.changes.lock().unwrap_or_else(|e| e.into_inner());
        match changes.as_ref() {
            Some(sender) => Box::pin(
                BroadcastStream::new(sender.subscribe()).filter_map(|change| change.ok()),
            ),
            None => Box::pin(tokio_stream::empty()),
        }
    }

    /// Stop delivering changes and end all watch streams
    pub fn shutdown(&self) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.inner
            .changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        tracing::debug!("Automaton registry shut down with {} live instances", self.live_count());
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Ids of live instances in creation order
    pub fn live_ids(&self) -> Vec<String> {
        self.inner
            .live
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Look up a live instance by id
    pub fn get(&self, id: &str) -> Option<LiveAutomaton> {
        self.inner
            .live
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|entry| entry.id == id)
            .cloned()
    }
}

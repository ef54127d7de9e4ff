//! A subscribable key/value store.
//!
//! Each key owns its own lock: writes to unrelated keys never contend, and every
//! subscriber of a key observes that key's writes in the order they happened.
//! Subscribers receive every event (updates are queued, not coalesced), starting
//! with the value current at the time of subscription.

use ahash::AHashMap as HashMap;
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::{
    hash::Hash,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
};
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<K, V> {
    Stored(K, V),
    Deleted(K),
}

pub struct Watchable<K, V> {
    entries: Arc<Entries<K, V>>,

    /// Map-wide subscribers, copied into each newly created entry. Only
    /// modified while the `entries` write lock is held.
    all: Mutex<Vec<Tx<K, V>>>,
}

pub struct Subscription<K, V> {
    rx: mpsc::UnboundedReceiver<Event<K, V>>,

    /// Unlinks the subscribed key's entry if it is no longer needed.
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

type Tx<K, V> = mpsc::UnboundedSender<Event<K, V>>;

type Entries<K, V> = RwLock<HashMap<K, Arc<Entry<K, V>>>>;

struct Entry<K, V> {
    state: Mutex<State<K, V>>,
}

struct State<K, V> {
    value: Option<V>,

    /// Set once the entry has been unlinked from the map. Writers holding a
    /// stale handle must look the key up again.
    removed: bool,

    keyed: Vec<Tx<K, V>>,
    all: Vec<Tx<K, V>>,
}

// === impl Event ===

impl<K, V> Event<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Self::Stored(k, _) | Self::Deleted(k) => k,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Stored(_, v) => Some(v),
            Self::Deleted(_) => None,
        }
    }
}

// === impl Watchable ===

impl<K, V> Default for Watchable<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            all: Mutex::new(Vec::new()),
        }
    }
}

impl<K, V> std::fmt::Debug for Watchable<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchable")
            .field("keys", &self.entries.read().len())
            .finish()
    }
}

impl<K, V> Watchable<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, key: K, value: V) {
        self.store_when(key, value, |_, _| true);
    }

    /// Stores `value` unless it is equal to the current value. Returns true if
    /// the store happened.
    pub fn store_if_changed(&self, key: K, value: V) -> bool
    where
        V: PartialEq,
    {
        self.store_when(key, value, |prior, value| prior != Some(value))
    }

    pub fn load(&self, key: &K) -> Option<V> {
        let entry = self.entries.read().get(key).cloned()?;
        let state = entry.state.lock();
        state.value.clone()
    }

    /// Removes the key's value, notifying subscribers. Returns false, and
    /// notifies no one, if there was no value.
    pub fn delete(&self, key: &K) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get(key).cloned() else {
            return false;
        };

        let mut state = entry.state.lock();
        let existed = state.value.take().is_some();
        if existed {
            state.notify(Event::Deleted(key.clone()));
        }
        unlink_unused(&mut entries, key, &mut state);
        existed
    }

    /// Watches every key. Current values are delivered first, in no particular
    /// order across keys.
    pub fn subscribe_all(&self) -> Subscription<K, V> {
        let (tx, rx) = mpsc::unbounded_channel();
        let entries = self.entries.write();
        for (key, entry) in entries.iter() {
            let mut state = entry.state.lock();
            if let Some(value) = state.value.clone() {
                let _ = tx.send(Event::Stored(key.clone(), value));
            }
            state.all.push(tx.clone());
        }
        let mut all = self.all.lock();
        all.retain(|tx| !tx.is_closed());
        all.push(tx);
        drop(entries);
        Subscription { rx, release: None }
    }

    pub fn keys(&self) -> Vec<K> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(_, e)| e.state.lock().value.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn store_when(
        &self,
        key: K,
        value: V,
        should_store: impl Fn(Option<&V>, &V) -> bool,
    ) -> bool {
        loop {
            let entry = self.entry(&key);
            let mut state = entry.state.lock();
            if state.removed {
                continue;
            }
            if !should_store(state.value.as_ref(), &value) {
                return false;
            }
            state.value = Some(value.clone());
            state.notify(Event::Stored(key, value));
            return true;
        }
    }

    fn entry(&self, key: &K) -> Arc<Entry<K, V>> {
        if let Some(entry) = self.entries.read().get(key) {
            return entry.clone();
        }

        let mut entries = self.entries.write();
        entries
            .entry(key.clone())
            .or_insert_with(|| {
                let mut all = self.all.lock();
                all.retain(|tx| !tx.is_closed());
                Arc::new(Entry {
                    state: Mutex::new(State {
                        value: None,
                        removed: false,
                        keyed: Vec::new(),
                        all: all.clone(),
                    }),
                })
            })
            .clone()
    }
}

impl<K, V> Watchable<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Watches a single key. The current value, if any, is the first event.
    ///
    /// Dropping the subscription releases the key's entry unless a value is
    /// stored or another subscriber remains.
    pub fn subscribe(&self, key: K) -> Subscription<K, V> {
        let (tx, rx) = mpsc::unbounded_channel();
        loop {
            let entry = self.entry(&key);
            let mut state = entry.state.lock();
            if state.removed {
                continue;
            }
            if let Some(value) = state.value.clone() {
                let _ = tx.send(Event::Stored(key.clone(), value));
            }
            state.keyed.push(tx);

            let entries = Arc::downgrade(&self.entries);
            return Subscription {
                rx,
                release: Some(Box::new(move || release(entries, key))),
            };
        }
    }
}

fn release<K: Eq + Hash, V>(entries: Weak<Entries<K, V>>, key: K) {
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let mut entries = entries.write();
    let Some(entry) = entries.get(&key).cloned() else {
        return;
    };
    let mut state = entry.state.lock();
    unlink_unused(&mut entries, &key, &mut state);
}

/// Removes an entry that holds no value and has no live keyed subscribers.
/// Entries being watched are kept so that a later store reaches them.
///
/// The caller must hold the map's write lock and the entry's state lock.
fn unlink_unused<K: Eq + Hash, V>(
    entries: &mut HashMap<K, Arc<Entry<K, V>>>,
    key: &K,
    state: &mut State<K, V>,
) {
    state.keyed.retain(|tx| !tx.is_closed());
    if state.value.is_none() && state.keyed.is_empty() {
        state.removed = true;
        entries.remove(key);
    }
}

// === impl State ===

impl<K: Clone, V: Clone> State<K, V> {
    fn notify(&mut self, event: Event<K, V>) {
        self.keyed.retain(|tx| tx.send(event.clone()).is_ok());
        self.all.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// === impl Subscription ===

impl<K, V> Subscription<K, V> {
    pub async fn recv(&mut self) -> Option<Event<K, V>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event<K, V>> {
        self.rx.try_recv().ok()
    }
}

impl<K, V> Drop for Subscription<K, V> {
    fn drop(&mut self) {
        // Closing first marks this subscriber's sender as closed.
        self.rx.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<K, V> std::fmt::Debug for Subscription<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("keyed", &self.release.is_some())
            .finish()
    }
}

impl<K, V> Stream for Subscription<K, V> {
    type Item = Event<K, V>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

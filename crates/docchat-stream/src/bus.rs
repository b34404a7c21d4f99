//! Typed publish/subscribe with ordered per-category callback lists.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

/// Events that can be routed by category.
pub trait Categorized {
    type Category: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn category(&self) -> Self::Category;
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback<E>,
}

impl<E> Clone for Entry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: self.active.clone(),
            callback: self.callback.clone(),
        }
    }
}

struct Registry<E: Categorized> {
    next_id: AtomicU64,
    slots: Mutex<HashMap<E::Category, Vec<Entry<E>>>>,
}

impl<E: Categorized> Registry<E> {
    fn slots(&self) -> MutexGuard<'_, HashMap<E::Category, Vec<Entry<E>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, category: E::Category, id: u64) {
        let mut slots = self.slots();
        if let Some(entries) = slots.get_mut(&category) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                slots.remove(&category);
            }
        }
    }
}

/// Fan-out event bus. Callbacks for one category run in registration order.
///
/// Cloning the bus shares the same registry.
pub struct EventBus<E: Categorized> {
    registry: Arc<Registry<E>>,
}

impl<E: Categorized> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E: Categorized> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl<E: Categorized + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events of `category`.
    pub fn subscribe<F>(&self, category: E::Category, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.registry
            .slots()
            .entry(category)
            .or_default()
            .push(Entry {
                id,
                active: active.clone(),
                callback: Arc::new(callback),
            });

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            id,
            active,
            detach: Arc::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(category, id);
                }
            }),
        }
    }

    /// Delivers `event` to every active subscriber of its category and
    /// returns how many callbacks ran to completion.
    ///
    /// The subscriber list is snapshotted first, so callbacks may subscribe
    /// or unsubscribe while being invoked.
    pub fn publish(&self, event: &E) -> usize {
        let category = event.category();
        let snapshot: Vec<Entry<E>> = self
            .registry
            .slots()
            .get(&category)
            .map(|entries| entries.to_vec())
            .unwrap_or_default();

        let mut delivered = 0;
        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            let callback = entry.callback;
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(subscription = entry.id, ?category, "subscriber callback panicked"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, category: E::Category) -> usize {
        self.registry
            .slots()
            .get(&category)
            .map_or(0, |entries| entries.len())
    }
}

/// Registration returned by [`EventBus::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    detach: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    /// Removes the callback. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.detach)();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

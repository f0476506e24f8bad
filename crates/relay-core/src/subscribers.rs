use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::warn;

pub(crate) type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct RegistryInner<T> {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback<T>>,
}

/// Callback registry backing one notification channel.
pub(crate) struct Registry<T> {
    name: &'static str,
    inner: Arc<Mutex<RegistryInner<T>>>,
}

impl<T: Clone + 'static> Registry<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                callbacks: BTreeMap::new(),
            })),
        }
    }

    pub(crate) fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.callbacks.insert(id, callback);
            id
        };
        Subscription::new(Arc::downgrade(&self.inner), id)
    }

    /// Hands every current subscriber its own clone of `value`. Callbacks run
    /// outside the registry lock; a panicking callback is logged and skipped.
    pub(crate) fn notify(&self, value: &T) -> usize {
        let callbacks: Vec<Callback<T>> = self.inner.lock().callbacks.values().cloned().collect();
        for callback in &callbacks {
            let copy = value.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(copy))).is_err() {
                warn!(channel = self.name, "subscriber panicked during notification");
            }
        }
        callbacks.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }
}

/// Handle returned by every `subscribe_*` call.
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] may be called
/// any number of times.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new<T: 'static>(registry: Weak<Mutex<RegistryInner<T>>>, id: u64) -> Self {
        let release = move || {
            if let Some(inner) = registry.upgrade() {
                inner.lock().callbacks.remove(&id);
            }
        };
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn unsubscribe(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

//! Keyed client state with change notifications.
//!
//! Views never hold references into the store; they read with [`StateContainer::get`]
//! and react to changes through [`StateContainer::subscribe`]. Values are JSON so
//! equality is structural: writing a value equal to the current one notifies
//! nobody.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

/// Well-known keys written by the views.
pub mod keys {
    pub const AUTH_SESSION: &str = "auth.session";
    pub const AUTH_EXPIRED: &str = "auth.expired";
    pub const UI_TAB: &str = "ui.tab";

    pub const LEADS_QUERY: &str = "leads.query";
    pub const LEADS_PAGE: &str = "leads.page";
    pub const LEADS_LOADING: &str = "leads.loading";
    pub const LEADS_ERROR: &str = "leads.error";

    pub const DASHBOARD_STATS: &str = "dashboard.stats";
    pub const DASHBOARD_SELLERS: &str = "dashboard.sellers";
    pub const DASHBOARD_PROVINCES: &str = "dashboard.provinces";
    pub const DASHBOARD_PLAN: &str = "dashboard.plan";
    pub const DASHBOARD_LAST_ASSIGNMENT: &str = "dashboard.last_assignment";
    pub const DASHBOARD_LOADING: &str = "dashboard.loading";
    pub const DASHBOARD_ERROR: &str = "dashboard.error";

    pub const IMPORT_SUMMARY: &str = "import.summary";
    pub const IMPORT_LOADING: &str = "import.loading";
    pub const IMPORT_ERROR: &str = "import.error";
}

pub type Callback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Entry {
    value: Option<Value>,
    subscribers: Vec<(u64, Callback)>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    next_subscriber: AtomicU64,
    failed_notifications: AtomicU64,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unsubscribe(&self, key: &str, id: u64) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.subscribers.retain(|(sub_id, _)| *sub_id != id);
            if entry.value.is_none() && entry.subscribers.is_empty() {
                entries.remove(key);
            }
        }
    }
}

/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct StateContainer {
    inner: Arc<Inner>,
}

impl StateContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .entries()
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    /// Returns `None` when the key is missing, null, or holds something that
    /// does not decode as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        if value.is_null() {
            return None;
        }
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                debug!(%key, %error, "state value has unexpected shape");
                None
            }
        }
    }

    /// Stores `value` and notifies the key's subscribers when it changed.
    /// Returns whether anything was notified.
    ///
    /// The value is visible to `get` before the first callback runs and no
    /// lock is held during dispatch, so callbacks may write other keys (or
    /// this one). Nothing stops two keys from feeding each other forever.
    pub fn set(&self, key: &str, value: Value) -> bool {
        let subscribers: Vec<Callback> = {
            let mut entries = self.inner.entries();
            let entry = entries.entry(key.to_string()).or_default();
            if entry.value.as_ref() == Some(&value) {
                return false;
            }
            entry.value = Some(value.clone());
            entry.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        self.dispatch(key, &value, subscribers);
        true
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value),
            Err(error) => {
                error!(%key, %error, "state value could not be serialized");
                false
            }
        }
    }

    /// Drops the value. Subscribers stay registered and see `null` if a value
    /// was present.
    pub fn remove(&self, key: &str) -> bool {
        let subscribers: Vec<Callback> = {
            let mut entries = self.inner.entries();
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            if entry.value.take().is_none() {
                return false;
            }
            let subscribers = entry.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            if entry.subscribers.is_empty() {
                entries.remove(key);
            }
            subscribers
        };
        self.dispatch(key, &Value::Null, subscribers);
        true
    }

    /// Forgets every value and subscriber without notifying anyone.
    pub fn clear(&self) {
        self.inner.entries().clear();
    }

    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .entries()
            .entry(key.to_string())
            .or_default()
            .subscribers
            .push((id, Arc::new(callback)));
        Subscription {
            store: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id,
            active: AtomicBool::new(true),
            detached: false,
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .entries()
            .get(key)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Callbacks that returned an error or panicked since the store was created.
    pub fn failed_notifications(&self) -> u64 {
        self.inner.failed_notifications.load(Ordering::Relaxed)
    }

    fn dispatch(&self, key: &str, value: &Value, subscribers: Vec<Callback>) {
        for (index, callback) in subscribers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(value)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.inner
                .failed_notifications
                .fetch_add(1, Ordering::Relaxed);
            warn!(%key, subscriber = index, error = %failure, "state subscriber failed");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Handle returned by [`StateContainer::subscribe`]. Dropping it unsubscribes
/// unless it was [detached](Subscription::detach).
pub struct Subscription {
    store: Weak<Inner>,
    key: String,
    id: u64,
    active: AtomicBool,
    detached: bool,
}

impl Subscription {
    /// Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            inner.unsubscribe(&self.key, self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Keeps the callback registered for the life of the store.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.unsubscribe();
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;

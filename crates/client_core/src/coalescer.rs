use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{Mutex, MutexGuard},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::trace;

/// Shares one in-flight request among every caller asking for the same key.
///
/// The first caller's future is started; callers arriving before it resolves
/// await the same result. The key is released once the result is in, so the
/// next call after that goes to the network again.
pub struct RequestCoalescer<K, V>
where
    V: Clone,
{
    inflight: Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>,
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// `start` is only called when no request for `key` is in flight.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight();
            match inflight.get(&key) {
                Some(existing) => {
                    trace!(?key, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    let fut = start().boxed().shared();
                    inflight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let value = shared.clone().await;

        let mut inflight = self.inflight();
        if inflight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&shared))
        {
            inflight.remove(&key);
        }
        value
    }

    pub fn in_flight(&self) -> usize {
        self.inflight().len()
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<K, Shared<BoxFuture<'static, V>>>> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let coalescer = RequestCoalescer::<String, u32>::new();
        let calls = AtomicUsize::new(0);
        let (release, gate) = oneshot::channel::<()>();

        let first = coalescer.run("page=2".to_string(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = gate.await;
                42
            }
        });
        let second = coalescer.run("page=2".to_string(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { 0 }
        });
        let opener = async {
            tokio::task::yield_now().await;
            assert_eq!(coalescer.in_flight(), 1);
            let _ = release.send(());
        };

        let (a, b, ()) = tokio::join!(first, second, opener);
        assert_eq!((a, b), (42, 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn finished_keys_are_released() {
        let coalescer = RequestCoalescer::<&'static str, u32>::new();
        assert_eq!(coalescer.run("k", || async { 1 }).await, 1);
        assert_eq!(coalescer.run("k", || async { 2 }).await, 2);
        assert_eq!(coalescer.in_flight(), 0);
    }
}

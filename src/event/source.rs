use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};
use uuid::Uuid;

/// Callback invoked for every event fired on a [`Source`]
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct HandlerEntry<E> {
    callback: Callback<E>,
    cancel: CancellationToken,
}

/// Removal side of a registry, erased over the event type so closers are not
/// generic
trait Detach: Send + Sync {
    fn detach(&self, id: Uuid) -> bool;
}

struct Registry<E> {
    name: String,
    handlers: Mutex<HashMap<Uuid, HandlerEntry<E>>>,
}

impl<E> Registry<E> {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, HandlerEntry<E>>> {
        // Callbacks never run under this lock, so a poisoned map is still consistent
        self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: 'static> Detach for Registry<E> {
    fn detach(&self, id: Uuid) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                debug!(source = %self.name, handler_id = %id, "Handler closed");
                true
            }
            None => false,
        }
    }
}

/// Named event source that handlers register callbacks against
///
/// Cloning a `Source` yields another handle to the same registry.
pub struct Source<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for Source<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E> fmt::Debug for Source<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.registry.name)
            .field("handlers", &self.registry.lock().len())
            .finish()
    }
}

impl<E: 'static> Source<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(Registry {
                name: name.into(),
                handlers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.registry.name
    }

    /// Registers a callback and returns the closer that unregisters it
    pub fn register<F>(&self, callback: F) -> HandlerCloser
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        self.registry.lock().insert(
            id,
            HandlerEntry {
                callback: Arc::new(callback),
                cancel: cancel.clone(),
            },
        );

        debug!(source = %self.registry.name, handler_id = %id, "Handler registered");

        let registry: Arc<dyn Detach> = self.registry.clone();
        HandlerCloser {
            id,
            registry: Some(Arc::downgrade(&registry)),
            cancel,
        }
    }

    /// Registers a callback that is closed once `lifetime` is cancelled
    ///
    /// Spawns the bridge task that forwards the external cancellation into
    /// the handler, so it must be called from within a tokio runtime.
    pub fn register_until<F>(&self, lifetime: &CancellationToken, callback: F) -> HandlerCloser
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let closer = self.register(callback);
        let bridge = closer.clone();
        let lifetime = lifetime.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = lifetime.cancelled() => {
                    bridge.close();
                }
                // Closed by the registrant first, nothing left to bridge
                _ = bridge.closed() => {}
            }
        });

        closer
    }

    /// Invokes every registered callback and returns how many ran
    ///
    /// Callbacks are snapshotted under the lock and invoked outside it, so a
    /// callback may register or close handlers on this same source.
    pub fn fire(&self, event: &E) -> usize {
        let callbacks: Vec<Callback<E>> = self
            .registry
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.callback))
            .collect();

        for callback in &callbacks {
            callback(event);
        }

        callbacks.len()
    }

    /// Closes every handler registered on this source
    pub fn close_all(&self) -> usize {
        let drained: Vec<(Uuid, HandlerEntry<E>)> = self.registry.lock().drain().collect();

        for (_, entry) in &drained {
            entry.cancel.cancel();
        }

        if !drained.is_empty() {
            warn!(
                source = %self.registry.name,
                count = drained.len(),
                "Source torn down with handlers still registered"
            );
        }

        drained.len()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Source::register`]
///
/// `close` may be called any number of times from any number of clones; only
/// the first call removes the handler and fires its cancellation signal.
#[derive(Clone)]
pub struct HandlerCloser {
    id: Uuid,
    registry: Option<Weak<dyn Detach>>,
    cancel: CancellationToken,
}

impl HandlerCloser {
    /// A closer bound to no source; closing it does nothing
    pub fn noop() -> Self {
        Self {
            id: Uuid::nil(),
            registry: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Unregisters the handler. Returns `true` only for the call that removed it.
    pub fn close(&self) -> bool {
        let Some(registry) = self.registry.as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        registry.detach(self.id)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the handler has been closed
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl fmt::Debug for HandlerCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCloser")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn counting_source() -> (Source<u32>, Arc<AtomicU32>) {
        (Source::new("test"), Arc::new(AtomicU32::new(0)))
    }

    #[test]
    fn test_fire_reaches_every_handler() {
        let (source, calls) = counting_source();

        for _ in 0..3 {
            let calls = calls.clone();
            source.register(move |n: &u32| {
                calls.fetch_add(*n, Ordering::Relaxed);
            });
        }

        assert_eq!(source.fire(&2), 3);
        assert_eq!(calls.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (source, calls) = counting_source();
        let counter = calls.clone();
        let closer = source.register(move |_: &u32| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        assert!(closer.close());
        assert!(closer.is_closed());
        assert!(!closer.close());
        assert!(!closer.clone().close());

        assert_eq!(source.fire(&1), 0);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_closing_one_handler_leaves_others() {
        let (source, _) = counting_source();
        let first = source.register(|_: &u32| {});
        let second = source.register(|_: &u32| {});

        assert_ne!(first.id(), second.id());
        first.close();

        assert_eq!(source.len(), 1);
        assert!(!second.is_closed());
    }

    #[test]
    fn test_concurrent_close_fires_once() {
        let (source, _) = counting_source();
        let closer = source.register(|_: &u32| {});

        let removed: u32 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let closer = closer.clone();
                    scope.spawn(move || closer.close() as u32)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(removed, 1);
        assert!(closer.is_closed());
        assert!(source.is_empty());
    }

    #[test]
    fn test_closer_outliving_source_is_noop() {
        let closer = {
            let source: Source<u32> = Source::new("short-lived");
            source.register(|_: &u32| {})
        };

        assert!(!closer.close());
        assert!(!HandlerCloser::noop().close());
    }

    #[test]
    fn test_close_all_cancels_every_handler() {
        let (source, _) = counting_source();
        let closers: Vec<_> = (0..4).map(|_| source.register(|_: &u32| {})).collect();

        assert_eq!(source.close_all(), 4);
        assert!(closers.iter().all(HandlerCloser::is_closed));
        assert!(closers.iter().all(|c| !c.close()));
    }

    #[test]
    fn test_callback_may_close_itself() {
        let source: Source<u32> = Source::new("self-closing");
        let slot: Arc<Mutex<Option<HandlerCloser>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();

        let closer = source.register(move |_: &u32| {
            if let Some(closer) = inner.lock().unwrap().as_ref() {
                closer.close();
            }
        });
        *slot.lock().unwrap() = Some(closer.clone());

        assert_eq!(source.fire(&1), 1);
        assert!(closer.is_closed());
        assert_eq!(source.fire(&1), 0);
    }

    #[tokio::test]
    async fn test_register_until_closes_on_cancellation() {
        let (source, _) = counting_source();
        let lifetime = CancellationToken::new();
        let closer = source.register_until(&lifetime, |_: &u32| {});

        assert_eq!(source.len(), 1);
        lifetime.cancel();

        tokio::time::timeout(Duration::from_secs(1), closer.closed())
            .await
            .expect("bridge should close the handler");
        assert!(source.is_empty());
    }
}

//! Typed publish/subscribe event bus.
//!
//! Listeners are registered with [`EventBus::listen`] (synchronous closure) or
//! [`EventBus::listen_async`] (closure returning a future). [`EventBus::fire`]
//! delivers one event to every listener registered at the moment of the call
//! and awaits all of them concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::RwLock;

type Listener<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct BusInner<T> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener<T>)>>,
}

/// Publish/subscribe primitive with concurrent fan-out.
pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a synchronous listener.
    pub fn listen<F>(&self, f: F) -> ListenerHandle<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register(Arc::new(move |event: T| {
            let f = Arc::clone(&f);
            async move { f(event) }.boxed()
        }))
    }

    /// Register an asynchronous listener.
    pub fn listen_async<F, Fut>(&self, f: F) -> ListenerHandle<T>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Arc::new(move |event: T| f(event).boxed()))
    }

    fn register(&self, listener: Listener<T>) -> ListenerHandle<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, listener));
        ListenerHandle {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every listener and wait for all of them.
    pub async fn fire(&self, event: T) {
        let snapshot: Vec<Listener<T>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        let _ = join_all(snapshot.iter().map(|l| l(event.clone()))).await;
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration token returned by [`EventBus::listen`].
///
/// Dropping the handle keeps the listener registered; call
/// [`ListenerHandle::dispose`] to remove it.
pub struct ListenerHandle<T> {
    id: u64,
    bus: Weak<BusInner<T>>,
}

impl<T> ListenerHandle<T> {
    /// Remove the listener from its bus. Idempotent.
    pub fn dispose(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn fire_reaches_sync_and_async_listeners() {
        let bus = EventBus::<u32>::new();
        let sum = Arc::new(AtomicUsize::new(0));

        let s1 = sum.clone();
        let _h1 = bus.listen(move |v| {
            let _ = s1.fetch_add(v as usize, Ordering::SeqCst);
        });
        let s2 = sum.clone();
        let _h2 = bus.listen_async(move |v| {
            let s2 = s2.clone();
            async move {
                tokio::task::yield_now().await;
                let _ = s2.fetch_add(v as usize * 10, Ordering::SeqCst);
            }
        });

        bus.fire(3).await;
        assert_eq!(sum.load(Ordering::SeqCst), 33);
    }

    #[tokio::test]
    async fn dispose_removes_listener() {
        let bus = EventBus::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = bus.listen(move |()| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });

        bus.fire(()).await;
        handle.dispose();
        handle.dispose();
        bus.fire(()).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn listeners_run_concurrently() {
        tokio::time::pause();
        let bus = EventBus::<u64>::new();
        for _ in 0..4 {
            let _ = bus.listen_async(|ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            });
        }

        let start = tokio::time::Instant::now();
        bus.fire(100).await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn dispose_after_bus_dropped_is_noop() {
        let bus = EventBus::<u8>::new();
        let handle = bus.listen(|_| {});
        drop(bus);
        handle.dispose();
    }

    #[tokio::test]
    async fn clones_share_listeners() {
        let bus = EventBus::<String>::new();
        let other = bus.clone();
        let _h = other.listen(|_| {});
        assert_eq!(bus.listener_count(), 1);
    }
}

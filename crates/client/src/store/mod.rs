//! Observable store core.
//!
//! One [`Store`] per slice: immutable `Arc` snapshots, a registered
//! reducer, and a hot observation stream where a late subscriber
//! immediately receives the current value. Reducers that return the
//! same `Arc` reference suppress observer notification.

pub mod dispatcher;
pub mod selector;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

pub use dispatcher::Dispatcher;
pub use selector::Selector;

/// A pure reducer: returns a new state, or a clone of the input `Arc`
/// to signal "unchanged".
pub type Reducer<T, A> = Arc<dyn Fn(&Arc<T>, &A) -> Arc<T> + Send + Sync>;

pub struct Store<T, A> {
    tx: watch::Sender<Arc<T>>,
    reducer: Reducer<T, A>,
    disposed: Arc<AtomicBool>,
}

impl<T, A> Clone for Store<T, A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            reducer: self.reducer.clone(),
            disposed: self.disposed.clone(),
        }
    }
}

impl<T: Send + Sync + 'static, A> Store<T, A> {
    pub fn new(initial: T, reducer: impl Fn(&Arc<T>, &A) -> Arc<T> + Send + Sync + 'static) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self {
            tx,
            reducer: Arc::new(reducer),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The current immutable value.
    pub fn state(&self) -> Arc<T> {
        self.tx.borrow().clone()
    }

    /// Route an action through the reducer. Observers are notified
    /// only when the reducer returned a different reference.
    pub fn dispatch(&self, action: &A) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let current = self.state();
        let next = (self.reducer)(&current, action);
        if !Arc::ptr_eq(&current, &next) {
            let _ = self.tx.send(next);
        }
    }

    /// Hot observation stream: yields the current value immediately,
    /// then every subsequent value. Ends when the store is disposed
    /// (or dropped).
    pub fn observe(&self) -> impl futures_core::Stream<Item = Arc<T>> + Send + 'static {
        let mut rx = self.tx.subscribe();
        let disposed = self.disposed.clone();
        async_stream::stream! {
            let current = rx.borrow_and_update().clone();
            yield current;
            while rx.changed().await.is_ok() {
                if disposed.load(Ordering::Acquire) {
                    break;
                }
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        }
    }

    /// Release all subscriptions; later dispatches are no-ops.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        // Wake observers so their streams can end.
        self.tx.send_modify(|_| {});
    }
}

//! Memoized selectors over store snapshots.
//!
//! A selector short-circuits only when the input `Arc` is the same
//! reference as the previous call; it never caches across state
//! references.

use std::sync::Arc;

use parking_lot::Mutex;

pub struct Selector<T, R> {
    project: Arc<dyn Fn(&Arc<T>) -> R + Send + Sync>,
    cache: Mutex<Option<(Arc<T>, R)>>,
}

impl<T, R: Clone> Selector<T, R> {
    pub fn new(project: impl Fn(&Arc<T>) -> R + Send + Sync + 'static) -> Self {
        Self {
            project: Arc::new(project),
            cache: Mutex::new(None),
        }
    }

    /// Project the snapshot, reusing the cached result when the input
    /// reference is unchanged.
    pub fn select(&self, input: &Arc<T>) -> R {
        {
            let cache = self.cache.lock();
            if let Some((cached_input, cached_result)) = cache.as_ref() {
                if Arc::ptr_eq(cached_input, input) {
                    return cached_result.clone();
                }
            }
        }
        let result = (self.project)(input);
        *self.cache.lock() = Some((input.clone(), result.clone()));
        result
    }
}

/// Chain two selectors: `inner` projects the state to an intermediate
/// `Arc<M>`, `outer` projects that. Because `inner` returns the same
/// `Arc` for an unchanged input, the outer cache hits too.
pub fn compose<T, M, R>(outer: Selector<M, R>, inner: Selector<T, Arc<M>>) -> Selector<T, R>
where
    T: Send + Sync + 'static,
    M: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    Selector::new(move |input: &Arc<T>| outer.select(&inner.select(input)))
}

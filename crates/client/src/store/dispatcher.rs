//! Process-wide action dispatcher.
//!
//! Handlers are registered per action type and invoked synchronously
//! in registration order. An action with no registered handler is a
//! silent no-op. Constructed once at client startup with an explicit
//! lifetime; there is no hidden global.

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::RwLock;

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    /// `(action type, handler)` pairs in registration order.
    handlers: RwLock<Vec<(TypeId, Handler)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to the action type `A`.
    pub fn register_handler<A: 'static>(&self, handler: impl Fn(&A) + Send + Sync + 'static) {
        let erased: Handler = Arc::new(move |any| {
            if let Some(action) = any.downcast_ref::<A>() {
                handler(action);
            }
        });
        self.handlers.write().push((TypeId::of::<A>(), erased));
    }

    /// Invoke every handler registered for this action's type,
    /// synchronously, in registration order.
    pub fn dispatch<A: 'static>(&self, action: A) {
        let matching: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .filter(|(type_id, _)| *type_id == TypeId::of::<A>())
            .map(|(_, h)| h.clone())
            .collect();
        for handler in matching {
            handler(&action);
        }
    }
}

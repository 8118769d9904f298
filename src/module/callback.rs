//! Per-module callback table.
//!
//! A module publishes numbered callbacks; other modules subscribe with a
//! handler over a concrete event type. Dispatch runs the handlers in
//! subscription order over one shared, mutable event and stops at the first
//! handler that returns `false`.

use std::any::{type_name, Any};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{trace, warn};

use crate::error::{CoreError, Result};

/// Callback ids per module.
pub const MAX_CALLBACK_ID: u32 = 32;

/// Subscribers per callback id.
pub const MAX_CALLBACK_COUNT: usize = 16;

// `None` means the payload was not the type the handler subscribed with.
type HandlerFn = dyn Fn(&mut dyn Any) -> Option<bool> + Send + Sync + 'static;

#[derive(Clone)]
struct Subscriber {
    module: String,
    handler: Arc<HandlerFn>,
}

/// Ordered subscriber lists indexed by callback id.
pub struct CallbackTable {
    owner: String,
    slots: RwLock<Vec<Arc<Vec<Subscriber>>>>,
}

impl CallbackTable {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            slots: RwLock::new(
                (0..MAX_CALLBACK_ID)
                    .map(|_| Arc::new(Vec::new()))
                    .collect(),
            ),
        }
    }

    /// Append `handler` to the list for `id`.
    pub fn add<E, F>(&self, id: u32, subscriber: &str, handler: F) -> Result<()>
    where
        E: Any,
        F: Fn(&mut E) -> bool + Send + Sync + 'static,
    {
        if id >= MAX_CALLBACK_ID {
            return Err(CoreError::CallbackIdOutOfRange(id));
        }
        let erased: Arc<HandlerFn> =
            Arc::new(move |event: &mut dyn Any| event.downcast_mut::<E>().map(|e| handler(e)));

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let list = Arc::make_mut(&mut slots[id as usize]);
        if list.len() >= MAX_CALLBACK_COUNT {
            return Err(CoreError::CallbackCapacity {
                module: self.owner.clone(),
                id,
            });
        }
        list.push(Subscriber {
            module: subscriber.to_string(),
            handler: erased,
        });
        trace!(owner = %self.owner, id, subscriber, "Callback added");
        Ok(())
    }

    fn list(&self, id: u32) -> Option<Arc<Vec<Subscriber>>> {
        if id >= MAX_CALLBACK_ID {
            return None;
        }
        // Handlers run without the lock held so they may subscribe or
        // dispatch on this table themselves.
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Some(slots[id as usize].clone())
    }

    /// Run every handler for `id` in order. Returns `false` at the first
    /// veto, `true` when all handlers approve or none are subscribed.
    pub fn enumerate<E: Any>(&self, id: u32, event: &mut E) -> bool {
        let Some(list) = self.list(id) else {
            warn!(owner = %self.owner, id, "Callback id out of range");
            return false;
        };
        list.iter().all(|sub| self.invoke(sub, id, event))
    }

    /// Run only the handler at `index` in the list for `id`.
    pub fn enumerate_indexed<E: Any>(&self, id: u32, event: &mut E, index: usize) -> bool {
        match self.list(id).as_deref().and_then(|l| l.get(index)) {
            Some(sub) => self.invoke(sub, id, event),
            None => false,
        }
    }

    fn invoke<E: Any>(&self, sub: &Subscriber, id: u32, event: &mut E) -> bool {
        match (sub.handler)(event) {
            Some(approved) => approved,
            None => {
                warn!(
                    owner = %self.owner,
                    id,
                    subscriber = %sub.module,
                    event = type_name::<E>(),
                    "Callback payload type mismatch"
                );
                false
            }
        }
    }

    /// Number of subscribers for `id`.
    pub fn count(&self, id: u32) -> usize {
        self.list(id).map_or(0, |l| l.len())
    }

    /// Subscriber module names for `id`, in dispatch order.
    pub fn subscribers(&self, id: u32) -> Vec<String> {
        self.list(id)
            .map(|l| l.iter().map(|s| s.module.clone()).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTable")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

//! Scoped handler registration.
//!
//! An [`EventSource`] holds the handlers for one kind of notification.
//! Subscribing returns a [`Subscription`] guard; dropping the guard removes
//! the handler, so every exit path (detach, unbind, panic unwinding) releases
//! its registration without a matching manual unsubscribe call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type HandlerFn<T> = dyn Fn(&T) + Send + Sync;

struct Slot<T> {
    id: u64,
    active: AtomicBool,
    handler: Box<HandlerFn<T>>,
}

struct Slots<T> {
    next_id: u64,
    entries: Vec<Arc<Slot<T>>>,
}

/// A list of handlers for notifications of type `T`.
///
/// `Clone` is cheap and shares the handler list.
pub struct EventSource<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T> Clone for EventSource<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> Default for EventSource<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl<T: 'static> EventSource<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` and return the guard that keeps it registered.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let id = slots.next_id;
        slots.next_id += 1;
        let slot = Arc::new(Slot {
            id,
            active: AtomicBool::new(true),
            handler: Box::new(handler),
        });
        slots.entries.push(Arc::clone(&slot));
        drop(slots);

        let weak_slots: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            slot.active.store(false, Ordering::Release);
            if let Some(slots) = weak_slots.upgrade() {
                let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                slots.entries.retain(|entry| entry.id != id);
            }
        })
    }

    /// Invoke every registered handler with `args`, in subscription order.
    ///
    /// The handler list is snapshotted first and no lock is held while
    /// handlers run, so a handler may subscribe, unsubscribe, or raise again.
    /// A handler cancelled by an earlier handler in the same pass is skipped.
    ///
    /// # Returns
    ///
    /// The number of handlers invoked.
    pub fn raise(&self, args: &T) -> usize {
        let snapshot: Vec<Arc<Slot<T>>> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entries.clone()
        };

        let mut invoked = 0;
        for slot in snapshot {
            if slot.active.load(Ordering::Acquire) {
                (slot.handler)(args);
                invoked += 1;
            }
        }
        invoked
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// Guard for a registered handler. Dropping it unregisters the handler.
#[must_use = "dropping a Subscription immediately unregisters its handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A guard with nothing to release.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Unregister now. Equivalent to dropping the guard.
    pub fn cancel(mut self) {
        self.release();
    }

    /// Whether this guard still holds a registration.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

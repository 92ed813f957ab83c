//! Mapping from live notifiers to the view element that renders their state.
//!
//! Each entry owns the [`Subscription`] to its notifier's state stream, so
//! removing the entry is also what stops the view from receiving
//! transitions. A notifier maps to at most one view; the first bind wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::element::{ElementId, ViewElement};
use crate::event::StateChangeEvent;
use crate::notifier::{NotificationSource, NotifierId};
use crate::subscription::Subscription;

/// Configuration for [`StateRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Animation flag passed to every `go_to_state` call.
    ///
    /// Default: `true` (use transitions when the view defines them).
    pub use_transitions: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            use_transitions: true,
        }
    }
}

struct RegistryEntry {
    view_id: ElementId,
    view: Weak<dyn ViewElement>,
    _subscription: Subscription,
}

struct RegistryInner {
    config: RegistryConfig,
    entries: Mutex<HashMap<NotifierId, RegistryEntry>>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<NotifierId, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The live view bound to `notifier`. An entry whose view has been
    /// dropped is evicted.
    fn view_for(&self, notifier: NotifierId) -> Option<Arc<dyn ViewElement>> {
        let stale = {
            let mut entries = self.lock();
            let entry = entries.get(&notifier)?;
            if let Some(view) = entry.view.upgrade() {
                return Some(view);
            }
            entries.remove(&notifier)
        };
        if let Some(entry) = stale {
            tracing::debug!(%notifier, view = %entry.view_id, "evicted entry of dropped view");
        }
        None
    }

    /// Remove every entry whose view has been dropped and return them, so
    /// the caller can release their subscriptions outside the lock.
    fn take_stale(entries: &mut HashMap<NotifierId, RegistryEntry>) -> Vec<RegistryEntry> {
        let dead: Vec<NotifierId> = entries
            .iter()
            .filter(|(_, entry)| entry.view.strong_count() == 0)
            .map(|(notifier, _)| *notifier)
            .collect();
        dead.iter().filter_map(|notifier| entries.remove(notifier)).collect()
    }

    /// Drive the view bound to `notifier` to `state`.
    ///
    /// The entry lock is released before calling into the view, which may
    /// re-enter the registry.
    fn on_notifier_state_changed(&self, notifier: NotifierId, event: &StateChangeEvent) -> bool {
        let Some(view) = self.view_for(notifier) else {
            return false;
        };
        let Some(states) = view.visual_states() else {
            tracing::trace!(%notifier, view = %view.element_id(), "bound view has no visual states");
            return false;
        };
        let moved = states.go_to_state(event.state_name(), self.config.use_transitions);
        tracing::debug!(
            %notifier,
            view = %view.element_id(),
            state = event.state_name(),
            moved,
            "applied visual state"
        );
        moved
    }
}

/// Notifier-to-view bindings.
///
/// `Clone` is cheap and shares the same map. Mutation is guarded by a mutex
/// that is never held while notifiers or views run user code.
#[derive(Clone)]
pub struct StateRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl StateRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Bind `notifier` to `view` and start forwarding its state changes.
    ///
    /// Entries whose view has been dropped are evicted first, so a notifier
    /// whose view went away can be bound again.
    ///
    /// # Returns
    ///
    /// `false`, leaving the existing binding untouched, when the notifier is
    /// already bound to a live view.
    pub fn bind(&self, notifier: &Arc<dyn NotificationSource>, view: &Arc<dyn ViewElement>) -> bool {
        let notifier_id = notifier.notifier_id();
        let view_id = view.element_id();

        let mut entries = self.inner.lock();
        let stale = RegistryInner::take_stale(&mut entries);
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "evicted entries of dropped views");
        }
        if let Some(existing) = entries.get(&notifier_id) {
            tracing::debug!(
                notifier = %notifier_id,
                bound = %existing.view_id,
                ignored = %view_id,
                "notifier already bound, ignoring"
            );
            drop(entries);
            drop(stale);
            return false;
        }

        let weak_inner = Arc::downgrade(&self.inner);
        let subscription =
            notifier.subscribe_state_changed(Box::new(move |event: &StateChangeEvent| {
                if let Some(inner) = weak_inner.upgrade() {
                    inner.on_notifier_state_changed(notifier_id, event);
                }
            }));
        entries.insert(
            notifier_id,
            RegistryEntry {
                view_id,
                view: Arc::downgrade(view),
                _subscription: subscription,
            },
        );
        drop(entries);
        drop(stale);
        tracing::debug!(notifier = %notifier_id, view = %view_id, "bound notifier to view");
        true
    }

    /// Remove the binding for `notifier`, if any.
    pub fn unbind(&self, notifier: NotifierId) -> bool {
        let removed = self.inner.lock().remove(&notifier);
        // Dropped outside the lock: releasing the subscription takes the
        // notifier's handler lock.
        match removed {
            Some(entry) => {
                tracing::debug!(notifier = %notifier, view = %entry.view_id, "unbound notifier");
                true
            }
            None => false,
        }
    }

    /// Remove the binding whose view is `view`, if any.
    pub fn unbind_by_view(&self, view: ElementId) -> bool {
        let removed = {
            let mut entries = self.inner.lock();
            let key = entries
                .iter()
                .find(|(_, entry)| entry.view_id == view)
                .map(|(notifier, _)| *notifier);
            key.and_then(|notifier| entries.remove_entry(&notifier))
        };
        match removed {
            Some((notifier, _entry)) => {
                tracing::debug!(%notifier, %view, "unbound view");
                true
            }
            None => false,
        }
    }

    /// Drive the view bound to `notifier` to `state` without going through
    /// the notifier. Used to apply a view's initial state on load.
    ///
    /// # Returns
    ///
    /// `true` if a bound, stateful view accepted the state.
    pub fn apply_state(&self, notifier: NotifierId, state: &str) -> bool {
        match StateChangeEvent::new(state, None) {
            Ok(event) => self.inner.on_notifier_state_changed(notifier, &event),
            Err(_) => false,
        }
    }

    /// The live view bound to `notifier`.
    pub fn view_for(&self, notifier: NotifierId) -> Option<Arc<dyn ViewElement>> {
        self.inner.view_for(notifier)
    }

    /// Whether `notifier` has an entry, live or not yet evicted.
    pub fn contains(&self, notifier: NotifierId) -> bool {
        self.inner.lock().contains_key(&notifier)
    }

    /// Whether some entry binds to `view`.
    pub fn contains_view(&self, view: ElementId) -> bool {
        self.inner.lock().values().any(|entry| entry.view_id == view)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every entry whose view has been dropped.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn prune(&self) -> usize {
        let stale = RegistryInner::take_stale(&mut self.inner.lock());
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "evicted entries of dropped views");
        }
        stale.len()
    }

    /// Drop every binding.
    pub fn clear(&self) {
        let drained: Vec<RegistryEntry> = self.inner.lock().drain().map(|(_, e)| e).collect();
        tracing::debug!(count = drained.len(), "cleared registry");
    }
}

impl fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRegistry")
            .field("entries", &self.len())
            .field("use_transitions", &self.inner.config.use_transitions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::element::{BasicElement, VisualStates};
    use crate::notifier::StateNotifier;

    struct Fixture {
        _owner: crate::dispatcher::OwnerLoop,
        vm: StateNotifier,
        notifier: Arc<dyn NotificationSource>,
    }

    fn fixture() -> Fixture {
        let dispatcher = Dispatcher::default();
        let owner = dispatcher.attach_current_thread();
        let vm = StateNotifier::new(dispatcher);
        let notifier: Arc<dyn NotificationSource> = Arc::new(vm.clone());
        Fixture {
            _owner: owner,
            vm,
            notifier,
        }
    }

    fn history(element: &BasicElement) -> Vec<String> {
        element
            .visual_state()
            .expect("element has visual states")
            .history()
            .into_iter()
            .map(|(state, _)| state)
            .collect()
    }

    #[test]
    fn first_bind_wins() {
        let f = fixture();
        let registry = StateRegistry::default();
        let first = Arc::new(BasicElement::new());
        let second = Arc::new(BasicElement::new());
        let v1: Arc<dyn ViewElement> = first.clone();
        let v2: Arc<dyn ViewElement> = second.clone();

        assert!(registry.bind(&f.notifier, &v1));
        assert!(!registry.bind(&f.notifier, &v2));

        let bound = registry.view_for(f.vm.notifier_id()).expect("entry exists");
        assert_eq!(bound.element_id(), first.element_id());

        f.vm.set_current_state("Busy").expect("set should succeed");
        assert_eq!(history(&first), vec!["Busy"]);
        assert!(history(&second).is_empty());
    }

    #[test]
    fn double_unbind_is_safe() {
        let f = fixture();
        let registry = StateRegistry::default();
        let view: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        registry.bind(&f.notifier, &view);

        assert!(registry.unbind(f.vm.notifier_id()));
        assert!(!registry.unbind(f.vm.notifier_id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn state_changes_reach_bound_view_in_order() {
        let f = fixture();
        let registry = StateRegistry::default();
        let element = Arc::new(BasicElement::new());
        let view: Arc<dyn ViewElement> = element.clone();
        registry.bind(&f.notifier, &view);

        f.vm.set_current_state("Busy").expect("set should succeed");
        f.vm.set_current_state("Idle").expect("set should succeed");

        let states = element.visual_state().expect("element has visual states");
        assert_eq!(
            states.history(),
            vec![("Busy".to_string(), true), ("Idle".to_string(), true)]
        );
    }

    #[test]
    fn unbind_stops_forwarding() {
        let f = fixture();
        let registry = StateRegistry::default();
        let element = Arc::new(BasicElement::new());
        let view: Arc<dyn ViewElement> = element.clone();
        registry.bind(&f.notifier, &view);

        registry.unbind_by_view(element.element_id());
        f.vm.set_current_state("Busy").expect("set should succeed");

        assert!(history(&element).is_empty());
        assert!(!registry.contains(f.vm.notifier_id()));
    }

    #[test]
    fn unbind_by_view_ignores_unknown_view() {
        let f = fixture();
        let registry = StateRegistry::default();
        let view: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        registry.bind(&f.notifier, &view);

        assert!(!registry.unbind_by_view(ElementId::new()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains_view(view.element_id()));
    }

    #[test]
    fn stateless_view_is_skipped() {
        let f = fixture();
        let registry = StateRegistry::default();
        let view: Arc<dyn ViewElement> = Arc::new(BasicElement::stateless());
        registry.bind(&f.notifier, &view);

        assert!(!registry.apply_state(f.vm.notifier_id(), "Busy"));
    }

    #[test]
    fn dropped_view_is_not_resurrected() {
        let f = fixture();
        let registry = StateRegistry::default();
        let view: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        registry.bind(&f.notifier, &view);
        drop(view);

        assert!(registry.view_for(f.vm.notifier_id()).is_none());
        assert!(registry.is_empty());
        // Forwarding to a dropped view is a quiet no-op.
        f.vm.set_current_state("Busy").expect("set should succeed");
    }

    #[test]
    fn notifier_rebinds_after_view_dropped() {
        let f = fixture();
        let registry = StateRegistry::default();
        let first: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        registry.bind(&f.notifier, &first);
        drop(first);

        let element = Arc::new(BasicElement::new());
        let second: Arc<dyn ViewElement> = element.clone();
        assert!(registry.bind(&f.notifier, &second));
        assert_eq!(registry.len(), 1);

        f.vm.set_current_state("Busy").expect("set should succeed");
        assert_eq!(history(&element), vec!["Busy"]);
    }

    #[test]
    fn forwarding_evicts_entry_of_dropped_view() {
        let f = fixture();
        let registry = StateRegistry::default();
        let view: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        registry.bind(&f.notifier, &view);
        drop(view);
        assert!(registry.contains(f.vm.notifier_id()));

        f.vm.set_current_state("Busy").expect("set should succeed");

        assert!(!registry.contains(f.vm.notifier_id()));
    }

    #[test]
    fn prune_removes_only_dropped_views() {
        let f = fixture();
        let other = StateNotifier::new(f.vm.dispatcher().clone());
        let other: Arc<dyn NotificationSource> = Arc::new(other);
        let registry = StateRegistry::default();
        let live: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        let dead: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        registry.bind(&f.notifier, &live);
        registry.bind(&other, &dead);
        drop(dead);

        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains_view(live.element_id()));
    }

    #[test]
    fn transitions_flag_follows_config() {
        let f = fixture();
        let registry = StateRegistry::new(RegistryConfig {
            use_transitions: false,
        });
        let element = Arc::new(BasicElement::with_visual_states(Some(
            VisualStates::with_states(["Busy"]),
        )));
        let view: Arc<dyn ViewElement> = element.clone();
        registry.bind(&f.notifier, &view);

        assert!(registry.apply_state(f.vm.notifier_id(), "Busy"));
        let states = element.visual_state().expect("element has visual states");
        assert_eq!(states.history(), vec![("Busy".to_string(), false)]);
    }

    #[test]
    fn handler_may_unbind_reentrantly() {
        let f = fixture();
        let registry = StateRegistry::default();
        let view: Arc<dyn ViewElement> = Arc::new(BasicElement::new());
        registry.bind(&f.notifier, &view);

        let reentrant = registry.clone();
        let id = f.vm.notifier_id();
        let _sub = f.vm.subscribe_state_changed(Box::new(move |_| {
            reentrant.unbind(id);
        }));

        // Must not deadlock on the registry lock.
        f.vm.set_current_state("Busy").expect("set should succeed");
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_releases_subscriptions() {
        let f = fixture();
        let registry = StateRegistry::default();
        let element = Arc::new(BasicElement::new());
        let view: Arc<dyn ViewElement> = element.clone();
        registry.bind(&f.notifier, &view);

        registry.clear();
        f.vm.set_current_state("Busy").expect("set should succeed");

        assert!(registry.is_empty());
        assert!(history(&element).is_empty());
    }
}

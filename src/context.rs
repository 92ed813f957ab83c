//! Process-wide context tying a dispatcher to a state registry.
//!
//! A [`ViewContext`] is built once per UI via [`ViewContextBuilder`]. It
//! owns the [`Dispatcher`] that view models emit through and the
//! [`StateRegistry`] that maps them to views, and manages the initial-state
//! attachment of elements: an element given an initial state is bound to its
//! view model while loaded and driven to that state on every load.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::dispatcher::{Dispatcher, DispatcherConfig, OwnerThread};
use crate::element::{DataContext, ElementId, ViewElement};
use crate::event::DataContextChanged;
use crate::notifier::{NotificationSource, StateNotifier};
use crate::registry::{RegistryConfig, StateRegistry};
use crate::subscription::Subscription;

/// Lifecycle subscriptions installed for an element with an initial state.
struct StateAttachment {
    element: Weak<dyn ViewElement>,
    initial_state: Arc<Mutex<String>>,
    _subscriptions: Vec<Subscription>,
}

struct ContextInner {
    dispatcher: Dispatcher,
    registry: StateRegistry,
    owner: Mutex<Option<OwnerThread>>,
    attachments: Mutex<HashMap<ElementId, StateAttachment>>,
}

impl ContextInner {
    fn attachments(&self) -> MutexGuard<'_, HashMap<ElementId, StateAttachment>> {
        self.attachments.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dispatcher, registry and initial-state attachments of one UI.
///
/// `Clone` is cheap; all state is shared.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use mvvm_states::{BasicElement, DataContext, ViewContext, ViewElement};
///
/// let context = ViewContext::builder().build().unwrap();
/// let _owner = context.dispatcher().attach_current_thread();
///
/// let vm = Arc::new(context.create_notifier());
/// let element = Arc::new(BasicElement::new());
/// element.set_data_context(Some(DataContext::notifying(Arc::clone(&vm))));
/// let view: Arc<dyn ViewElement> = element.clone();
/// context.set_initial_state(&view, Some("Idle"));
///
/// element.load();
/// assert_eq!(element.visual_state().unwrap().current().as_deref(), Some("Idle"));
/// ```
#[derive(Clone)]
pub struct ViewContext {
    inner: Arc<ContextInner>,
}

impl ViewContext {
    /// Start configuring a context.
    pub fn builder() -> ViewContextBuilder {
        ViewContextBuilder::new()
    }

    /// The dispatcher shared by every notifier created through this context.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.inner.registry
    }

    /// A new view model emitting through this context's dispatcher.
    pub fn create_notifier(&self) -> StateNotifier {
        StateNotifier::new(self.inner.dispatcher.clone())
    }

    /// Set or clear the state `element` enters each time it is loaded.
    ///
    /// Setting a state on an element without one subscribes to its
    /// data-context, loaded and unloaded notifications; clearing it drops
    /// them. Replacing one state with another only updates the stored name.
    /// An empty name clears. Nothing is applied until the next load.
    pub fn set_initial_state(&self, element: &Arc<dyn ViewElement>, state: Option<&str>) {
        let id = element.element_id();
        let state = state.filter(|s| !s.is_empty());
        let mut attachments = self.inner.attachments();
        let stale = take_dropped(&mut attachments);
        if stale > 0 {
            tracing::debug!(count = stale, "dropped attachments of released elements");
        }
        let existing = attachments
            .get(&id)
            .map(|attachment| Arc::clone(&attachment.initial_state));
        match (existing, state) {
            (Some(slot), Some(state)) => {
                *slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = state.to_string();
                tracing::debug!(element = %id, state, "initial state updated");
            }
            (Some(_), None) => {
                let removed = attachments.remove(&id);
                drop(attachments);
                drop(removed);
                tracing::debug!(element = %id, "initial state cleared");
            }
            (None, Some(state)) => {
                attachments.insert(id, self.attach(element, state));
                tracing::debug!(element = %id, state, "initial state attached");
            }
            (None, None) => {}
        }
    }

    /// The initial state recorded for `element`, if any.
    pub fn initial_state(&self, element: ElementId) -> Option<String> {
        self.inner.attachments().get(&element).map(|attachment| {
            attachment
                .initial_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// Drop every attachment and registry entry, then stop the owner
    /// thread if this context spawned one.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner thread panicked.
    pub fn shutdown(&self) -> io::Result<()> {
        let attachments = std::mem::take(&mut *self.inner.attachments());
        drop(attachments);
        self.inner.registry.clear();
        let owner = self
            .inner
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match owner {
            Some(owner) => owner.shutdown(),
            None => Ok(()),
        }
    }

    fn attach(&self, element: &Arc<dyn ViewElement>, state: &str) -> StateAttachment {
        let initial_state = Arc::new(Mutex::new(state.to_string()));
        let weak = Arc::downgrade(element);

        let subscriptions = vec![
            element.subscribe_loaded(Box::new({
                let registry = self.inner.registry.clone();
                let weak = Weak::clone(&weak);
                let initial_state = Arc::clone(&initial_state);
                move || {
                    let Some(element) = weak.upgrade() else {
                        return;
                    };
                    let state = initial_state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    on_loaded(&registry, &element, &state);
                }
            })),
            element.subscribe_data_context_changed(Box::new({
                let registry = self.inner.registry.clone();
                let weak = Weak::clone(&weak);
                move |change: &DataContextChanged| {
                    if let Some(element) = weak.upgrade() {
                        on_data_context_changed(&registry, &element, change);
                    }
                }
            })),
            element.subscribe_unloaded(Box::new({
                let registry = self.inner.registry.clone();
                let weak = Weak::clone(&weak);
                move || {
                    if let Some(element) = weak.upgrade() {
                        registry.unbind_by_view(element.element_id());
                    }
                }
            })),
        ];

        StateAttachment {
            element: Weak::clone(&weak),
            initial_state,
            _subscriptions: subscriptions,
        }
    }
}

/// Remove attachments whose element has been dropped.
fn take_dropped(attachments: &mut HashMap<ElementId, StateAttachment>) -> usize {
    let before = attachments.len();
    attachments.retain(|_, attachment| attachment.element.strong_count() > 0);
    before - attachments.len()
}

fn notifier_of(context: Option<&DataContext>) -> Option<Arc<dyn NotificationSource>> {
    context.and_then(DataContext::as_notifier).cloned()
}

/// Bind the element's view model, then drive the element to `state`.
fn on_loaded(registry: &StateRegistry, element: &Arc<dyn ViewElement>, state: &str) {
    let Some(notifier) = notifier_of(element.data_context().as_ref()) else {
        tracing::trace!(element = %element.element_id(), "loaded without a notifying data context");
        return;
    };
    registry.bind(&notifier, element);
    registry.apply_state(notifier.notifier_id(), state);
}

/// Release the element's current binding and bind the new view model when
/// the element is on screen.
fn on_data_context_changed(
    registry: &StateRegistry,
    element: &Arc<dyn ViewElement>,
    change: &DataContextChanged,
) {
    registry.unbind_by_view(element.element_id());
    if !element.is_loaded() {
        return;
    }
    if let Some(notifier) = notifier_of(change.new.as_ref()) {
        registry.bind(&notifier, element);
    }
}

impl fmt::Debug for ViewContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewContext")
            .field("dispatcher", &self.inner.dispatcher)
            .field("registry", &self.inner.registry)
            .field("attachments", &self.inner.attachments().len())
            .finish()
    }
}

/// Builder for [`ViewContext`].
///
/// # Examples
///
/// ```
/// use mvvm_states::{DispatcherConfig, RegistryConfig, ViewContext};
///
/// let context = ViewContext::builder()
///     .dispatcher(DispatcherConfig { queue_capacity: 8, ..Default::default() })
///     .registry_config(RegistryConfig { use_transitions: false })
///     .spawn_owner(true)
///     .build()
///     .unwrap();
/// assert!(context.dispatcher().has_owner());
/// context.shutdown().unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ViewContextBuilder {
    dispatcher: DispatcherConfig,
    registry: RegistryConfig,
    spawn_owner: bool,
}

impl ViewContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the dispatcher created at build time.
    pub fn dispatcher(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    /// Configure how the registry drives views.
    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }

    /// Start a dedicated owner thread at build time.
    ///
    /// Defaults to `false`: the host attaches its own UI thread with
    /// [`Dispatcher::attach_current_thread`].
    pub fn spawn_owner(mut self, spawn: bool) -> Self {
        self.spawn_owner = spawn;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the owner thread could not be spawned.
    pub fn build(self) -> io::Result<ViewContext> {
        let dispatcher = Dispatcher::new(self.dispatcher);
        let owner = if self.spawn_owner {
            Some(dispatcher.spawn_owner()?)
        } else {
            None
        };
        tracing::debug!(
            spawn_owner = self.spawn_owner,
            use_transitions = self.registry.use_transitions,
            "view context built"
        );
        Ok(ViewContext {
            inner: Arc::new(ContextInner {
                dispatcher,
                registry: StateRegistry::new(self.registry),
                owner: Mutex::new(owner),
                attachments: Mutex::new(HashMap::new()),
            }),
        })
    }
}

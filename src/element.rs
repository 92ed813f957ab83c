//! View-side capabilities consumed by the registry and the triggers.
//!
//! Rendering, layout, and the property storage engine belong to the host
//! framework. The host exposes them through [`ViewElement`] and the smaller
//! capability traits here. [`BasicElement`] is a headless implementation
//! suitable for tests and for hosts that drive their own rendering.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::BindError;
use crate::event::{DataContextChanged, Payload, PropertyChange, RoutedEvent, RoutedEventArgs};
use crate::notifier::NotificationSource;
use crate::subscription::{EventSource, Subscription};

/// Identity of a view element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(Uuid);

impl ElementId {
    /// Mint a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The object an element is bound to.
///
/// Remembers, at construction, whether the object is a
/// [`NotificationSource`] so the capability can be recovered without
/// reflection.
#[derive(Clone)]
pub struct DataContext {
    value: Arc<dyn Any + Send + Sync>,
    notifier: Option<Arc<dyn NotificationSource>>,
}

impl DataContext {
    /// Wrap an object that is not a notification source.
    pub fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            notifier: None,
        }
    }

    /// Wrap a view model that emits state notifications.
    pub fn notifying<T: NotificationSource + Any>(view_model: Arc<T>) -> Self {
        Self {
            notifier: Some(Arc::clone(&view_model) as Arc<dyn NotificationSource>),
            value: view_model,
        }
    }

    /// The notification capability recorded at construction.
    pub fn as_notifier(&self) -> Option<&Arc<dyn NotificationSource>> {
        self.notifier.as_ref()
    }

    pub fn is_notifier(&self) -> bool {
        self.notifier.is_some()
    }

    /// Recover the concrete object.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Whether both contexts wrap the same object.
    pub fn same_as(&self, other: &DataContext) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.value), Arc::as_ptr(&other.value))
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContext")
            .field(
                "notifier",
                &self.notifier.as_ref().map(|n| n.notifier_id()),
            )
            .finish()
    }
}

/// An element with named visual states.
pub trait VisualStateHost: Send + Sync {
    /// Transition to `state_name`. Returns `false` if the state is unknown.
    fn go_to_state(&self, state_name: &str, use_transitions: bool) -> bool;
}

/// Registration record for one observable property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    /// `false` for write-only properties.
    pub readable: bool,
    /// `false` when writes raise no change notification.
    pub observable: bool,
}

impl PropertyDescriptor {
    /// A readable property that raises change notifications.
    pub fn observable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readable: true,
            observable: true,
        }
    }
}

/// Boxed handler for property change notifications.
pub type PropertyChangeHandler = Box<dyn Fn(&PropertyChange) + Send + Sync>;

/// Name-addressed property slots with change notification.
pub trait ObservableProperties: Send + Sync {
    /// Descriptor of `name`; `None` when the property is not registered.
    fn describe(&self, name: &str) -> Option<PropertyDescriptor>;

    /// Current value; `None` when unset, unknown, or write-only.
    fn get_value(&self, name: &str) -> Option<Value>;

    /// Observe writes to `name`. `None` when the property is unknown or
    /// not observable.
    fn subscribe_change(&self, name: &str, handler: PropertyChangeHandler) -> Option<Subscription>;
}

struct PropertySlot {
    descriptor: PropertyDescriptor,
    value: Option<Value>,
    changed: EventSource<PropertyChange>,
}

/// A registered name-to-accessor table of property slots.
#[derive(Default)]
pub struct PropertyTable {
    slots: Mutex<HashMap<String, PropertySlot>>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a property slot, keeping any stored value.
    pub fn register(&self, descriptor: PropertyDescriptor) {
        let mut slots = self.lock();
        match slots.get_mut(&descriptor.name) {
            Some(slot) => slot.descriptor = descriptor,
            None => {
                slots.insert(
                    descriptor.name.clone(),
                    PropertySlot {
                        descriptor,
                        value: None,
                        changed: EventSource::new(),
                    },
                );
            }
        }
    }

    /// Write a property. Observers are told only when the value changed.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::UnknownProperty`] for an unregistered name.
    pub fn set_value(&self, name: &str, value: Option<Value>) -> Result<(), BindError> {
        let (change, changed) = {
            let mut slots = self.lock();
            let slot = slots
                .get_mut(name)
                .ok_or_else(|| BindError::UnknownProperty(name.to_string()))?;
            if slot.value == value {
                return Ok(());
            }
            let old_value = std::mem::replace(&mut slot.value, value.clone());
            if !slot.descriptor.observable {
                return Ok(());
            }
            let change = PropertyChange {
                name: name.to_string(),
                old_value,
                new_value: value,
            };
            (change, slot.changed.clone())
        };
        changed.raise(&change);
        Ok(())
    }

    /// Registered property names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PropertySlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObservableProperties for PropertyTable {
    fn describe(&self, name: &str) -> Option<PropertyDescriptor> {
        self.lock().get(name).map(|slot| slot.descriptor.clone())
    }

    fn get_value(&self, name: &str) -> Option<Value> {
        self.lock()
            .get(name)
            .filter(|slot| slot.descriptor.readable)
            .and_then(|slot| slot.value.clone())
    }

    fn subscribe_change(&self, name: &str, handler: PropertyChangeHandler) -> Option<Subscription> {
        let changed = {
            let slots = self.lock();
            let slot = slots.get(name).filter(|slot| slot.descriptor.observable)?;
            slot.changed.clone()
        };
        Some(changed.subscribe(move |change| handler(change)))
    }
}

impl fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyTable")
            .field("names", &self.names())
            .finish()
    }
}

/// Per-element routed event handlers, keyed by event identity.
#[derive(Debug, Default)]
pub struct RoutedEvents {
    sources: Mutex<HashMap<RoutedEvent, EventSource<RoutedEventArgs>>>,
}

impl RoutedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for occurrences of `event`.
    ///
    /// The handler stays registered until the returned guard is dropped.
    pub fn add_handler<F>(&self, event: &RoutedEvent, handler: F) -> Subscription
    where
        F: Fn(&RoutedEventArgs) + Send + Sync + 'static,
    {
        let source = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.clone())
            .or_default()
            .clone();
        source.subscribe(handler)
    }

    /// Raise `event` with `payload`, returning the number of handlers run.
    pub fn raise(&self, event: &RoutedEvent, payload: Payload) -> usize {
        let source = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned();
        let Some(source) = source else {
            return 0;
        };
        let args = RoutedEventArgs {
            event: event.clone(),
            payload,
        };
        source.raise(&args)
    }
}

/// Boxed handler for data-context changes.
pub type DataContextHandler = Box<dyn Fn(&DataContextChanged) + Send + Sync>;

/// Boxed handler for lifecycle notifications (loaded, unloaded).
pub type LifecycleHandler = Box<dyn Fn() + Send + Sync>;

/// A node of the host's visual tree.
pub trait ViewElement: Send + Sync {
    /// Stable identity, used as the registry key for this element.
    fn element_id(&self) -> ElementId;

    /// The object this element is bound to, if any.
    fn data_context(&self) -> Option<DataContext>;

    /// Whether the element is currently attached to the visual tree.
    fn is_loaded(&self) -> bool;

    /// Observe replacements of the data context.
    fn subscribe_data_context_changed(&self, handler: DataContextHandler) -> Subscription;

    fn subscribe_loaded(&self, handler: LifecycleHandler) -> Subscription;

    fn subscribe_unloaded(&self, handler: LifecycleHandler) -> Subscription;

    /// Visual-state capability; `None` for elements without visual states.
    fn visual_states(&self) -> Option<&dyn VisualStateHost> {
        None
    }

    /// Observable property capability; `None` by default.
    fn properties(&self) -> Option<&dyn ObservableProperties> {
        None
    }

    /// Routed event capability; `None` by default.
    fn routed_events(&self) -> Option<&RoutedEvents> {
        None
    }
}

/// A behavior or other attachable object hosted by an element.
pub trait AttachedObject: Send + Sync {
    /// The element this object is attached to, if any.
    fn associated_element(&self) -> Option<Arc<dyn ViewElement>>;
}

/// What a trigger is attached to.
#[derive(Clone)]
pub enum AssociatedObject {
    Element(Arc<dyn ViewElement>),
    Behavior(Arc<dyn AttachedObject>),
}

impl AssociatedObject {
    /// The concrete element: the element itself, or a behavior's host.
    pub fn resolve_element(&self) -> Option<Arc<dyn ViewElement>> {
        match self {
            Self::Element(element) => Some(Arc::clone(element)),
            Self::Behavior(behavior) => behavior.associated_element(),
        }
    }
}

impl fmt::Debug for AssociatedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element(element) => f
                .debug_tuple("Element")
                .field(&element.element_id())
                .finish(),
            Self::Behavior(_) => f.write_str("Behavior"),
        }
    }
}

impl<T: ViewElement + 'static> From<Arc<T>> for AssociatedObject {
    fn from(element: Arc<T>) -> Self {
        Self::Element(element)
    }
}

/// Visual-state bookkeeping for [`BasicElement`].
#[derive(Debug, Default)]
pub struct VisualStates {
    /// Accepted states; empty accepts any name.
    known: BTreeSet<String>,
    current: Mutex<Option<String>>,
    history: Mutex<Vec<(String, bool)>>,
}

impl VisualStates {
    /// A state host that accepts only the named states.
    pub fn with_states<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: states.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// The state most recently entered.
    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every accepted transition as `(state, use_transitions)`.
    pub fn history(&self) -> Vec<(String, bool)> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl VisualStateHost for VisualStates {
    fn go_to_state(&self, state_name: &str, use_transitions: bool) -> bool {
        if !self.known.is_empty() && !self.known.contains(state_name) {
            tracing::debug!(state = state_name, "unknown visual state");
            return false;
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(state_name.to_string());
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((state_name.to_string(), use_transitions));
        true
    }
}

/// Headless [`ViewElement`] with a property table, routed events and,
/// unless built with [`stateless`](BasicElement::stateless), visual states.
pub struct BasicElement {
    id: ElementId,
    data_context: Mutex<Option<DataContext>>,
    loaded: AtomicBool,
    data_context_changed: EventSource<DataContextChanged>,
    loaded_event: EventSource<()>,
    unloaded_event: EventSource<()>,
    properties: PropertyTable,
    routed: RoutedEvents,
    states: Option<VisualStates>,
}

impl Default for BasicElement {
    fn default() -> Self {
        Self::with_visual_states(Some(VisualStates::default()))
    }
}

impl BasicElement {
    /// An element accepting any visual state name.
    pub fn new() -> Self {
        Self::default()
    }

    /// An element without the visual-state capability.
    pub fn stateless() -> Self {
        Self::with_visual_states(None)
    }

    /// An element with the given visual-state capability.
    pub fn with_visual_states(states: Option<VisualStates>) -> Self {
        Self {
            id: ElementId::new(),
            data_context: Mutex::new(None),
            loaded: AtomicBool::new(false),
            data_context_changed: EventSource::new(),
            loaded_event: EventSource::new(),
            unloaded_event: EventSource::new(),
            properties: PropertyTable::new(),
            routed: RoutedEvents::new(),
            states,
        }
    }

    /// Replace the data context, raising data-context-changed when the new
    /// context wraps a different object.
    pub fn set_data_context(&self, context: Option<DataContext>) {
        let old = {
            let mut slot = self.data_context.lock().unwrap_or_else(PoisonError::into_inner);
            let unchanged = match (slot.as_ref(), context.as_ref()) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_as(b),
                _ => false,
            };
            if unchanged {
                return;
            }
            std::mem::replace(&mut *slot, context.clone())
        };
        self.data_context_changed
            .raise(&DataContextChanged { old, new: context });
    }

    /// Attach to the visual tree. No-op when already loaded.
    pub fn load(&self) {
        if !self.loaded.swap(true, Ordering::AcqRel) {
            self.loaded_event.raise(&());
        }
    }

    /// Detach from the visual tree. No-op when not loaded.
    pub fn unload(&self) {
        if self.loaded.swap(false, Ordering::AcqRel) {
            self.unloaded_event.raise(&());
        }
    }

    pub fn property_table(&self) -> &PropertyTable {
        &self.properties
    }

    /// Raise `event` with `payload`, returning how many handlers ran.
    pub fn raise_routed_event(&self, event: &RoutedEvent, payload: Payload) -> usize {
        self.routed.raise(event, payload)
    }

    pub fn visual_state(&self) -> Option<&VisualStates> {
        self.states.as_ref()
    }
}

impl ViewElement for BasicElement {
    fn element_id(&self) -> ElementId {
        self.id
    }

    fn data_context(&self) -> Option<DataContext> {
        self.data_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn subscribe_data_context_changed(&self, handler: DataContextHandler) -> Subscription {
        self.data_context_changed.subscribe(move |change| handler(change))
    }

    fn subscribe_loaded(&self, handler: LifecycleHandler) -> Subscription {
        self.loaded_event.subscribe(move |_| handler())
    }

    fn subscribe_unloaded(&self, handler: LifecycleHandler) -> Subscription {
        self.unloaded_event.subscribe(move |_| handler())
    }

    fn visual_states(&self) -> Option<&dyn VisualStateHost> {
        self.states.as_ref().map(|s| s as &dyn VisualStateHost)
    }

    fn properties(&self) -> Option<&dyn ObservableProperties> {
        Some(&self.properties)
    }

    fn routed_events(&self) -> Option<&RoutedEvents> {
        Some(&self.routed)
    }
}

impl fmt::Debug for BasicElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicElement")
            .field("id", &self.id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

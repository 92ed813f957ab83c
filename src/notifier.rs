//! View-model side of the state protocol.
//!
//! [`NotificationSource`] is the capability views look for in their data
//! context. [`StateNotifier`] is the stock implementation a view model embeds:
//! it tracks the current visual state, raises property and state
//! notifications through an injected [`Dispatcher`], and owns the commands it
//! creates so their enablement can be re-evaluated on every property change.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::DelegateCommand;
use crate::dispatcher::Dispatcher;
use crate::error::BindError;
use crate::event::{CURRENT_STATE_PROPERTY, Payload, PropertyChangedEvent, StateChangeEvent};
use crate::subscription::{EventSource, Subscription};

/// Identity of a notification source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotifierId(Uuid);

impl NotifierId {
    /// Mint a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NotifierId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Boxed handler for state-changed notifications.
pub type StateChangedHandler = Box<dyn Fn(&StateChangeEvent) + Send + Sync>;

/// Boxed handler for property-changed notifications.
pub type PropertyChangedHandler = Box<dyn Fn(&PropertyChangedEvent) + Send + Sync>;

/// A view model that emits property and visual-state notifications.
///
/// # Contract
///
/// - Notifications are delivered on the owning thread of the dispatcher the
///   source was built with.
/// - [`current_state`](NotificationSource::current_state) is the last state
///   the source dispatched.
pub trait NotificationSource: Send + Sync {
    /// Stable identity, used as the registry key for this source.
    fn notifier_id(&self) -> NotifierId;

    /// The last state this source dispatched; `None` before the first.
    fn current_state(&self) -> Option<String>;

    /// Observe visual-state transitions, delivered on the owning thread.
    fn subscribe_state_changed(&self, handler: StateChangedHandler) -> Subscription;

    /// Observe property changes, delivered on the owning thread.
    fn subscribe_property_changed(&self, handler: PropertyChangedHandler) -> Subscription;
}

struct NotifierShared {
    current_state: Mutex<Option<String>>,
    property_changed: EventSource<PropertyChangedEvent>,
    state_changed: EventSource<StateChangeEvent>,
    commands: Mutex<Vec<Arc<DelegateCommand>>>,
}

/// Base implementation of [`NotificationSource`].
///
/// `Clone` is cheap and yields a handle to the same source (same
/// [`NotifierId`], same subscribers).
///
/// # Examples
///
/// ```
/// use mvvm_states::{Dispatcher, NotificationSource, StateNotifier};
///
/// let dispatcher = Dispatcher::default();
/// let _owner = dispatcher.attach_current_thread();
/// let vm = StateNotifier::new(dispatcher);
///
/// vm.set_current_state("Busy").unwrap();
/// assert_eq!(vm.current_state().as_deref(), Some("Busy"));
/// ```
#[derive(Clone)]
pub struct StateNotifier {
    id: NotifierId,
    dispatcher: Dispatcher,
    shared: Arc<NotifierShared>,
}

impl StateNotifier {
    /// Create a source with no current state and a fresh identity.
    ///
    /// Every notification is marshaled through `dispatcher`.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            id: NotifierId::new(),
            dispatcher,
            shared: Arc::new(NotifierShared {
                current_state: Mutex::new(None),
                property_changed: EventSource::new(),
                state_changed: EventSource::new(),
                commands: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The dispatcher notifications are marshaled through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Move to visual state `name`.
    ///
    /// No-op when `name` is already the current state. Otherwise records the
    /// new state, raises property-changed for `CurrentState`, then raises
    /// state-changed carrying the previous state. Both notifications are
    /// delivered on the owning thread before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::EmptyStateName`] when `name` is empty.
    pub fn set_current_state(&self, name: &str) -> Result<(), BindError> {
        if name.is_empty() {
            return Err(BindError::EmptyStateName);
        }
        let previous = {
            let mut current = self.lock_state();
            if current.as_deref() == Some(name) {
                return Ok(());
            }
            current.replace(name.to_string())
        };

        self.raise_property_changed(CURRENT_STATE_PROPERTY)?;
        let event = StateChangeEvent::new(name, previous)?;
        self.dispatch_state_changed(event);
        Ok(())
    }

    /// Raise property-changed for `property_name`, then re-evaluate the
    /// enablement of every command this source created, in one callback on
    /// the owning thread.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::EmptyPropertyName`] when `property_name` is empty.
    pub fn raise_property_changed(&self, property_name: &str) -> Result<(), BindError> {
        let event = PropertyChangedEvent::new(property_name)?;
        let shared = Arc::clone(&self.shared);
        self.dispatcher.run_on_owner(move || {
            shared.property_changed.raise(&event);
            let commands = shared
                .commands
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for command in &commands {
                command.raise_can_execute_changed();
            }
            tracing::trace!(
                property = event.property_name(),
                commands = commands.len(),
                "property change delivered"
            );
        });
        Ok(())
    }

    /// Raise state-changed for `name`, then record `name` as the current
    /// state.
    ///
    /// Subscribers run before the record is updated, so a subscriber reading
    /// [`current_state`](NotificationSource::current_state) observes the
    /// previous state.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::EmptyStateName`] when `name` is empty.
    pub fn raise_state_changed(&self, name: &str) -> Result<(), BindError> {
        let event = StateChangeEvent::new(name, self.current_state())?;
        self.dispatch_state_changed(event);
        *self.lock_state() = Some(name.to_string());
        Ok(())
    }

    /// Create an always-enabled command owned by this source.
    pub fn create_command<E>(&self, execute: E) -> Arc<DelegateCommand>
    where
        E: Fn(&Payload) + Send + Sync + 'static,
    {
        self.register_command(DelegateCommand::always(execute))
    }

    /// Create a command owned by this source whose enablement is decided by
    /// `can_execute`.
    ///
    /// Every call registers a new command; creating "the same" command twice
    /// yields two independent commands.
    pub fn create_command_with<E, C>(&self, execute: E, can_execute: C) -> Arc<DelegateCommand>
    where
        E: Fn(&Payload) + Send + Sync + 'static,
        C: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.register_command(DelegateCommand::new(execute, Some(can_execute)))
    }

    /// Number of commands created by this source.
    pub fn command_count(&self) -> usize {
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn register_command(&self, command: DelegateCommand) -> Arc<DelegateCommand> {
        let command = Arc::new(command);
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&command));
        command
    }

    fn dispatch_state_changed(&self, event: StateChangeEvent) {
        tracing::debug!(
            notifier = %self.id,
            state = event.state_name(),
            previous = event.previous_state(),
            "dispatching state change"
        );
        let shared = Arc::clone(&self.shared);
        self.dispatcher.run_on_owner(move || {
            shared.state_changed.raise(&event);
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.shared
            .current_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationSource for StateNotifier {
    fn notifier_id(&self) -> NotifierId {
        self.id
    }

    fn current_state(&self) -> Option<String> {
        self.lock_state().clone()
    }

    fn subscribe_state_changed(&self, handler: StateChangedHandler) -> Subscription {
        self.shared.state_changed.subscribe(move |event| handler(event))
    }

    fn subscribe_property_changed(&self, handler: PropertyChangedHandler) -> Subscription {
        self.shared
            .property_changed
            .subscribe(move |event| handler(event))
    }
}

impl fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNotifier")
            .field("id", &self.id)
            .field("current_state", &self.current_state())
            .finish()
    }
}

//! Command capability and the delegate-backed implementation view models
//! hand out to their views.

use std::fmt;
use std::sync::Arc;

use crate::event::Payload;
use crate::subscription::{EventSource, Subscription};

/// An invocable operation exposed by a view model.
///
/// The enablement logic behind [`can_execute`](Command::can_execute) belongs
/// to the command; callers only ask and then execute.
pub trait Command: Send + Sync {
    /// Whether the command may run with `parameter` right now.
    fn can_execute(&self, parameter: &Payload) -> bool;

    /// Run the command.
    fn execute(&self, parameter: &Payload);

    /// Register `handler` to be told when enablement may have changed.
    fn subscribe_can_execute_changed(
        &self,
        handler: Box<dyn Fn() + Send + Sync>,
    ) -> Subscription;
}

type ExecuteFn = dyn Fn(&Payload) + Send + Sync;
type CanExecuteFn = dyn Fn(&Payload) -> bool + Send + Sync;

/// A [`Command`] backed by closures.
///
/// Created through
/// [`StateNotifier::create_command`](crate::StateNotifier::create_command),
/// which also re-evaluates its enablement whenever the owning view model
/// raises a property change.
///
/// # Examples
///
/// ```
/// use mvvm_states::{Command, DelegateCommand};
/// use serde_json::json;
///
/// let command = DelegateCommand::new(|_| {}, Some(|p: &serde_json::Value| p.is_number()));
/// assert!(command.can_execute(&json!(1)));
/// assert!(!command.can_execute(&json!("one")));
/// ```
pub struct DelegateCommand {
    execute: Box<ExecuteFn>,
    can_execute: Option<Box<CanExecuteFn>>,
    can_execute_changed: EventSource<()>,
}

impl DelegateCommand {
    /// Build a command. Without `can_execute` the command is always enabled.
    pub fn new<E, C>(execute: E, can_execute: Option<C>) -> Self
    where
        E: Fn(&Payload) + Send + Sync + 'static,
        C: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Self {
            execute: Box::new(execute),
            can_execute: can_execute.map(|c| Box::new(c) as Box<CanExecuteFn>),
            can_execute_changed: EventSource::new(),
        }
    }

    /// Build an always-enabled command.
    pub fn always<E>(execute: E) -> Self
    where
        E: Fn(&Payload) + Send + Sync + 'static,
    {
        Self {
            execute: Box::new(execute),
            can_execute: None,
            can_execute_changed: EventSource::new(),
        }
    }

    /// Tell subscribers that enablement should be re-queried.
    pub fn raise_can_execute_changed(&self) {
        self.can_execute_changed.raise(&());
    }
}

impl Command for DelegateCommand {
    fn can_execute(&self, parameter: &Payload) -> bool {
        self.can_execute.as_ref().is_none_or(|can| can(parameter))
    }

    fn execute(&self, parameter: &Payload) {
        (self.execute)(parameter);
    }

    fn subscribe_can_execute_changed(
        &self,
        handler: Box<dyn Fn() + Send + Sync>,
    ) -> Subscription {
        self.can_execute_changed.subscribe(move |_| handler())
    }
}

impl fmt::Debug for DelegateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateCommand")
            .field("has_can_execute", &self.can_execute.is_some())
            .finish()
    }
}

/// Shared handle to a command, as stored by actions.
pub type CommandRef = Arc<dyn Command>;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[test]
    fn always_enabled_without_predicate() {
        let command = DelegateCommand::always(|_| {});
        assert!(command.can_execute(&Payload::Null));
    }

    #[test]
    fn execute_passes_parameter() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let command = DelegateCommand::always(move |p| {
            *slot.lock().unwrap() = Some(p.clone());
        });

        command.execute(&json!({"id": 3}));
        assert_eq!(*seen.lock().unwrap(), Some(json!({"id": 3})));
    }

    #[test]
    fn raise_can_execute_changed_notifies_subscribers() {
        let command = DelegateCommand::always(|_| {});
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let sub = command.subscribe_can_execute_changed(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        command.raise_can_execute_changed();
        drop(sub);
        command.raise_can_execute_changed();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

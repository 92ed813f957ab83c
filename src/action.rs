//! Actions run by triggers, and the command-invoking action.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::command::CommandRef;
use crate::event::{Payload, TriggerArgs};

/// A synchronous callback fired by a trigger.
///
/// # Contract
///
/// - [`invoke`](Action::invoke) runs on the thread that raised the observed
///   notification and must not block on that thread.
/// - The attach hooks bracket the period in which `invoke` may be called.
pub trait Action: Send + Sync {
    fn invoke(&self, args: &TriggerArgs);

    /// The owning trigger was attached.
    fn on_attached(&self) {}

    /// The owning trigger is detaching.
    fn on_detaching(&self) {}
}

/// Ordered actions of one trigger.
///
/// `Clone` shares the list, so a trigger's subscription handler sees actions
/// added after attachment.
#[derive(Clone, Default)]
pub struct ActionList {
    actions: Arc<RwLock<Vec<Arc<dyn Action>>>>,
    attached: Arc<AtomicBool>,
}

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action. It is told about the attachment immediately when
    /// the owning trigger is already attached.
    pub fn push(&self, action: Arc<dyn Action>) {
        if self.attached.load(Ordering::Acquire) {
            action.on_attached();
        }
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }

    /// Remove every action, detaching each one first when attached.
    pub fn clear(&self) {
        let removed = std::mem::take(
            &mut *self.actions.write().unwrap_or_else(PoisonError::into_inner),
        );
        if self.attached.load(Ordering::Acquire) {
            for action in &removed {
                action.on_detaching();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every action in order, with no lock held while they run.
    pub(crate) fn invoke_all(&self, args: &TriggerArgs) -> usize {
        let actions = self.snapshot();
        for action in &actions {
            action.invoke(args);
        }
        actions.len()
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        if self.attached.swap(attached, Ordering::AcqRel) == attached {
            return;
        }
        for action in &self.snapshot() {
            if attached {
                action.on_attached();
            } else {
                action.on_detaching();
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Action>> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for ActionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionList")
            .field("len", &self.len())
            .field("attached", &self.attached.load(Ordering::Acquire))
            .finish()
    }
}

/// Runs a bound command when its trigger fires.
///
/// The trigger's arguments are ignored; the command always receives the
/// configured parameter. Nothing happens without a command, or when the
/// command reports it cannot execute.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use mvvm_states::{Action, DelegateCommand, ExecuteCommandAction, TriggerArgs};
/// use serde_json::json;
///
/// let command = Arc::new(DelegateCommand::always(|p| assert_eq!(p, &json!(7))));
/// let action = ExecuteCommandAction::new(Some(command), json!(7));
/// action.invoke(&TriggerArgs::Property { name: "Text".into(), value: None });
/// ```
#[derive(Default)]
pub struct ExecuteCommandAction {
    command: RwLock<Option<CommandRef>>,
    parameter: RwLock<Payload>,
}

impl ExecuteCommandAction {
    /// Run `command` with `parameter` on every invocation it is enabled for.
    ///
    /// Without a command the action does nothing.
    pub fn new(command: Option<CommandRef>, parameter: Payload) -> Self {
        Self {
            command: RwLock::new(command),
            parameter: RwLock::new(parameter),
        }
    }

    /// Replace the command run by later invocations.
    pub fn set_command(&self, command: Option<CommandRef>) {
        *self.command.write().unwrap_or_else(PoisonError::into_inner) = command;
    }

    pub fn set_parameter(&self, parameter: Payload) {
        *self.parameter.write().unwrap_or_else(PoisonError::into_inner) = parameter;
    }

    pub fn command(&self) -> Option<CommandRef> {
        self.command
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn parameter(&self) -> Payload {
        self.parameter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Action for ExecuteCommandAction {
    fn invoke(&self, _args: &TriggerArgs) {
        let Some(command) = self.command() else {
            return;
        };
        let parameter = self.parameter();
        if command.can_execute(&parameter) {
            command.execute(&parameter);
        } else {
            tracing::trace!("command cannot execute, skipping");
        }
    }
}

impl fmt::Debug for ExecuteCommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteCommandAction")
            .field("has_command", &self.command().is_some())
            .field("parameter", &self.parameter())
            .finish()
    }
}

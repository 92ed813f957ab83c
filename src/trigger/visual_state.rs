use std::fmt;

use super::{Trigger, TriggerCore, TriggerSource};
use crate::action::ActionList;
use crate::element::AssociatedObject;
use crate::error::BindError;
use crate::event::{StateChangeEvent, TriggerArgs};

/// Fires on every state change of the associated element's view model.
///
/// The element's data context must be a notification source. `state_name`
/// is descriptive; every transition fires regardless of its value.
#[derive(Default)]
pub struct VisualStateTrigger {
    state_name: Option<String>,
    core: TriggerCore,
}

impl VisualStateTrigger {
    /// A trigger with no state name.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_name(&self) -> Option<&str> {
        self.state_name.as_deref()
    }

    pub fn set_state_name(&mut self, state_name: Option<String>) {
        self.state_name = state_name;
    }
}

impl Trigger for VisualStateTrigger {
    fn source(&self) -> TriggerSource {
        TriggerSource::VisualStateChanged
    }

    fn actions(&self) -> &ActionList {
        self.core.actions()
    }

    fn attach(&mut self, target: AssociatedObject) -> Result<(), BindError> {
        self.core.ensure_detached()?;
        let element = target.resolve_element().ok_or(BindError::NoElement)?;
        let context = element.data_context().ok_or(BindError::NotANotifier)?;
        let notifier = context.as_notifier().ok_or(BindError::NotANotifier)?;
        let actions = self.core.actions().clone();
        let subscription =
            notifier.subscribe_state_changed(Box::new(move |event: &StateChangeEvent| {
                tracing::trace!(state = event.state_name(), "visual state trigger fired");
                actions.invoke_all(&TriggerArgs::StateChanged(event.clone()));
            }));
        self.core
            .attached(&TriggerSource::VisualStateChanged, target, Some(subscription));
        Ok(())
    }

    fn detach(&mut self) {
        self.core.detach(&TriggerSource::VisualStateChanged);
    }

    fn is_attached(&self) -> bool {
        self.core.is_attached()
    }
}

impl fmt::Debug for VisualStateTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualStateTrigger")
            .field("state_name", &self.state_name)
            .field("attached", &self.is_attached())
            .finish()
    }
}

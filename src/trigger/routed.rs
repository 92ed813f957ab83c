use std::fmt;

use super::{Trigger, TriggerCore, TriggerSource};
use crate::action::ActionList;
use crate::element::AssociatedObject;
use crate::error::BindError;
use crate::event::{RoutedEvent, TriggerArgs};

/// Fires once per occurrence of a routed event on the associated element.
///
/// When attached to a behavior, the behavior's host element is observed.
/// A trigger without a configured event attaches but never fires.
#[derive(Default)]
pub struct RoutedEventTrigger {
    routed_event: Option<RoutedEvent>,
    core: TriggerCore,
}

impl RoutedEventTrigger {
    /// Observe occurrences of `routed_event`.
    pub fn new(routed_event: RoutedEvent) -> Self {
        Self {
            routed_event: Some(routed_event),
            ..Self::default()
        }
    }

    pub fn routed_event(&self) -> Option<&RoutedEvent> {
        self.routed_event.as_ref()
    }

    /// Takes effect at the next attach.
    pub fn set_routed_event(&mut self, routed_event: Option<RoutedEvent>) {
        self.routed_event = routed_event;
    }
}

impl Trigger for RoutedEventTrigger {
    fn source(&self) -> TriggerSource {
        TriggerSource::RoutedEvent(self.routed_event.clone())
    }

    fn actions(&self) -> &ActionList {
        self.core.actions()
    }

    fn attach(&mut self, target: AssociatedObject) -> Result<(), BindError> {
        self.core.ensure_detached()?;
        let element = target.resolve_element().ok_or(BindError::NoElement)?;
        let subscription = match &self.routed_event {
            Some(event) => {
                let routed = element.routed_events().ok_or(BindError::NoRoutedEvents)?;
                let actions = self.core.actions().clone();
                Some(routed.add_handler(event, move |args| {
                    tracing::trace!(event = args.event.name(), "routed event trigger fired");
                    actions.invoke_all(&TriggerArgs::Routed(args.clone()));
                }))
            }
            None => None,
        };
        let source = self.source();
        self.core.attached(&source, target, subscription);
        Ok(())
    }

    fn detach(&mut self) {
        let source = self.source();
        self.core.detach(&source);
    }

    fn is_attached(&self) -> bool {
        self.core.is_attached()
    }
}

impl fmt::Debug for RoutedEventTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedEventTrigger")
            .field("routed_event", &self.routed_event)
            .field("attached", &self.is_attached())
            .finish()
    }
}

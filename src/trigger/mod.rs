//! Triggers: observe one source on an associated object and run their
//! actions when it fires.
//!
//! Every trigger follows the same lifecycle, `Detached -> Attached ->
//! Detached`, and can be attached again afterwards. Attaching an attached
//! trigger is an error; detaching a detached one does nothing. The
//! subscription held while attached is a scoped [`Subscription`], so
//! detaching (or dropping the trigger) always releases it.

mod property;
mod routed;
mod visual_state;

pub use property::PropertyTrigger;
pub use routed::RoutedEventTrigger;
pub use visual_state::VisualStateTrigger;

use std::fmt;

use crate::action::ActionList;
use crate::element::AssociatedObject;
use crate::error::BindError;
use crate::event::{RoutedEvent, VISUAL_STATE_CHANGED};
use crate::subscription::Subscription;

/// What a trigger listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    Property(Option<String>),
    RoutedEvent(Option<RoutedEvent>),
    VisualStateChanged,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(name) => f.write_str(name.as_deref().unwrap_or("")),
            Self::RoutedEvent(event) => f.write_str(event.as_ref().map_or("", RoutedEvent::name)),
            Self::VisualStateChanged => f.write_str(VISUAL_STATE_CHANGED),
        }
    }
}

/// A source observer with an ordered list of actions.
pub trait Trigger: Send + Sync {
    /// What this trigger observes, as currently configured.
    fn source(&self) -> TriggerSource;

    /// Actions run, in order, each time the trigger fires.
    fn actions(&self) -> &ActionList;

    /// Start observing the source on `target`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::AlreadyAttached`] when attached, or the
    /// trigger-specific error when `target` cannot provide the source. The
    /// trigger stays detached on error.
    fn attach(&mut self, target: AssociatedObject) -> Result<(), BindError>;

    /// Stop observing. No-op when detached.
    fn detach(&mut self);

    fn is_attached(&self) -> bool;
}

/// Attachment bookkeeping shared by every trigger kind.
#[derive(Default)]
pub(crate) struct TriggerCore {
    actions: ActionList,
    attachment: Option<Attachment>,
}

pub(crate) struct Attachment {
    pub(crate) target: AssociatedObject,
    pub(crate) subscription: Option<Subscription>,
}

impl TriggerCore {
    pub(crate) fn actions(&self) -> &ActionList {
        &self.actions
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Whether the current attachment holds a live source subscription.
    pub(crate) fn is_subscribed(&self) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|attachment| attachment.subscription.is_some())
    }

    pub(crate) fn ensure_detached(&self) -> Result<(), BindError> {
        if self.is_attached() {
            return Err(BindError::AlreadyAttached);
        }
        Ok(())
    }

    pub(crate) fn attachment_mut(&mut self) -> Option<&mut Attachment> {
        self.attachment.as_mut()
    }

    pub(crate) fn attached(
        &mut self,
        source: &TriggerSource,
        target: AssociatedObject,
        subscription: Option<Subscription>,
    ) {
        tracing::debug!(
            source = %source,
            target = ?target,
            subscribed = subscription.is_some(),
            "trigger attached"
        );
        self.attachment = Some(Attachment {
            target,
            subscription,
        });
        self.actions.set_attached(true);
    }

    pub(crate) fn detach(&mut self, source: &TriggerSource) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        self.actions.set_attached(false);
        drop(attachment);
        tracing::debug!(source = %source, "trigger detached");
    }
}

/// The triggers of one associated object.
///
/// Adding a trigger attaches it to the object; removing it, clearing the
/// collection, or dropping the collection detaches it.
pub struct TriggerCollection {
    target: AssociatedObject,
    triggers: Vec<Box<dyn Trigger>>,
}

impl TriggerCollection {
    /// An empty collection for `target`.
    pub fn new(target: impl Into<AssociatedObject>) -> Self {
        Self {
            target: target.into(),
            triggers: Vec::new(),
        }
    }

    pub fn target(&self) -> &AssociatedObject {
        &self.target
    }

    /// Attach `trigger` and append it, returning its index.
    ///
    /// # Errors
    ///
    /// Propagates the attach error; the trigger is not kept.
    pub fn add(&mut self, mut trigger: Box<dyn Trigger>) -> Result<usize, BindError> {
        trigger.attach(self.target.clone())?;
        self.triggers.push(trigger);
        Ok(self.triggers.len() - 1)
    }

    /// Detach and return the trigger at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Box<dyn Trigger>> {
        if index >= self.triggers.len() {
            return None;
        }
        let mut trigger = self.triggers.remove(index);
        trigger.detach();
        Some(trigger)
    }

    pub fn get(&self, index: usize) -> Option<&dyn Trigger> {
        self.triggers.get(index).map(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Trigger + 'static)> {
        self.triggers.get_mut(index).map(|t| t.as_mut())
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Detach and drop every trigger.
    pub fn clear(&mut self) {
        for trigger in &mut self.triggers {
            trigger.detach();
        }
        self.triggers.clear();
    }
}

impl Drop for TriggerCollection {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for TriggerCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerCollection")
            .field("target", &self.target)
            .field(
                "sources",
                &self.triggers.iter().map(|t| t.source()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use std::sync::Arc;

    use crate::element::{
        AttachedObject, BasicElement, DataContext, DataContextHandler, ElementId,
        LifecycleHandler, PropertyDescriptor, ViewElement,
    };
    use crate::subscription::Subscription;

    /// An element with none of the optional capabilities.
    #[derive(Default)]
    pub(crate) struct BareElement {
        id: ElementId,
    }

    impl ViewElement for BareElement {
        fn element_id(&self) -> ElementId {
            self.id
        }

        fn data_context(&self) -> Option<DataContext> {
            None
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn subscribe_data_context_changed(&self, _handler: DataContextHandler) -> Subscription {
            Subscription::empty()
        }

        fn subscribe_loaded(&self, _handler: LifecycleHandler) -> Subscription {
            Subscription::empty()
        }

        fn subscribe_unloaded(&self, _handler: LifecycleHandler) -> Subscription {
            Subscription::empty()
        }
    }

    /// A behavior hosted by an optional element.
    pub(crate) struct HostedBehavior {
        pub host: Option<Arc<dyn ViewElement>>,
    }

    impl AttachedObject for HostedBehavior {
        fn associated_element(&self) -> Option<Arc<dyn ViewElement>> {
            self.host.clone()
        }
    }

    /// A basic element with an observable `Text` property.
    pub(crate) fn element_with_text() -> Arc<BasicElement> {
        let element = Arc::new(BasicElement::new());
        element
            .property_table()
            .register(PropertyDescriptor::observable("Text"));
        element
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::test_fixtures::element_with_text;
    use super::*;
    use crate::action::test_fixtures::MockAction;

    fn text_trigger(action: &Arc<MockAction>) -> Box<dyn Trigger> {
        let trigger = PropertyTrigger::new("Text");
        trigger.actions().push(action.clone());
        Box::new(trigger)
    }

    #[test]
    fn add_attaches_and_remove_detaches() {
        let element = element_with_text();
        let action = Arc::new(MockAction::default());
        let mut triggers = TriggerCollection::new(Arc::clone(&element));

        let index = triggers.add(text_trigger(&action)).expect("attach should succeed");
        assert!(action.is_attached());
        assert!(triggers.get(index).is_some_and(|t| t.is_attached()));

        let removed = triggers.remove(index).expect("trigger at index");
        assert!(!removed.is_attached());
        assert!(triggers.is_empty());

        element
            .property_table()
            .set_value("Text", None)
            .expect("set should succeed");
        assert_eq!(action.count(), 0);
    }

    #[test]
    fn failed_add_keeps_nothing() {
        let element = element_with_text();
        let mut triggers = TriggerCollection::new(element);

        let result = triggers.add(Box::new(PropertyTrigger::new("Missing")));

        assert_eq!(result, Err(BindError::UnknownProperty("Missing".to_string())));
        assert!(triggers.is_empty());
    }

    #[test]
    fn dropping_collection_detaches_every_trigger() {
        let element = element_with_text();
        let first = Arc::new(MockAction::default());
        let second = Arc::new(MockAction::default());
        {
            let mut triggers = TriggerCollection::new(Arc::clone(&element));
            triggers.add(text_trigger(&first)).expect("attach should succeed");
            triggers.add(text_trigger(&second)).expect("attach should succeed");
            assert_eq!(triggers.len(), 2);
        }

        assert!(!first.is_attached());
        assert!(!second.is_attached());
        element
            .property_table()
            .set_value("Text", Some(json!(null)))
            .expect("set should succeed");
        assert_eq!(first.count() + second.count(), 0);
    }

    #[test]
    fn source_display_matches_descriptor() {
        assert_eq!(TriggerSource::VisualStateChanged.to_string(), "VisualStateChanged");
        assert_eq!(
            TriggerSource::RoutedEvent(Some(RoutedEvent::new("Click"))).to_string(),
            "Click"
        );
        assert_eq!(TriggerSource::Property(None).to_string(), "");
    }
}

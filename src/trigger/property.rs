use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{Trigger, TriggerCore, TriggerSource};
use crate::action::ActionList;
use crate::element::{AssociatedObject, ViewElement};
use crate::error::BindError;
use crate::event::{PropertyChange, TriggerArgs};
use crate::subscription::Subscription;

/// Fires when a property of the associated element becomes null.
///
/// The property is looked up by name in the element's observable property
/// table. `value` is carried as configuration only; it is not compared
/// against the observed value.
#[derive(Default)]
pub struct PropertyTrigger {
    property_name: Option<String>,
    value: Option<Value>,
    core: TriggerCore,
}

impl PropertyTrigger {
    /// Observe `property_name`. An empty name leaves the trigger unnamed.
    pub fn new(property_name: impl Into<String>) -> Self {
        Self {
            property_name: Some(property_name.into()).filter(|name| !name.is_empty()),
            ..Self::default()
        }
    }

    pub fn property_name(&self) -> Option<&str> {
        self.property_name.as_deref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: Option<Value>) {
        self.value = value;
    }

    /// Observe a different property.
    ///
    /// While attached, the old subscription is dropped first; a non-empty
    /// name is then subscribed on the same element. On error the trigger
    /// stays attached without a subscription.
    ///
    /// # Errors
    ///
    /// The lookup errors of [`attach`](Trigger::attach).
    pub fn set_property_name(&mut self, property_name: Option<String>) -> Result<(), BindError> {
        self.property_name = property_name.filter(|name| !name.is_empty());
        let name = self.property_name.clone();
        let actions = self.core.actions().clone();
        let Some(attachment) = self.core.attachment_mut() else {
            return Ok(());
        };
        attachment.subscription = None;
        let Some(name) = name else {
            return Ok(());
        };
        let element = attachment
            .target
            .resolve_element()
            .ok_or(BindError::NoElement)?;
        attachment.subscription = Some(subscribe(&element, &name, actions)?);
        tracing::debug!(property = %name, "property trigger resubscribed");
        Ok(())
    }
}

/// Subscribe `actions` to null writes of `name` on `element`.
fn subscribe(
    element: &Arc<dyn ViewElement>,
    name: &str,
    actions: ActionList,
) -> Result<Subscription, BindError> {
    let properties = element.properties().ok_or(BindError::NoPropertyTable)?;
    let descriptor = properties
        .describe(name)
        .ok_or_else(|| BindError::UnknownProperty(name.to_string()))?;
    if !descriptor.readable {
        return Err(BindError::PropertyNotReadable(name.to_string()));
    }
    if !descriptor.observable {
        return Err(BindError::PropertyNotObservable(name.to_string()));
    }
    properties
        .subscribe_change(
            name,
            Box::new(move |change: &PropertyChange| {
                if !change.is_cleared() {
                    return;
                }
                tracing::trace!(property = %change.name, "property trigger fired");
                actions.invoke_all(&TriggerArgs::Property {
                    name: change.name.clone(),
                    value: change.new_value.clone(),
                });
            }),
        )
        .ok_or_else(|| BindError::PropertyNotObservable(name.to_string()))
}

impl Trigger for PropertyTrigger {
    fn source(&self) -> TriggerSource {
        TriggerSource::Property(self.property_name.clone())
    }

    fn actions(&self) -> &ActionList {
        self.core.actions()
    }

    fn attach(&mut self, target: AssociatedObject) -> Result<(), BindError> {
        self.core.ensure_detached()?;
        let name = self
            .property_name
            .as_deref()
            .ok_or(BindError::EmptyPropertyName)?;
        let element = target.resolve_element().ok_or(BindError::NoElement)?;
        let subscription = subscribe(&element, name, self.core.actions().clone())?;
        let source = self.source();
        self.core.attached(&source, target, Some(subscription));
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

impl fmt::Debug for PropertyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyTrigger")
            .field("property_name", &self.property_name)
            .field("value", &self.value)
            .field("attached", &self.is_attached())
            .field("subscribed", &self.core.is_subscribed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::action::test_fixtures::MockAction;
    use crate::element::{BasicElement, PropertyDescriptor};
    use crate::trigger::test_fixtures::{BareElement, HostedBehavior, element_with_text};

    fn attached_trigger(element: &Arc<BasicElement>, name: &str) -> (PropertyTrigger, Arc<MockAction>) {
        let mut trigger = PropertyTrigger::new(name);
        let action = Arc::new(MockAction::default());
        trigger.actions().push(action.clone());
        trigger
            .attach(Arc::clone(element).into())
            .expect("attach should succeed");
        (trigger, action)
    }

    fn set(element: &BasicElement, name: &str, value: Option<Value>) {
        element
            .property_table()
            .set_value(name, value)
            .expect("set should succeed");
    }

    #[test]
    fn fires_only_when_value_becomes_null() {
        let element = element_with_text();
        let (_trigger, action) = attached_trigger(&element, "Text");

        set(&element, "Text", Some(json!("a")));
        assert_eq!(action.count(), 0);

        set(&element, "Text", None);
        assert_eq!(action.count(), 1);

        set(&element, "Text", Some(json!("b")));
        set(&element, "Text", Some(Value::Null));
        assert_eq!(action.count(), 2);
        assert_eq!(
            action.invocations.lock().unwrap()[1],
            TriggerArgs::Property {
                name: "Text".to_string(),
                value: Some(Value::Null),
            }
        );
    }

    #[test]
    fn configured_value_does_not_affect_firing() {
        let element = element_with_text();
        let mut trigger = PropertyTrigger::new("Text");
        trigger.set_value(Some(json!("expected")));
        let action = Arc::new(MockAction::default());
        trigger.actions().push(action.clone());
        trigger
            .attach(Arc::clone(&element).into())
            .expect("attach should succeed");

        set(&element, "Text", Some(json!("expected")));
        assert_eq!(action.count(), 0);
        set(&element, "Text", None);
        assert_eq!(action.count(), 1);
    }

    #[test]
    fn reattach_leaves_no_duplicate_subscription() {
        let element = element_with_text();
        let (mut trigger, action) = attached_trigger(&element, "Text");

        trigger.detach();
        trigger.detach();
        trigger
            .attach(Arc::clone(&element).into())
            .expect("reattach should succeed");

        set(&element, "Text", Some(json!("a")));
        set(&element, "Text", None);
        assert_eq!(action.count(), 1);
        assert_eq!(action.detach_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn attaching_twice_is_rejected() {
        let element = element_with_text();
        let (mut trigger, _action) = attached_trigger(&element, "Text");
        assert_eq!(
            trigger.attach(Arc::clone(&element).into()),
            Err(BindError::AlreadyAttached)
        );
    }

    #[test]
    fn changing_property_name_moves_subscription() {
        let element = element_with_text();
        element
            .property_table()
            .register(PropertyDescriptor::observable("Title"));
        let (mut trigger, action) = attached_trigger(&element, "Text");

        trigger
            .set_property_name(Some("Title".to_string()))
            .expect("resubscribe should succeed");
        set(&element, "Text", Some(json!("a")));
        set(&element, "Text", None);
        assert_eq!(action.count(), 0);

        set(&element, "Title", Some(json!("a")));
        set(&element, "Title", None);
        assert_eq!(action.count(), 1);
        assert_eq!(trigger.source(), TriggerSource::Property(Some("Title".to_string())));
    }

    #[test]
    fn clearing_property_name_while_attached_unsubscribes() {
        let element = element_with_text();
        let (mut trigger, action) = attached_trigger(&element, "Text");

        trigger
            .set_property_name(Some(String::new()))
            .expect("clearing the name should succeed");
        set(&element, "Text", Some(json!("a")));
        set(&element, "Text", None);

        assert_eq!(action.count(), 0);
        assert!(trigger.is_attached());
        assert!(!trigger.core.is_subscribed());
    }

    #[test]
    fn lookup_errors_leave_trigger_detached() {
        let element = element_with_text();
        element.property_table().register(PropertyDescriptor {
            name: "Secret".to_string(),
            readable: false,
            observable: true,
        });
        element.property_table().register(PropertyDescriptor {
            name: "Cached".to_string(),
            readable: true,
            observable: false,
        });

        let cases = [
            ("Missing", BindError::UnknownProperty("Missing".to_string())),
            ("Secret", BindError::PropertyNotReadable("Secret".to_string())),
            ("Cached", BindError::PropertyNotObservable("Cached".to_string())),
        ];
        for (name, expected) in cases {
            let mut trigger = PropertyTrigger::new(name);
            assert_eq!(trigger.attach(Arc::clone(&element).into()), Err(expected));
            assert!(!trigger.is_attached());
        }
    }

    #[test]
    fn element_without_property_table_is_rejected() {
        let mut trigger = PropertyTrigger::new("Text");
        let element: Arc<dyn ViewElement> = Arc::new(BareElement::default());
        assert_eq!(
            trigger.attach(AssociatedObject::Element(element)),
            Err(BindError::NoPropertyTable)
        );
    }

    #[test]
    fn unnamed_trigger_cannot_attach() {
        let element = element_with_text();
        let mut trigger = PropertyTrigger::new("");
        assert_eq!(trigger.property_name(), None);
        assert_eq!(
            trigger.attach(element.into()),
            Err(BindError::EmptyPropertyName)
        );
    }

    #[test]
    fn behavior_target_resolves_to_host() {
        let element = element_with_text();
        let host: Arc<dyn ViewElement> = element.clone();
        let behavior = Arc::new(HostedBehavior { host: Some(host) });
        let mut trigger = PropertyTrigger::new("Text");
        let action = Arc::new(MockAction::default());
        trigger.actions().push(action.clone());

        trigger
            .attach(AssociatedObject::Behavior(behavior))
            .expect("attach through behavior should succeed");
        set(&element, "Text", Some(json!(1)));
        set(&element, "Text", None);

        assert_eq!(action.count(), 1);
    }
}

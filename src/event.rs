//! Notification payloads exchanged between notifiers, elements, and triggers.
//!
//! Everything here is plain data: immutable once built and serializable so
//! hosts can log or forward it. No dispatching happens in this module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::element::DataContext;
use crate::error::BindError;

/// Opaque value carried by commands and routed events.
pub type Payload = Value;

/// Name of the property raised when a notifier's current state changes.
pub const CURRENT_STATE_PROPERTY: &str = "CurrentState";

/// Source descriptor reported by visual-state triggers.
pub const VISUAL_STATE_CHANGED: &str = "VisualStateChanged";

/// Notification that a view model moved to a new visual state.
///
/// # Examples
///
/// ```
/// use mvvm_states::StateChangeEvent;
///
/// let event = StateChangeEvent::new("Busy", Some("Idle".to_string())).unwrap();
/// assert_eq!(event.state_name(), "Busy");
/// assert_eq!(event.previous_state(), Some("Idle"));
/// assert!(StateChangeEvent::new("", None).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStateChangeEvent")]
pub struct StateChangeEvent {
    state_name: String,
    previous_state: Option<String>,
}

/// Wire shape of [`StateChangeEvent`], validated through its constructor.
#[derive(Deserialize)]
struct RawStateChangeEvent {
    state_name: String,
    #[serde(default)]
    previous_state: Option<String>,
}

impl TryFrom<RawStateChangeEvent> for StateChangeEvent {
    type Error = BindError;

    fn try_from(raw: RawStateChangeEvent) -> Result<Self, Self::Error> {
        Self::new(raw.state_name, raw.previous_state)
    }
}

impl StateChangeEvent {
    /// Build an event for a transition into `state_name`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::EmptyStateName`] when `state_name` is empty.
    pub fn new(
        state_name: impl Into<String>,
        previous_state: Option<String>,
    ) -> Result<Self, BindError> {
        let state_name = state_name.into();
        if state_name.is_empty() {
            return Err(BindError::EmptyStateName);
        }
        Ok(Self {
            state_name,
            previous_state,
        })
    }

    /// The state being entered.
    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    /// The state being left, if the notifier had one.
    pub fn previous_state(&self) -> Option<&str> {
        self.previous_state.as_deref()
    }
}

/// Notification that a named property of a view model changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPropertyChangedEvent")]
pub struct PropertyChangedEvent {
    property_name: String,
}

#[derive(Deserialize)]
struct RawPropertyChangedEvent {
    property_name: String,
}

impl TryFrom<RawPropertyChangedEvent> for PropertyChangedEvent {
    type Error = BindError;

    fn try_from(raw: RawPropertyChangedEvent) -> Result<Self, Self::Error> {
        Self::new(raw.property_name)
    }
}

impl PropertyChangedEvent {
    /// # Errors
    ///
    /// Returns [`BindError::EmptyPropertyName`] when `property_name` is empty.
    pub fn new(property_name: impl Into<String>) -> Result<Self, BindError> {
        let property_name = property_name.into();
        if property_name.is_empty() {
            return Err(BindError::EmptyPropertyName);
        }
        Ok(Self { property_name })
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }
}

/// Change notification for one slot of an element's property table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Registered property name.
    pub name: String,
    /// Value before the write, `None` when unset.
    pub old_value: Option<Value>,
    /// Value after the write, `None` when cleared.
    pub new_value: Option<Value>,
}

impl PropertyChange {
    /// Whether the property became null or absent with this change.
    pub fn is_cleared(&self) -> bool {
        matches!(self.new_value, None | Some(Value::Null))
    }
}

/// Identity of an event raised on elements and routed through their hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutedEvent {
    name: String,
}

impl RoutedEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One occurrence of a routed event, carrying its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedEventArgs {
    pub event: RoutedEvent,
    pub payload: Payload,
}

/// Old and new data context of an element.
#[derive(Clone)]
pub struct DataContextChanged {
    pub old: Option<DataContext>,
    pub new: Option<DataContext>,
}

impl std::fmt::Debug for DataContextChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContextChanged")
            .field("old_is_notifier", &self.old.as_ref().is_some_and(|c| c.is_notifier()))
            .field("new_is_notifier", &self.new.as_ref().is_some_and(|c| c.is_notifier()))
            .finish()
    }
}

/// What a trigger observed when it fired; handed to every action.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerArgs {
    /// A watched property became null; `value` is the observed value
    /// (`None` or `Some(Value::Null)`).
    Property { name: String, value: Option<Value> },
    /// A routed event was raised on the associated element.
    Routed(RoutedEventArgs),
    /// The data context's notifier changed visual state.
    StateChanged(StateChangeEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_change_event_rejects_empty_name() {
        assert_eq!(
            StateChangeEvent::new("", Some("Idle".to_string())),
            Err(BindError::EmptyStateName)
        );
    }

    #[test]
    fn state_change_event_without_previous() {
        let event = StateChangeEvent::new("Loaded", None).expect("valid state name");
        assert_eq!(event.previous_state(), None);
    }

    #[test]
    fn property_changed_event_rejects_empty_name() {
        assert_eq!(
            PropertyChangedEvent::new(""),
            Err(BindError::EmptyPropertyName)
        );
    }

    #[test]
    fn property_change_cleared_on_null_or_absent() {
        let mut change = PropertyChange {
            name: "Text".to_string(),
            old_value: Some(json!("a")),
            new_value: None,
        };
        assert!(change.is_cleared());

        change.new_value = Some(Value::Null);
        assert!(change.is_cleared());

        change.new_value = Some(json!("b"));
        assert!(!change.is_cleared());
    }

    #[test]
    fn state_change_event_serializes_field_names() {
        let event = StateChangeEvent::new("Busy", None).expect("valid state name");
        let value = serde_json::to_value(&event).expect("serialization should succeed");
        assert_eq!(value, json!({"state_name": "Busy", "previous_state": null}));
    }

    #[test]
    fn deserializing_empty_state_name_is_rejected() {
        let result =
            serde_json::from_str::<StateChangeEvent>(r#"{"state_name":"","previous_state":null}"#);
        assert!(result.is_err());

        let event: StateChangeEvent =
            serde_json::from_str(r#"{"state_name":"Busy","previous_state":"Idle"}"#)
                .expect("valid event should deserialize");
        assert_eq!(
            event,
            StateChangeEvent::new("Busy", Some("Idle".to_string())).expect("valid state name")
        );
    }

    #[test]
    fn deserializing_empty_property_name_is_rejected() {
        let result = serde_json::from_str::<PropertyChangedEvent>(r#"{"property_name":""}"#);
        assert!(result.is_err());

        let event: PropertyChangedEvent = serde_json::from_str(r#"{"property_name":"CurrentState"}"#)
            .expect("valid event should deserialize");
        assert_eq!(event.property_name(), CURRENT_STATE_PROPERTY);
    }
}

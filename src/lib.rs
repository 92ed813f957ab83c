//! View-model state notification and declarative triggers for MVVM hosts.
//!
//! View models built on [`StateNotifier`] announce visual-state changes; a
//! [`StateRegistry`] owned by a [`ViewContext`] drives the bound view into
//! each state on the owning UI thread. Triggers observe element properties,
//! routed events, or view-model state and run actions such as
//! [`ExecuteCommandAction`].

mod action;
mod command;
mod context;
mod dispatcher;
mod element;
mod error;
mod event;
mod notifier;
mod registry;
mod subscription;
mod trigger;

pub use action::{Action, ActionList, ExecuteCommandAction};
pub use command::{Command, CommandRef, DelegateCommand};
pub use context::{ViewContext, ViewContextBuilder};
pub use dispatcher::{Dispatcher, DispatcherConfig, OwnerLoop, OwnerThread};
pub use element::{
    AssociatedObject, AttachedObject, BasicElement, DataContext, DataContextHandler, ElementId,
    LifecycleHandler, ObservableProperties, PropertyChangeHandler, PropertyDescriptor,
    PropertyTable, RoutedEvents, ViewElement, VisualStateHost, VisualStates,
};
pub use error::{BindError, DispatchError};
pub use event::{
    CURRENT_STATE_PROPERTY, DataContextChanged, Payload, PropertyChange, PropertyChangedEvent,
    RoutedEvent, RoutedEventArgs, StateChangeEvent, TriggerArgs, VISUAL_STATE_CHANGED,
};
pub use notifier::{
    NotificationSource, NotifierId, PropertyChangedHandler, StateChangedHandler, StateNotifier,
};
pub use registry::{RegistryConfig, StateRegistry};
pub use subscription::{EventSource, Subscription};
pub use trigger::{
    PropertyTrigger, RoutedEventTrigger, Trigger, TriggerCollection, TriggerSource,
    VisualStateTrigger,
};

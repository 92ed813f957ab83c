//! Crate-level error types for attaching behaviors and marshaling callbacks.

/// Error raised synchronously when a notifier, trigger, or attachment is
/// configured with malformed or missing inputs.
///
/// Attachment fails outright on any of these; nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// A property name was empty where one is required.
    #[error("property name must be a non-empty string")]
    EmptyPropertyName,

    /// A visual state name was empty where one is required.
    #[error("state name must be a non-empty string")]
    EmptyStateName,

    /// The associated element exposes no observable property table.
    #[error("element does not expose observable properties")]
    NoPropertyTable,

    /// The property table has no entry registered under this name.
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    /// The property is registered as write-only.
    #[error("cannot listen to changes for a write-only property: {0}")]
    PropertyNotReadable(String),

    /// The property is readable but raises no change notifications.
    #[error("cannot listen to changes for a property without change notification: {0}")]
    PropertyNotObservable(String),

    /// No concrete view element could be resolved from the associated object.
    #[error("trigger can only be associated with view elements")]
    NoElement,

    /// The resolved element does not raise routed events.
    #[error("element does not raise routed events")]
    NoRoutedEvents,

    /// The element's data context does not implement `NotificationSource`.
    #[error("cannot attach to an element whose data context is not a notification source")]
    NotANotifier,

    /// The trigger is already attached to an associated object.
    #[error("trigger is already attached")]
    AlreadyAttached,
}

/// Error returned by [`Dispatcher::invoke`](crate::Dispatcher::invoke) when
/// a callback could not be run on the owning thread.
///
/// The synchronous marshal paths never return this; they drop the callback
/// and log instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No owning thread has been established yet.
    #[error("no owning thread is attached to the dispatcher")]
    NoOwner,

    /// The owning thread exited before the callback completed.
    #[error("owning thread is no longer running")]
    OwnerGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_property_display_names_property() {
        let err = BindError::UnknownProperty("Width".to_string());
        assert_eq!(err.to_string(), "unknown property: Width");
    }

    #[test]
    fn not_readable_display_names_property() {
        let err = BindError::PropertyNotReadable("Secret".to_string());
        assert!(err.to_string().contains("write-only"));
        assert!(err.to_string().contains("Secret"));
    }

    #[test]
    fn dispatch_error_owner_gone_display() {
        assert_eq!(
            DispatchError::OwnerGone.to_string(),
            "owning thread is no longer running"
        );
    }

    // Errors surface from owner-thread callbacks and must cross threads.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<BindError>();
            assert_send_sync::<DispatchError>();
        }
    };
}

//! Session-level callbacks.

use crate::ModuleId;

/// Receives session events. Every method has an empty default.
///
/// Callbacks run on the worker thread that received the notification, or on
/// the thread tearing the session down for `on_shutdown`.
pub trait SessionListener: Send + Sync {
    /// Another module instance connected to the broker.
    fn on_module_start(&self, _module: ModuleId) {}

    /// Another module instance went away.
    fn on_module_shutdown(&self, _module: ModuleId) {}

    /// The broker's module or service registry changed.
    fn on_registration_change(&self) {}

    /// This session is being torn down.
    fn on_shutdown(&self) {}
}

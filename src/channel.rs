//! An in-process publish/subscribe channel for permission-denial events.
//!
//! Data-access failures are not thrown back into the caller. Instead the store publishes a
//! structured `PermissionError` here and whoever is listening (a developer overlay, a log sink, a
//! test) can reconstruct the exact request that was denied.
//!
//! Listeners are called synchronously, in registration order, on the thread that emits. Events
//! emitted while nobody is listening are dropped.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, trace};

/// The names of events carried by the channel.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    PermissionError,
}

serde_plain::derive_display_from_serialize!(EventName);
serde_plain::derive_fromstr_from_deserialize!(EventName);

/// The kind of data access that was attempted.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    List,
    Create,
    Update,
    Delete,
}

serde_plain::derive_display_from_serialize!(Operation);
serde_plain::derive_fromstr_from_deserialize!(Operation);

/// The payload of a `permission-error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("Missing or insufficient permissions: the {operation} request on '{path}' was denied")]
pub struct PermissionError {
    path: String,
    operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_data: Option<serde_json::Value>,
}

impl PermissionError {
    pub fn new(path: impl Into<String>, operation: Operation) -> Self {
        Self {
            path: path.into(),
            operation,
            request_data: None,
        }
    }

    /// Attaches the payload that was rejected.
    pub fn with_request_data(mut self, data: serde_json::Value) -> Self {
        self.request_data = Some(data);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn request_data(&self) -> Option<&serde_json::Value> {
        self.request_data.as_ref()
    }
}

/// Identifies a registered listener so that it can be removed with `off`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&PermissionError) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(EventName, ListenerId, Handler)>,
}

/// The error channel. Cloning is cheap and every clone shares the same listeners, so one
/// instance is created at startup and handed to each component that needs it.
#[derive(Clone, Default)]
pub struct ErrorChannel {
    listeners: Arc<Mutex<Listeners>>,
}

impl Debug for ErrorChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("listeners", &self.lock().entries.len())
            .finish()
    }
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event`.
    pub fn on<F>(&self, event: EventName, handler: F) -> ListenerId
    where
        F: Fn(&PermissionError) + Send + Sync + 'static,
    {
        let mut listeners = self.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((event, id, Arc::new(handler)));
        trace!("Registered listener {id:?} for {event}");
        id
    }

    /// Removes a listener. Returns `false` if it was not registered for `event`.
    pub fn off(&self, event: EventName, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.entries.len();
        listeners
            .entries
            .retain(|(e, listener_id, _)| !(*e == event && *listener_id == id));
        before != listeners.entries.len()
    }

    /// Delivers `payload` to every listener of `event` and returns how many were called.
    pub fn emit(&self, event: EventName, payload: &PermissionError) -> usize {
        // Handlers run without the lock held so that they may call `on` or `off`.
        let handlers: Vec<Handler> = self
            .lock()
            .entries
            .iter()
            .filter(|(e, _, _)| *e == event)
            .map(|(_, _, handler)| handler.clone())
            .collect();
        if handlers.is_empty() {
            trace!("No listeners for {event}, dropping: {payload}");
        }
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// The number of listeners registered for `event`.
    pub fn listener_count(&self, event: EventName) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|(e, _, _)| *e == event)
            .count()
    }

    /// Registers a listener that reports every permission error through `tracing` at the error
    /// level. This is the terminal's counterpart of a developer overlay.
    pub fn log_permission_errors(&self) -> ListenerId {
        self.on(EventName::PermissionError, |e| {
            let payload = e
                .request_data()
                .map(|v| v.to_string())
                .unwrap_or_default();
            error!(
                path = %e.path(),
                operation = %e.operation(),
                payload = %payload,
                "{e}"
            );
        })
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

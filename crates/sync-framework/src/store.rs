//! # Store Contract
//!
//! A [`Store`] is the persistence adapter behind one model or collection.
//! `fetch`, `save` and `destroy` are its only mutating entry points. Every
//! result surfaces twice:
//!
//! 1. as a [`StoreEvent`] dispatched on the store's event target (what bound
//!    models and collections listen to), and
//! 2. as the [`RequestOutcome`] returned by the call (what joins and
//!    registries await).
//!
//! A transport-level abort is neither success nor failure: nothing is
//! dispatched and the call returns [`RequestOutcome::Aborted`].
//!
//! ## Parsing and associated stores
//!
//! [`Store::publish`] is the single funnel from raw payload to a `Synced`
//! event. The raw payload is also broadcast, one way, to every associated
//! store registered with [`Store::set_associated_stores`], each of which
//! parses it with its own `parse`. [`Store::publish_provisional`] takes the
//! same path for a cached copy sent ahead of the fresh answer; its `Synced`
//! is marked `provisional` and does not end the request.

use crate::event::{lock, EventTarget};
use crate::model::ModelId;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Which entry point produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Fetch,
    Save,
    Destroy,
}

/// A failed request, as seen by views.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreFailure {
    pub operation: Operation,
    pub status: u16,
    pub body: String,
}

pub const MESSAGE_SERVICE_UNAVAILABLE: &str =
    "The service is currently unavailable. Please try again later.";
const MESSAGE_NO_RESPONSE: &str = "The server did not respond. Please check your connection.";
const MESSAGE_UNAUTHORIZED: &str = "Your session has expired. Please log in again.";
const MESSAGE_FORBIDDEN: &str = "You do not have permission to perform this action.";
const MESSAGE_NOT_FOUND: &str = "The requested resource could not be found.";
const MESSAGE_OVER_LIMIT: &str = "This request exceeds your account limits.";
const MESSAGE_INTERNAL: &str = "An internal error occurred. Please try again later.";
const MESSAGE_GENERIC: &str = "An unexpected error occurred.";

impl StoreFailure {
    pub fn new(operation: Operation, status: u16, body: impl Into<String>) -> Self {
        Self {
            operation,
            status,
            body: body.into(),
        }
    }

    /// User-facing message for this failure.
    ///
    /// Well-known statuses map to fixed strings regardless of the body.
    /// Otherwise the first fault message found in a JSON body wins.
    pub fn message(&self) -> String {
        let fixed = match self.status {
            0 => Some(MESSAGE_NO_RESPONSE),
            401 => Some(MESSAGE_UNAUTHORIZED),
            403 => Some(MESSAGE_FORBIDDEN),
            404 => Some(MESSAGE_NOT_FOUND),
            413 => Some(MESSAGE_OVER_LIMIT),
            500 => Some(MESSAGE_INTERNAL),
            503 => Some(MESSAGE_SERVICE_UNAVAILABLE),
            _ => None,
        };
        if let Some(message) = fixed {
            return message.to_string();
        }
        self.body_message()
            .unwrap_or_else(|| MESSAGE_GENERIC.to_string())
    }

    /// The provider behind this request is gone or off limits.
    pub fn indicates_unavailable(&self) -> bool {
        matches!(self.status, 403 | 404)
    }

    fn body_message(&self) -> Option<String> {
        let body: Value = serde_json::from_str(&self.body).ok()?;
        let object = body.as_object()?;
        if let Some(message) = object.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }
        // Fault shape: {"badRequest": {"code": 400, "message": "..."}}
        object
            .values()
            .filter_map(Value::as_object)
            .find_map(|fault| fault.get("message").and_then(Value::as_str))
            .map(str::to_string)
    }
}

impl std::fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failed with status {}: {}", self.operation, self.status, self.message())
    }
}

/// Events dispatched by every store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A payload was parsed. `with_removal` marks an authoritative listing;
    /// `provisional` marks a cached copy with a fresh answer still to come.
    Synced {
        data: Value,
        operation: Operation,
        with_removal: bool,
        provisional: bool,
    },
    Error(StoreFailure),
    Timeout { operation: Operation },
    /// A side-effect-only success (e.g. 202 Accepted, a completed delete).
    Success { operation: Operation, status: u16 },
}

/// The terminal state of one store call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Synced,
    Error(StoreFailure),
    Timeout,
    Success,
    Aborted,
}

impl RequestOutcome {
    /// Synced or side-effect success.
    pub fn is_ok(&self) -> bool {
        matches!(self, RequestOutcome::Synced | RequestOutcome::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestOutcome::Timeout)
    }

    pub fn failure(&self) -> Option<&StoreFailure> {
        match self {
            RequestOutcome::Error(failure) => Some(failure),
            _ => None,
        }
    }
}

/// State shared by every store implementation: its event target and the
/// associated stores that receive raw payload fan-out.
#[derive(Default)]
pub struct StoreCore {
    events: EventTarget<StoreEvent>,
    associated: Mutex<Vec<Arc<dyn Store>>>,
}

impl StoreCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> EventTarget<StoreEvent> {
        self.events.clone()
    }

    pub fn associated(&self) -> Vec<Arc<dyn Store>> {
        lock(&self.associated).clone()
    }

    pub fn set_associated(&self, stores: Vec<Arc<dyn Store>>) {
        *lock(&self.associated) = stores;
    }
}

/// Abstract persistence adapter.
#[async_trait]
pub trait Store: Send + Sync {
    fn core(&self) -> &StoreCore;

    /// Short label for logs, usually the resource URL.
    fn describe(&self) -> String;

    async fn fetch(&self, args: Option<Value>) -> RequestOutcome;

    async fn save(&self, data: Value) -> RequestOutcome;

    async fn destroy(&self, id: Option<ModelId>) -> RequestOutcome;

    /// Turns a raw payload into the data carried by `Synced`.
    /// Returning `None` suppresses the event.
    fn parse(&self, raw: &Value, _with_removal: bool) -> Option<Value> {
        Some(raw.clone())
    }

    fn events(&self) -> EventTarget<StoreEvent> {
        self.core().events()
    }

    fn set_associated_stores(&self, stores: Vec<Arc<dyn Store>>) {
        self.core().set_associated(stores);
    }

    /// Parses `raw`, dispatches `Synced`, then fans the raw payload out to
    /// the associated stores.
    fn publish(&self, raw: &Value, operation: Operation, with_removal: bool) -> RequestOutcome {
        publish_payload(self, raw, operation, with_removal, false);
        RequestOutcome::Synced
    }

    /// Like [`publish`](Store::publish) for a cached copy. Listeners apply
    /// the data but keep waiting for the request to finish.
    fn publish_provisional(&self, raw: &Value, operation: Operation, with_removal: bool) {
        publish_payload(self, raw, operation, with_removal, true);
    }

    /// Dispatches the event matching a non-sync outcome and returns it.
    fn publish_outcome(&self, operation: Operation, outcome: RequestOutcome) -> RequestOutcome {
        let event = match &outcome {
            RequestOutcome::Error(failure) => Some(StoreEvent::Error(failure.clone())),
            RequestOutcome::Timeout => Some(StoreEvent::Timeout { operation }),
            RequestOutcome::Success => Some(StoreEvent::Success {
                operation,
                status: 200,
            }),
            RequestOutcome::Synced | RequestOutcome::Aborted => None,
        };
        if let Some(event) = event {
            self.core().events().dispatch(&event);
        }
        outcome
    }
}

fn publish_payload<S: Store + ?Sized>(
    store: &S,
    raw: &Value,
    operation: Operation,
    with_removal: bool,
    provisional: bool,
) {
    if let Some(data) = store.parse(raw, with_removal) {
        store.core().events().dispatch(&StoreEvent::Synced {
            data,
            operation,
            with_removal,
            provisional,
        });
    }
    for associated in store.core().associated() {
        debug!(store = %associated.describe(), provisional, "Forwarding payload to associated store");
        if provisional {
            associated.publish_provisional(raw, operation, with_removal);
        } else {
            associated.publish(raw, operation, with_removal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_unavailable_ignores_body() {
        let failure = StoreFailure::new(
            Operation::Fetch,
            503,
            r#"{"serviceUnavailable": {"message": "backend melted"}}"#,
        );
        assert_eq!(failure.message(), MESSAGE_SERVICE_UNAVAILABLE);
    }

    #[test]
    fn fault_body_message_is_used_for_other_statuses() {
        let failure = StoreFailure::new(
            Operation::Save,
            400,
            r#"{"badRequest": {"code": 400, "message": "Invalid flavorRef"}}"#,
        );
        assert_eq!(failure.message(), "Invalid flavorRef");

        let flat = StoreFailure::new(Operation::Save, 409, r#"{"message": "Name in use"}"#);
        assert_eq!(flat.message(), "Name in use");
    }

    #[test]
    fn unparseable_body_falls_back_to_generic() {
        let failure = StoreFailure::new(Operation::Fetch, 418, "<html>teapot</html>");
        assert_eq!(failure.message(), MESSAGE_GENERIC);
    }

    #[test]
    fn unavailable_statuses() {
        assert!(StoreFailure::new(Operation::Fetch, 403, "").indicates_unavailable());
        assert!(StoreFailure::new(Operation::Fetch, 404, "").indicates_unavailable());
        assert!(!StoreFailure::new(Operation::Fetch, 500, "").indicates_unavailable());
    }
}

//! Input pipeline error types

use blinc_core::tree::{ElementId, TreeError};
use thiserror::Error;

use crate::routing::{HandlerKind, PayloadKind};

/// Errors raised by hit testing, routing, and the input pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// A (name, owner) pair was registered twice
    #[error("Routed event '{name}' is already registered for owner {owner}")]
    DuplicateEvent { name: String, owner: &'static str },

    /// The routed event id does not belong to this registry
    #[error("Unknown routed event: {0}")]
    UnknownEvent(String),

    /// Handler kind is incompatible with the routed event's payload
    #[error("Handler signature mismatch for '{event}': expected {expected:?} handler, got {actual:?}")]
    SignatureMismatch {
        event: String,
        expected: HandlerKind,
        actual: HandlerKind,
    },

    /// Declared handler kind cannot receive the declared payload
    #[error("Handler kind {handler:?} cannot receive {payload:?} payloads")]
    IncompatibleDeclaration {
        payload: PayloadKind,
        handler: HandlerKind,
    },

    /// Event arguments carry a payload of the wrong kind for the routed event
    #[error("Routed event '{event}' expects {expected:?} payload, got {actual:?}")]
    PayloadMismatch {
        event: String,
        expected: PayloadKind,
        actual: PayloadKind,
    },

    /// The element handle is stale or was never part of the tree
    #[error("Unknown element: {0:?}")]
    UnknownElement(ElementId),

    /// A processor in the chain failed
    #[error("Processor '{processor}' failed: {message}")]
    Processor { processor: String, message: String },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed or serialized
    #[error("Configuration format error: {0}")]
    ConfigFormat(String),

    /// The pipeline needs a tokio runtime to start its background loop
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The pipeline was started twice
    #[error("Pipeline is already running")]
    AlreadyRunning,

    /// The background loop did not exit within the shutdown timeout
    #[error("Pipeline did not shut down within {0:?}")]
    ShutdownTimeout(std::time::Duration),

    /// The background loop stopped unexpectedly
    #[error("Pipeline loop failed: {0}")]
    LoopFailed(String),

    /// A dispatch stage panicked
    #[error("Panic during {stage}: {message}")]
    Panicked { stage: &'static str, message: String },

    /// Element tree error
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Result type for input operations
pub type Result<T> = std::result::Result<T, InputError>;

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

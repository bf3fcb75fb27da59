//! Pipeline notifications delivered to subscribers
//!
//! Every submitted event produces exactly one terminal notification:
//! [`PipelineNotification::Processed`] or [`PipelineNotification::Error`].
//! [`PipelineNotification::Unhandled`] precedes the processed notification
//! of events nothing handled, and [`PipelineNotification::LoopFailed`] is
//! raised at most once when the background loop dies.

use std::sync::Arc;
use std::time::Duration;

use blinc_core::tree::ElementId;

use crate::error::InputError;
use crate::event::{GestureEvent, InputEvent};
use crate::hit_test::HitTestResult;
use crate::routing::HandlerFailure;

/// How a processed event ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Routed to a target element
    Routed,
    /// Nothing under the pointer, or no focused element for key and text events
    NoTarget,
    /// A recognized gesture consumed the pointer event
    ConsumedByGesture,
    /// A processor stopped the chain
    StoppedByProcessor,
    /// Merged into a later pointer move
    Coalesced,
}

/// A completed event
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedEvent {
    /// Event as submitted
    pub event: InputEvent,
    /// Event as dispatched, after processors
    pub dispatched: InputEvent,
    pub target: Option<ElementId>,
    /// Hit test for pointer and gesture events
    pub hit: Option<HitTestResult>,
    pub handled: bool,
    pub disposition: Disposition,
    pub duration: Duration,
    pub exceeded_timeout: bool,
    /// Gestures recognized from this event, already routed
    pub gestures: Vec<GestureEvent>,
    pub handler_failures: Vec<HandlerFailure>,
}

/// Where an event failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Processors,
    Gestures,
    HitTest,
    Focus,
    Routing,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Processors => "processors",
            PipelineStage::Gestures => "gestures",
            PipelineStage::HitTest => "hit test",
            PipelineStage::Focus => "focus",
            PipelineStage::Routing => "routing",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed event
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub event: InputEvent,
    pub error: InputError,
    pub duration: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineNotification {
    Processed(ProcessedEvent),
    /// Sent before the processed notification of an unhandled event
    Unhandled(ProcessedEvent),
    Error(PipelineError),
    LoopFailed(InputError),
}

impl PipelineNotification {
    /// Whether this notification completes an event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineNotification::Processed(_) | PipelineNotification::Error(_)
        )
    }
}

/// Subscriber callback, invoked on the processing thread
pub type NotificationCallback = Arc<dyn Fn(&PipelineNotification) + Send + Sync>;

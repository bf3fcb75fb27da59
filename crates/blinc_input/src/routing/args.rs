//! Arguments carried along a route

use std::sync::Arc;

use blinc_core::geometry::Point;
use blinc_core::tree::ElementId;

use super::definition::{PayloadKind, RoutedEventDefinition};
use crate::event::{GestureEvent, InputEvent, KeyboardEvent, PointerEvent, TextInputEvent};

/// Keyboard focus moved from `old` to `new`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FocusChange {
    pub old: Option<ElementId>,
    pub new: Option<ElementId>,
}

/// Typed payload of a routed event
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Pointer(PointerEvent),
    Keyboard(KeyboardEvent),
    Text(TextInputEvent),
    Gesture(GestureEvent),
    Focus(FocusChange),
}

impl EventPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            EventPayload::Pointer(_) => PayloadKind::Pointer,
            EventPayload::Keyboard(_) => PayloadKind::Keyboard,
            EventPayload::Text(_) => PayloadKind::Text,
            EventPayload::Gesture(_) => PayloadKind::Gesture,
            EventPayload::Focus(_) => PayloadKind::Focus,
        }
    }

    /// Window position, if the payload has one
    pub fn position(&self) -> Option<Point> {
        match self {
            EventPayload::Pointer(e) => Some(e.position),
            EventPayload::Gesture(e) => Some(e.position),
            _ => None,
        }
    }
}

impl From<InputEvent> for EventPayload {
    fn from(event: InputEvent) -> Self {
        match event {
            InputEvent::Pointer(e) => EventPayload::Pointer(e),
            InputEvent::Keyboard(e) => EventPayload::Keyboard(e),
            InputEvent::TextInput(e) => EventPayload::Text(e),
            InputEvent::Gesture(e) => EventPayload::Gesture(e),
        }
    }
}

impl From<PointerEvent> for EventPayload {
    fn from(event: PointerEvent) -> Self {
        EventPayload::Pointer(event)
    }
}

impl From<KeyboardEvent> for EventPayload {
    fn from(event: KeyboardEvent) -> Self {
        EventPayload::Keyboard(event)
    }
}

impl From<TextInputEvent> for EventPayload {
    fn from(event: TextInputEvent) -> Self {
        EventPayload::Text(event)
    }
}

impl From<GestureEvent> for EventPayload {
    fn from(event: GestureEvent) -> Self {
        EventPayload::Gesture(event)
    }
}

impl From<FocusChange> for EventPayload {
    fn from(change: FocusChange) -> Self {
        EventPayload::Focus(change)
    }
}

/// A routed event instance
#[derive(Clone, Debug)]
pub struct RoutedEventArgs {
    pub event: Arc<RoutedEventDefinition>,
    /// Element the event was raised on
    pub source: ElementId,
    pub payload: EventPayload,
    pub handled: bool,
}

impl RoutedEventArgs {
    pub fn new(
        event: Arc<RoutedEventDefinition>,
        source: ElementId,
        payload: impl Into<EventPayload>,
    ) -> Self {
        Self {
            event,
            source,
            payload: payload.into(),
            handled: false,
        }
    }

    /// The same payload and handled state raised as a different event
    pub fn retarget(&mut self, event: Arc<RoutedEventDefinition>) {
        self.event = event;
    }
}

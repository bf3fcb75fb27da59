//! Built-in routed events and the routing context that owns them

use std::sync::Arc;

use blinc_core::tree::ElementId;
use smallvec::SmallVec;

use super::definition::{
    HandlerKind, PayloadKind, RoutedEventDefinition, RoutedEventId, RoutedEventRegistry,
    RoutingStrategy,
};
use super::handler::{ElementFilter, EventHandler, HandlerId, HandlerStore};
use crate::error::{InputError, Result};
use crate::event::{InputEvent, KeyState, PointerEventKind};

/// Owner of the built-in UI events
pub struct UiElement;

type Def = Arc<RoutedEventDefinition>;

/// Routed events raised by the pipeline itself
#[derive(Clone, Debug)]
pub struct BuiltinEvents {
    pub preview_pointer_down: Def,
    pub pointer_down: Def,
    pub pointer_up: Def,
    pub pointer_move: Def,
    pub pointer_wheel: Def,
    pub pointer_cancel: Def,
    pub pointer_enter: Def,
    pub pointer_leave: Def,
    pub preview_key_down: Def,
    pub key_down: Def,
    pub key_up: Def,
    pub text_input: Def,
    pub got_focus: Def,
    pub lost_focus: Def,
    pub gesture: Def,
}

impl BuiltinEvents {
    /// Register the built-in events under [`UiElement`]
    pub fn register(registry: &RoutedEventRegistry) -> Result<Self> {
        use PayloadKind as P;
        use RoutingStrategy::{Bubble, Direct, Tunnel};

        let reg = |name: &str, strategy: RoutingStrategy, payload: PayloadKind| {
            registry.register_event::<UiElement>(name, strategy, payload, payload.handler_kind())
        };

        Ok(Self {
            preview_pointer_down: reg("PreviewPointerDown", Tunnel, P::Pointer)?,
            pointer_down: reg("PointerDown", Bubble, P::Pointer)?,
            pointer_up: reg("PointerUp", Bubble, P::Pointer)?,
            pointer_move: reg("PointerMove", Bubble, P::Pointer)?,
            pointer_wheel: reg("PointerWheel", Bubble, P::Pointer)?,
            pointer_cancel: reg("PointerCancel", Bubble, P::Pointer)?,
            pointer_enter: reg("PointerEnter", Direct, P::Pointer)?,
            pointer_leave: reg("PointerLeave", Direct, P::Pointer)?,
            preview_key_down: reg("PreviewKeyDown", Tunnel, P::Keyboard)?,
            key_down: reg("KeyDown", Bubble, P::Keyboard)?,
            key_up: reg("KeyUp", Bubble, P::Keyboard)?,
            text_input: reg("TextInput", Bubble, P::Text)?,
            got_focus: reg("GotFocus", Bubble, P::Focus)?,
            lost_focus: reg("LostFocus", Bubble, P::Focus)?,
            gesture: reg("Gesture", Bubble, P::Gesture)?,
        })
    }

    /// Routed events an input event raises, in routing order
    ///
    /// Presses raise a tunneling preview first; both share one handled flag.
    pub fn for_input(&self, event: &InputEvent) -> SmallVec<[Def; 2]> {
        let mut out = SmallVec::new();
        match event {
            InputEvent::Pointer(p) => match p.kind {
                PointerEventKind::Down => {
                    out.push(Arc::clone(&self.preview_pointer_down));
                    out.push(Arc::clone(&self.pointer_down));
                }
                PointerEventKind::Up => out.push(Arc::clone(&self.pointer_up)),
                PointerEventKind::Move => out.push(Arc::clone(&self.pointer_move)),
                PointerEventKind::Wheel { .. } => out.push(Arc::clone(&self.pointer_wheel)),
                PointerEventKind::Cancel => out.push(Arc::clone(&self.pointer_cancel)),
            },
            InputEvent::Keyboard(k) => match k.state {
                KeyState::Pressed => {
                    out.push(Arc::clone(&self.preview_key_down));
                    out.push(Arc::clone(&self.key_down));
                }
                KeyState::Released => out.push(Arc::clone(&self.key_up)),
            },
            InputEvent::TextInput(_) => out.push(Arc::clone(&self.text_input)),
            InputEvent::Gesture(_) => out.push(Arc::clone(&self.gesture)),
        }
        out
    }
}

/// Registry, handler table and built-in events for one pipeline
///
/// Construct one per pipeline (or share it through an `Arc`) instead of
/// relying on process-wide state.
#[derive(Debug)]
pub struct RoutingContext {
    registry: RoutedEventRegistry,
    handlers: HandlerStore,
    builtins: BuiltinEvents,
}

impl RoutingContext {
    pub fn new() -> Result<Self> {
        let registry = RoutedEventRegistry::new();
        let builtins = BuiltinEvents::register(&registry)?;
        Ok(Self {
            registry,
            handlers: HandlerStore::new(),
            builtins,
        })
    }

    pub fn registry(&self) -> &RoutedEventRegistry {
        &self.registry
    }

    pub fn handlers(&self) -> &HandlerStore {
        &self.handlers
    }

    pub fn builtins(&self) -> &BuiltinEvents {
        &self.builtins
    }

    /// Register an application event owned by `O`
    pub fn register_event<O: 'static>(
        &self,
        name: impl Into<String>,
        strategy: RoutingStrategy,
        payload: PayloadKind,
        handler_kind: HandlerKind,
    ) -> Result<Def> {
        self.registry
            .register_event::<O>(name, strategy, payload, handler_kind)
    }

    pub fn add_handler(
        &self,
        element: ElementId,
        event: &RoutedEventDefinition,
        handler: EventHandler,
    ) -> Result<HandlerId> {
        self.handlers.add_handler(element, event, handler, false)
    }

    /// Add a handler that also runs for already handled events
    pub fn add_handler_always(
        &self,
        element: ElementId,
        event: &RoutedEventDefinition,
        handler: EventHandler,
    ) -> Result<HandlerId> {
        self.handlers.add_handler(element, event, handler, true)
    }

    /// Add a handler by event id
    pub fn add_handler_for(
        &self,
        element: ElementId,
        event: RoutedEventId,
        handler: EventHandler,
        handled_events_too: bool,
    ) -> Result<HandlerId> {
        let definition = self
            .registry
            .get(event)
            .ok_or_else(|| InputError::UnknownEvent(format!("{event:?}")))?;
        self.handlers
            .add_handler(element, &definition, handler, handled_events_too)
    }

    pub fn add_global_handler(
        &self,
        event: &RoutedEventDefinition,
        handler: EventHandler,
        filter: Option<ElementFilter>,
        handled_events_too: bool,
    ) -> Result<HandlerId> {
        self.handlers
            .add_global_handler(event, handler, filter, handled_events_too)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.handlers.remove_handler(id)
    }
}

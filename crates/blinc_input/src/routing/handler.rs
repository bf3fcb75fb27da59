//! Routed event handlers and their storage
//!
//! Handlers are typed by payload ([`EventHandler`]) and checked against the
//! event's declared signature when they are added, so a keyboard handler can
//! never be attached to a pointer event.

use std::sync::Arc;

use blinc_core::tree::ElementId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use thiserror::Error;

use super::args::{EventPayload, FocusChange};
use super::definition::{HandlerKind, PayloadKind, RoutedEventDefinition, RoutedEventId};
use crate::error::Result;
use crate::event::{GestureEvent, KeyboardEvent, PointerEvent, TextInputEvent};

new_key_type! {
    /// Handle returned by handler registration
    pub struct HandlerId;
}

/// Failure reported by a handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("{expected:?} handler received a {actual:?} payload")]
    PayloadMismatch {
        expected: HandlerKind,
        actual: PayloadKind,
    },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Per-invocation view handed to a handler
pub struct EventContext<'a> {
    element: ElementId,
    source: ElementId,
    event: &'a RoutedEventDefinition,
    handled: &'a mut bool,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(
        element: ElementId,
        source: ElementId,
        event: &'a RoutedEventDefinition,
        handled: &'a mut bool,
    ) -> Self {
        Self {
            element,
            source,
            event,
            handled,
        }
    }

    /// Element whose handler is running
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// Element the event was raised on
    pub fn source(&self) -> ElementId {
        self.source
    }

    pub fn event(&self) -> &RoutedEventDefinition {
        self.event
    }

    pub fn is_handled(&self) -> bool {
        *self.handled
    }

    /// Mark the event handled; later handlers only run if they asked for handled events
    pub fn set_handled(&mut self) {
        *self.handled = true;
    }
}

type TypedFn<T> = dyn Fn(&mut EventContext<'_>, &T) -> HandlerResult + Send + Sync;

/// A handler with a typed signature
#[derive(Clone)]
pub enum EventHandler {
    Pointer(Arc<TypedFn<PointerEvent>>),
    Keyboard(Arc<TypedFn<KeyboardEvent>>),
    Text(Arc<TypedFn<TextInputEvent>>),
    Gesture(Arc<TypedFn<GestureEvent>>),
    Focus(Arc<TypedFn<FocusChange>>),
    Any(Arc<TypedFn<EventPayload>>),
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventHandler::{:?}", self.kind())
    }
}

impl EventHandler {
    pub fn pointer<F>(f: F) -> Self
    where
        F: Fn(&mut EventContext<'_>, &PointerEvent) -> HandlerResult + Send + Sync + 'static,
    {
        EventHandler::Pointer(Arc::new(f))
    }

    pub fn keyboard<F>(f: F) -> Self
    where
        F: Fn(&mut EventContext<'_>, &KeyboardEvent) -> HandlerResult + Send + Sync + 'static,
    {
        EventHandler::Keyboard(Arc::new(f))
    }

    pub fn text<F>(f: F) -> Self
    where
        F: Fn(&mut EventContext<'_>, &TextInputEvent) -> HandlerResult + Send + Sync + 'static,
    {
        EventHandler::Text(Arc::new(f))
    }

    pub fn gesture<F>(f: F) -> Self
    where
        F: Fn(&mut EventContext<'_>, &GestureEvent) -> HandlerResult + Send + Sync + 'static,
    {
        EventHandler::Gesture(Arc::new(f))
    }

    pub fn focus<F>(f: F) -> Self
    where
        F: Fn(&mut EventContext<'_>, &FocusChange) -> HandlerResult + Send + Sync + 'static,
    {
        EventHandler::Focus(Arc::new(f))
    }

    pub fn any<F>(f: F) -> Self
    where
        F: Fn(&mut EventContext<'_>, &EventPayload) -> HandlerResult + Send + Sync + 'static,
    {
        EventHandler::Any(Arc::new(f))
    }

    pub fn kind(&self) -> HandlerKind {
        match self {
            EventHandler::Pointer(_) => HandlerKind::Pointer,
            EventHandler::Keyboard(_) => HandlerKind::Keyboard,
            EventHandler::Text(_) => HandlerKind::Text,
            EventHandler::Gesture(_) => HandlerKind::Gesture,
            EventHandler::Focus(_) => HandlerKind::Focus,
            EventHandler::Any(_) => HandlerKind::Any,
        }
    }

    pub(crate) fn invoke(&self, ctx: &mut EventContext<'_>, payload: &EventPayload) -> HandlerResult {
        match (self, payload) {
            (EventHandler::Pointer(f), EventPayload::Pointer(e)) => f(ctx, e),
            (EventHandler::Keyboard(f), EventPayload::Keyboard(e)) => f(ctx, e),
            (EventHandler::Text(f), EventPayload::Text(e)) => f(ctx, e),
            (EventHandler::Gesture(f), EventPayload::Gesture(e)) => f(ctx, e),
            (EventHandler::Focus(f), EventPayload::Focus(e)) => f(ctx, e),
            (EventHandler::Any(f), payload) => f(ctx, payload),
            (handler, payload) => Err(HandlerError::PayloadMismatch {
                expected: handler.kind(),
                actual: payload.kind(),
            }),
        }
    }
}

/// Predicate selecting the elements a global handler runs on
pub type ElementFilter = Arc<dyn Fn(ElementId) -> bool + Send + Sync>;

/// A registered handler as handed to the router
#[derive(Clone, Debug)]
pub struct EventHandlerInfo {
    pub id: HandlerId,
    pub handler: EventHandler,
    /// Run even after the event was marked handled
    pub handled_events_too: bool,
    sequence: u64,
}

enum HandlerTarget {
    Element(ElementId),
    Global(Option<ElementFilter>),
}

struct HandlerEntry {
    target: HandlerTarget,
    event: RoutedEventId,
    info: EventHandlerInfo,
}

#[derive(Default)]
struct StoreInner {
    entries: SlotMap<HandlerId, HandlerEntry>,
    by_element: FxHashMap<(ElementId, RoutedEventId), SmallVec<[HandlerId; 4]>>,
    globals: FxHashMap<RoutedEventId, SmallVec<[HandlerId; 4]>>,
    next_sequence: u64,
}

impl StoreInner {
    fn insert(
        &mut self,
        target: HandlerTarget,
        event: RoutedEventId,
        handler: EventHandler,
        handled_events_too: bool,
    ) -> HandlerId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let index_key = match &target {
            HandlerTarget::Element(element) => Some(*element),
            HandlerTarget::Global(_) => None,
        };
        let id = self.entries.insert_with_key(|id| HandlerEntry {
            target,
            event,
            info: EventHandlerInfo {
                id,
                handler,
                handled_events_too,
                sequence,
            },
        });
        match index_key {
            Some(element) => self.by_element.entry((element, event)).or_default().push(id),
            None => self.globals.entry(event).or_default().push(id),
        }
        id
    }
}

/// Thread-safe table of element and global handlers
#[derive(Default)]
pub struct HandlerStore {
    inner: RwLock<StoreInner>,
}

impl std::fmt::Debug for HandlerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerStore")
            .field("handlers", &self.inner.read().entries.len())
            .finish()
    }
}

impl HandlerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler for `event` to `element`
    ///
    /// Fails with [`InputError::SignatureMismatch`](crate::InputError::SignatureMismatch)
    /// before anything is stored if the handler kind does not fit the event.
    pub fn add_handler(
        &self,
        element: ElementId,
        event: &RoutedEventDefinition,
        handler: EventHandler,
        handled_events_too: bool,
    ) -> Result<HandlerId> {
        event.check_handler(handler.kind())?;
        let id = self.inner.write().insert(
            HandlerTarget::Element(element),
            event.id,
            handler,
            handled_events_too,
        );
        tracing::trace!(target: "blinc_input::router", event = %event.name, ?element, ?id, "handler added");
        Ok(id)
    }

    /// Attach a handler that runs on every route node accepted by `filter`
    ///
    /// With no filter the handler runs on every node.
    pub fn add_global_handler(
        &self,
        event: &RoutedEventDefinition,
        handler: EventHandler,
        filter: Option<ElementFilter>,
        handled_events_too: bool,
    ) -> Result<HandlerId> {
        event.check_handler(handler.kind())?;
        let id = self.inner.write().insert(
            HandlerTarget::Global(filter),
            event.id,
            handler,
            handled_events_too,
        );
        tracing::trace!(target: "blinc_input::router", event = %event.name, ?id, "global handler added");
        Ok(id)
    }

    /// Remove a handler, returning whether it existed
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.remove(id) else {
            return false;
        };
        let list = match entry.target {
            HandlerTarget::Element(element) => inner.by_element.get_mut(&(element, entry.event)),
            HandlerTarget::Global(_) => inner.globals.get_mut(&entry.event),
        };
        if let Some(list) = list {
            list.retain(|h| *h != id);
        }
        true
    }

    /// Remove every element handler attached to `element`
    pub fn remove_element(&self, element: ElementId) -> usize {
        let mut inner = self.inner.write();
        let keys: Vec<(ElementId, RoutedEventId)> = inner
            .by_element
            .keys()
            .filter(|(e, _)| *e == element)
            .copied()
            .collect();
        let mut removed = 0;
        for key in keys {
            if let Some(ids) = inner.by_element.remove(&key) {
                for id in ids {
                    if inner.entries.remove(id).is_some() {
                        removed += 1;
                    }
                }
            }
        }
        removed
    }

    /// Handlers for `event` on `element`, element and global, in registration order
    pub fn get_handlers(
        &self,
        element: ElementId,
        event: RoutedEventId,
    ) -> SmallVec<[EventHandlerInfo; 4]> {
        let inner = self.inner.read();
        let mut out: SmallVec<[EventHandlerInfo; 4]> = SmallVec::new();

        if let Some(ids) = inner.by_element.get(&(element, event)) {
            out.extend(ids.iter().filter_map(|id| inner.entries.get(*id)).map(|e| e.info.clone()));
        }
        if let Some(ids) = inner.globals.get(&event) {
            for entry in ids.iter().filter_map(|id| inner.entries.get(*id)) {
                let accepted = match &entry.target {
                    HandlerTarget::Global(Some(filter)) => filter(element),
                    _ => true,
                };
                if accepted {
                    out.push(entry.info.clone());
                }
            }
        }
        out.sort_by_key(|info| info.sequence);
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;
    use crate::routing::definition::{RoutedEventRegistry, RoutingStrategy};

    struct Owner;

    fn ids(n: usize) -> Vec<ElementId> {
        let mut map: SlotMap<ElementId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn pointer_event(registry: &RoutedEventRegistry) -> Arc<RoutedEventDefinition> {
        registry
            .register_event::<Owner>(
                "PointerDown",
                RoutingStrategy::Bubble,
                PayloadKind::Pointer,
                HandlerKind::Pointer,
            )
            .unwrap()
    }

    #[test]
    fn test_mismatched_handler_is_not_stored() {
        let registry = RoutedEventRegistry::new();
        let event = pointer_event(&registry);
        let store = HandlerStore::new();
        let element = ids(1)[0];

        let err = store
            .add_handler(element, &event, EventHandler::keyboard(|_, _| Ok(())), false)
            .unwrap_err();
        assert!(matches!(err, InputError::SignatureMismatch { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_handlers_merge_in_registration_order() {
        let registry = RoutedEventRegistry::new();
        let event = pointer_event(&registry);
        let store = HandlerStore::new();
        let e = ids(2);

        let first = store
            .add_handler(e[0], &event, EventHandler::pointer(|_, _| Ok(())), false)
            .unwrap();
        let global = store
            .add_global_handler(&event, EventHandler::any(|_, _| Ok(())), None, true)
            .unwrap();
        let filtered_target = e[1];
        let _filtered = store
            .add_global_handler(
                &event,
                EventHandler::pointer(|_, _| Ok(())),
                Some(Arc::new(move |el: ElementId| el == filtered_target)),
                false,
            )
            .unwrap();
        let third = store
            .add_handler(e[0], &event, EventHandler::pointer(|_, _| Ok(())), false)
            .unwrap();

        let on_first: Vec<HandlerId> = store.get_handlers(e[0], event.id).iter().map(|h| h.id).collect();
        assert_eq!(on_first, vec![first, global, third]);
        assert_eq!(store.get_handlers(e[1], event.id).len(), 2);
    }

    #[test]
    fn test_remove_handler_by_id() {
        let registry = RoutedEventRegistry::new();
        let event = pointer_event(&registry);
        let store = HandlerStore::new();
        let element = ids(1)[0];

        let id = store
            .add_handler(element, &event, EventHandler::pointer(|_, _| Ok(())), false)
            .unwrap();
        assert!(store.remove_handler(id));
        assert!(!store.remove_handler(id));
        assert!(store.get_handlers(element, event.id).is_empty());
    }

    #[test]
    fn test_remove_element_handlers() {
        let registry = RoutedEventRegistry::new();
        let event = pointer_event(&registry);
        let store = HandlerStore::new();
        let e = ids(2);
        for _ in 0..3 {
            store
                .add_handler(e[0], &event, EventHandler::pointer(|_, _| Ok(())), false)
                .unwrap();
        }
        store
            .add_handler(e[1], &event, EventHandler::pointer(|_, _| Ok(())), false)
            .unwrap();

        assert_eq!(store.remove_element(e[0]), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invoke_checks_payload() {
        let registry = RoutedEventRegistry::new();
        let event = pointer_event(&registry);
        let element = ids(1)[0];
        let handler = EventHandler::keyboard(|_, _| Ok(()));
        let mut handled = false;
        let mut ctx = EventContext::new(element, element, &event, &mut handled);

        let payload = EventPayload::Pointer(PointerEvent::down(0.0, 0.0));
        assert_eq!(
            handler.invoke(&mut ctx, &payload),
            Err(HandlerError::PayloadMismatch {
                expected: HandlerKind::Keyboard,
                actual: PayloadKind::Pointer,
            })
        );
    }
}

//! Routed event definitions and their registry

use std::any::TypeId;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{InputError, Result};

/// Traversal order over an event route
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingStrategy {
    /// Root to target (preview events)
    Tunnel,
    /// Target to root
    Bubble,
    /// Target only
    Direct,
}

/// Registration index of a routed event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutedEventId(u32);

impl RoutedEventId {
    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload carried by a routed event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Pointer,
    Keyboard,
    Text,
    Gesture,
    Focus,
}

/// Signature of a handler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Pointer,
    Keyboard,
    Text,
    Gesture,
    Focus,
    /// Receives the untyped payload
    Any,
}

impl HandlerKind {
    /// Whether a handler of this kind can receive `payload`
    pub fn accepts(self, payload: PayloadKind) -> bool {
        matches!(
            (self, payload),
            (HandlerKind::Any, _)
                | (HandlerKind::Pointer, PayloadKind::Pointer)
                | (HandlerKind::Keyboard, PayloadKind::Keyboard)
                | (HandlerKind::Text, PayloadKind::Text)
                | (HandlerKind::Gesture, PayloadKind::Gesture)
                | (HandlerKind::Focus, PayloadKind::Focus)
        )
    }
}

impl PayloadKind {
    /// The typed handler kind for this payload
    pub fn handler_kind(self) -> HandlerKind {
        match self {
            PayloadKind::Pointer => HandlerKind::Pointer,
            PayloadKind::Keyboard => HandlerKind::Keyboard,
            PayloadKind::Text => HandlerKind::Text,
            PayloadKind::Gesture => HandlerKind::Gesture,
            PayloadKind::Focus => HandlerKind::Focus,
        }
    }
}

/// Type that owns a routed event name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl OwnerKey {
    pub fn of<O: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<O>(),
            type_name: std::any::type_name::<O>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// A registered routed event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedEventDefinition {
    pub id: RoutedEventId,
    pub name: String,
    pub owner: OwnerKey,
    pub payload: PayloadKind,
    /// Handler signature registrations are checked against
    pub handler_kind: HandlerKind,
    pub strategy: RoutingStrategy,
}

impl RoutedEventDefinition {
    /// Check a handler signature against this event
    ///
    /// Events declared with [`HandlerKind::Any`] take any handler that can
    /// receive their payload. Otherwise the handler must match the declared
    /// kind or be untyped.
    pub fn check_handler(&self, actual: HandlerKind) -> Result<()> {
        let ok = match self.handler_kind {
            HandlerKind::Any => actual.accepts(self.payload),
            expected => actual == expected || actual == HandlerKind::Any,
        };
        if ok {
            Ok(())
        } else {
            Err(InputError::SignatureMismatch {
                event: self.name.clone(),
                expected: self.handler_kind,
                actual,
            })
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    events: Vec<Arc<RoutedEventDefinition>>,
    by_key: FxHashMap<(TypeId, String), RoutedEventId>,
}

/// Table of routed event definitions
///
/// Owned by a [`RoutingContext`](super::RoutingContext) rather than being
/// process-global, so independent pipelines never share event ids.
#[derive(Default)]
pub struct RoutedEventRegistry {
    inner: RwLock<RegistryInner>,
}

impl std::fmt::Debug for RoutedEventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedEventRegistry")
            .field("events", &self.inner.read().events.len())
            .finish()
    }
}

impl RoutedEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event named `name` owned by `O`
    ///
    /// Fails if `O` already registered `name`, or if `handler_kind` can never
    /// receive `payload`.
    pub fn register_event<O: 'static>(
        &self,
        name: impl Into<String>,
        strategy: RoutingStrategy,
        payload: PayloadKind,
        handler_kind: HandlerKind,
    ) -> Result<Arc<RoutedEventDefinition>> {
        self.register_with_owner(OwnerKey::of::<O>(), name.into(), strategy, payload, handler_kind)
    }

    pub fn register_with_owner(
        &self,
        owner: OwnerKey,
        name: String,
        strategy: RoutingStrategy,
        payload: PayloadKind,
        handler_kind: HandlerKind,
    ) -> Result<Arc<RoutedEventDefinition>> {
        if !handler_kind.accepts(payload) {
            return Err(InputError::IncompatibleDeclaration {
                payload,
                handler: handler_kind,
            });
        }

        let mut inner = self.inner.write();
        let key = (owner.type_id, name);
        if inner.by_key.contains_key(&key) {
            return Err(InputError::DuplicateEvent {
                name: key.1,
                owner: owner.type_name,
            });
        }

        let id = RoutedEventId::from_index(inner.events.len() as u32);
        let definition = Arc::new(RoutedEventDefinition {
            id,
            name: key.1.clone(),
            owner,
            payload,
            handler_kind,
            strategy,
        });
        inner.events.push(Arc::clone(&definition));
        inner.by_key.insert(key, id);

        tracing::debug!(
            target: "blinc_input::router",
            event = %definition.name,
            owner = owner.type_name,
            ?strategy,
            "registered routed event"
        );
        Ok(definition)
    }

    /// Look up the event `name` owned by `O`
    pub fn get_event<O: 'static>(&self, name: &str) -> Option<Arc<RoutedEventDefinition>> {
        let inner = self.inner.read();
        let id = inner.by_key.get(&(TypeId::of::<O>(), name.to_string()))?;
        inner.events.get(id.index()).cloned()
    }

    pub fn get(&self, id: RoutedEventId) -> Option<Arc<RoutedEventDefinition>> {
        self.inner.read().events.get(id.index()).cloned()
    }

    /// All definitions in registration order
    pub fn events(&self) -> Vec<Arc<RoutedEventDefinition>> {
        self.inner.read().events.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

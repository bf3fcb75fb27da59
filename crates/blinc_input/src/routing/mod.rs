//! Routed events
//!
//! A routed event travels a root-to-target [`EventRoute`] in the order its
//! [`RoutingStrategy`] dictates, invoking element and global handlers with
//! short-circuit semantics once the event is handled.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use blinc_core::geometry::Rect;
//! use blinc_core::tree::{ElementProps, ElementTree};
//! use blinc_input::event::PointerEvent;
//! use blinc_input::routing::{EventHandler, EventRouter, RoutedEventArgs, RoutingContext};
//!
//! let mut tree = ElementTree::new();
//! let root = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 100.0, 100.0)));
//! let button = tree.create_child(root, ElementProps::default()).unwrap();
//!
//! let routing = RoutingContext::new().unwrap();
//! let down = Arc::clone(&routing.builtins().pointer_down);
//! routing
//!     .add_handler(root, &down, EventHandler::pointer(|ctx, _event| {
//!         ctx.set_handled();
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! let router = EventRouter::new();
//! let mut args = RoutedEventArgs::new(down, button, PointerEvent::down(5.0, 5.0));
//! let outcome = router
//!     .route_event(routing.handlers(), &tree, button, &mut args, None)
//!     .unwrap();
//! assert!(outcome.handled);
//! ```

mod args;
mod builtin;
mod cache;
mod definition;
mod handler;
mod route;
mod router;

pub use args::{EventPayload, FocusChange, RoutedEventArgs};
pub use builtin::{BuiltinEvents, RoutingContext, UiElement};
pub use cache::{RouteCache, RouteCacheStats, RouteKey, DEFAULT_ROUTE_CAPACITY, DEFAULT_ROUTE_TTL};
pub use definition::{
    HandlerKind, OwnerKey, PayloadKind, RoutedEventDefinition, RoutedEventId, RoutedEventRegistry,
    RoutingStrategy,
};
pub use handler::{
    ElementFilter, EventContext, EventHandler, EventHandlerInfo, HandlerError, HandlerId,
    HandlerResult, HandlerStore,
};
pub use route::EventRoute;
pub use router::{EventRouter, HandlerFailure, RouteInterceptor, RouteOutcome};

//! Routed event dispatch
//!
//! ```text
//! route_event(target, args, hit_path?)
//!     ↓
//! route (hit path verbatim | cached | parent walk)
//!     ↓ pre_route interceptors (veto)
//! nodes in strategy order
//!     ↓ on_node interceptors (stop)
//! element handlers + accepted global handlers, registration order
//!     ↓ post_route interceptors
//! RouteOutcome
//! ```
//!
//! Handlers run without any router lock held; the handler lists for the
//! whole route are snapshotted before the first one is invoked, so handlers
//! may add or remove handlers freely. Changes apply to the next event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use blinc_core::tree::{ElementId, HitTestable};
use parking_lot::RwLock;
use smallvec::SmallVec;

use super::args::RoutedEventArgs;
use super::cache::{RouteCache, RouteCacheStats, RouteKey};
use super::handler::{EventContext, EventHandlerInfo, HandlerError, HandlerId, HandlerStore};
use super::route::EventRoute;
use crate::error::{panic_message, InputError, Result};

const TARGET: &str = "blinc_input::router";

/// Observes or shapes routing
///
/// All methods default to letting routing proceed.
pub trait RouteInterceptor: Send + Sync {
    /// Return `false` to veto the route before any handler runs
    fn pre_route(&self, _route: &EventRoute, _args: &RoutedEventArgs) -> bool {
        true
    }

    /// Return `false` to stop routing before `element`'s handlers run
    fn on_node(&self, _element: ElementId, _args: &RoutedEventArgs) -> bool {
        true
    }

    /// Called after routing finishes, vetoed or not
    fn post_route(&self, _route: &EventRoute, _args: &RoutedEventArgs, _outcome: &RouteOutcome) {}
}

/// A handler that returned an error or panicked
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerFailure {
    pub element: ElementId,
    pub handler: HandlerId,
    pub error: HandlerError,
}

/// What happened while routing one event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    pub handled: bool,
    /// Handlers invoked, including failed ones
    pub invoked: usize,
    pub failures: Vec<HandlerFailure>,
    /// A pre-route interceptor vetoed the route
    pub vetoed: bool,
    /// An interceptor stopped routing mid-route
    pub stopped: bool,
    pub route_len: usize,
}

/// Drives handler invocation along event routes
pub struct EventRouter {
    cache: Option<RouteCache>,
    interceptors: RwLock<Vec<Arc<dyn RouteInterceptor>>>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("cache", &self.cache)
            .field("interceptors", &self.interceptors.read().len())
            .finish()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Router with a default route cache
    pub fn new() -> Self {
        Self {
            cache: Some(RouteCache::default()),
            interceptors: RwLock::new(Vec::new()),
        }
    }

    pub fn with_cache(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Some(RouteCache::new(capacity, ttl)),
            interceptors: RwLock::new(Vec::new()),
        }
    }

    /// Router that builds every route afresh
    pub fn without_cache() -> Self {
        Self {
            cache: None,
            interceptors: RwLock::new(Vec::new()),
        }
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn RouteInterceptor>) {
        self.interceptors.write().push(interceptor);
    }

    pub fn clear_interceptors(&self) {
        self.interceptors.write().clear();
    }

    pub fn cache_stats(&self) -> Option<RouteCacheStats> {
        self.cache.as_ref().map(RouteCache::stats)
    }

    /// Forget cached routes (call after the tree structure changes)
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Build and dispatch in one step
    pub fn route_event<T: HitTestable + ?Sized>(
        &self,
        handlers: &HandlerStore,
        tree: &T,
        target: ElementId,
        args: &mut RoutedEventArgs,
        hit_path: Option<&[ElementId]>,
    ) -> Result<RouteOutcome> {
        let route = self.build_route(tree, target, args, hit_path)?;
        Ok(self.dispatch(handlers, &route, args))
    }

    /// Resolve the route for `args` raised on `target`
    ///
    /// A hit path containing `target` is used verbatim; otherwise the route
    /// comes from the cache or a parent walk. Payloads that do not match the
    /// routed event's declared kind are rejected here.
    pub fn build_route<T: HitTestable + ?Sized>(
        &self,
        tree: &T,
        target: ElementId,
        args: &RoutedEventArgs,
        hit_path: Option<&[ElementId]>,
    ) -> Result<EventRoute> {
        let expected = args.event.payload;
        let actual = args.payload.kind();
        if expected != actual {
            return Err(InputError::PayloadMismatch {
                event: args.event.name.clone(),
                expected,
                actual,
            });
        }

        let strategy = args.event.strategy;
        let key = RouteKey::new(target, hit_path, args.event.id);
        if let Some(route) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(route);
        }

        let route = match hit_path.and_then(|path| EventRoute::from_path(path, target, strategy)) {
            Some(route) => route,
            None => EventRoute::build(tree, target, strategy)?,
        };
        if let Some(cache) = &self.cache {
            cache.insert(key, route.clone());
        }
        Ok(route)
    }

    /// Invoke handlers along `route`
    pub fn dispatch(
        &self,
        handlers: &HandlerStore,
        route: &EventRoute,
        args: &mut RoutedEventArgs,
    ) -> RouteOutcome {
        let interceptors: Vec<Arc<dyn RouteInterceptor>> = self.interceptors.read().clone();
        let mut outcome = RouteOutcome {
            route_len: route.len(),
            ..RouteOutcome::default()
        };

        if interceptors.iter().any(|i| !i.pre_route(route, args)) {
            tracing::debug!(target: TARGET, event = %args.event.name, "route vetoed");
            outcome.vetoed = true;
            outcome.handled = args.handled;
            for interceptor in &interceptors {
                interceptor.post_route(route, args, &outcome);
            }
            return outcome;
        }

        let plan: SmallVec<[(ElementId, SmallVec<[EventHandlerInfo; 4]>); 16]> = route
            .routing_order()
            .into_iter()
            .map(|element| (element, handlers.get_handlers(element, args.event.id)))
            .collect();
        let mut wants_handled = plan
            .iter()
            .flat_map(|(_, list)| list.iter())
            .filter(|info| info.handled_events_too)
            .count();

        'route: for (element, list) in &plan {
            if args.handled && wants_handled == 0 {
                break;
            }
            if interceptors.iter().any(|i| !i.on_node(*element, args)) {
                tracing::debug!(target: TARGET, event = %args.event.name, element = ?element, "routing stopped by interceptor");
                outcome.stopped = true;
                break;
            }

            for info in list {
                if info.handled_events_too {
                    wants_handled -= 1;
                } else if args.handled {
                    if wants_handled == 0 {
                        break 'route;
                    }
                    continue;
                }

                outcome.invoked += 1;
                if let Err(error) = invoke(info, *element, args) {
                    tracing::warn!(
                        target: TARGET,
                        event = %args.event.name,
                        element = ?element,
                        handler = ?info.id,
                        %error,
                        "handler failed"
                    );
                    outcome.failures.push(HandlerFailure {
                        element: *element,
                        handler: info.id,
                        error,
                    });
                }
            }
        }

        outcome.handled = args.handled;
        tracing::trace!(
            target: TARGET,
            event = %args.event.name,
            handled = outcome.handled,
            invoked = outcome.invoked,
            failures = outcome.failures.len(),
            "routed"
        );
        for interceptor in &interceptors {
            interceptor.post_route(route, args, &outcome);
        }
        outcome
    }
}

/// Run one handler, converting a panic into a failure
fn invoke(
    info: &EventHandlerInfo,
    element: ElementId,
    args: &mut RoutedEventArgs,
) -> std::result::Result<(), HandlerError> {
    let RoutedEventArgs {
        event,
        source,
        payload,
        handled,
    } = args;
    let mut ctx = EventContext::new(element, *source, event, handled);
    match catch_unwind(AssertUnwindSafe(|| info.handler.invoke(&mut ctx, payload))) {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(&*panic))),
    }
}

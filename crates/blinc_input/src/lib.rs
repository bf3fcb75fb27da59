//! Blinc Input
//!
//! Turns normalized pointer, keyboard, text and gesture events into routed
//! UI events:
//!
//! - **Hit testing**: point and region queries over any [`HitTestable`]
//!   tree, optionally accelerated by a quadtree
//! - **Routed events**: tunnel, bubble and direct routes with typed handlers
//! - **Input pipeline**: a queue drained by a background task through a
//!   priority-ordered processor chain, gesture recognition, hover, focus
//!   and pointer capture
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::{Mutex, RwLock};
//! use blinc_core::geometry::Rect;
//! use blinc_core::tree::{ElementProps, ElementTree};
//! use blinc_input::{EventHandler, InputPipeline, PipelineConfig, PointerEvent};
//!
//! let mut tree = ElementTree::new();
//! let root = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 200.0, 100.0)));
//! let button = tree
//!     .create_child(root, ElementProps::new(Rect::new(10.0, 10.0, 80.0, 30.0)))
//!     .unwrap();
//!
//! let config = PipelineConfig::low_latency();
//! let pipeline = InputPipeline::for_element_tree(Arc::new(RwLock::new(tree)), config).unwrap();
//!
//! let clicks = Arc::new(Mutex::new(0));
//! let counter = Arc::clone(&clicks);
//! let routing = pipeline.routing();
//! routing
//!     .add_handler(button, &routing.builtins().pointer_up, EventHandler::pointer(move |ctx, _| {
//!         *counter.lock() += 1;
//!         ctx.set_handled();
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! pipeline.submit_event(PointerEvent::down(20.0, 20.0));
//! pipeline.submit_event(PointerEvent::up(20.0, 20.0));
//! assert_eq!(*clicks.lock(), 1);
//! ```
//!
//! [`HitTestable`]: blinc_core::tree::HitTestable

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod focus;
pub mod gesture;
pub mod hit_test;
pub mod notify;
pub mod pipeline;
pub mod pointer;
pub mod processor;
pub mod routing;
pub mod spatial;
pub mod stats;

pub use config::{
    CaptureConfig, FailurePolicy, FocusConfig, GestureConfig, HitTestConfig, LogVerbosity,
    PipelineConfig,
};
pub use error::{InputError, Result};
pub use event::{
    DeviceDescriptor, DeviceKind, GestureEvent, GestureKind, GestureState, InputEvent,
    InputEventKind, Key, KeyState, KeyboardEvent, Modifiers, MouseButton, PointerEvent,
    PointerEventKind, TextInputEvent, Timestamp,
};
pub use gesture::{GestureRecognizer, TapRecognizer};
pub use hit_test::{FilterBehavior, HitTestEngine, HitTestResult, HitTestStats};
pub use notify::{
    Disposition, NotificationCallback, PipelineError, PipelineNotification, PipelineStage,
    ProcessedEvent,
};
pub use pipeline::{InputPipeline, SubscriptionId};
pub use pointer::PointerKey;
pub use processor::{
    CoordinateTransformProcessor, FilterProcessor, InputProcessor, LoggingProcessor,
    ProcessingContext, ProcessorOutcome, ValidationProcessor,
};
pub use routing::{
    EventHandler, EventRoute, EventRouter, RoutedEventArgs, RoutedEventDefinition, RoutingContext,
    RoutingStrategy,
};
pub use spatial::QuadTree;
pub use stats::PipelineStats;

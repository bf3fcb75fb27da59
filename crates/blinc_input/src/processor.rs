//! Input processor chain
//!
//! Every dequeued event runs through the registered processors in ascending
//! priority before it is hit-tested and routed. A processor can substitute
//! the event, fail, or stop the chain.
//!
//! | Processor                       | Priority | Effect                               |
//! |---------------------------------|----------|--------------------------------------|
//! | [`ValidationProcessor`]         | 0        | fails malformed events               |
//! | [`FilterProcessor`]             | 10       | stops blocked devices, keys, kinds   |
//! | [`CoordinateTransformProcessor`]| 20       | re-maps pointer and gesture position |
//! | [`LoggingProcessor`]            | 100      | logs selected events                 |

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use blinc_core::geometry::{Affine2D, Point};
use blinc_core::tree::ElementId;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{FailurePolicy, LogVerbosity};
use crate::error::{panic_message, InputError, Result};
use crate::event::{DeviceKind, InputEvent, InputEventKind, Key};

const TARGET: &str = "blinc_input::pipeline";

/// What a processor did with the event
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessorOutcome {
    /// Pass the current event on unchanged
    Continue,
    /// Pass a modified event on
    Replace(InputEvent),
    /// Skip the remaining processors and do not dispatch the event
    Stop { reason: String },
}

/// Record of one processor run
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorResult {
    pub processor: String,
    pub success: bool,
    /// Failure message or stop reason
    pub message: Option<String>,
    /// Attempts made, more than one when retried
    pub attempts: u32,
}

/// State threaded through the processor chain for one event
pub struct ProcessingContext {
    /// Event as submitted
    pub original: InputEvent,
    /// Event as modified by processors so far
    pub event: InputEvent,
    pub root: Option<ElementId>,
    pub focused: Option<ElementId>,
    pub results: Vec<ProcessorResult>,
    scratch: FxHashMap<String, Box<dyn Any + Send>>,
}

impl std::fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("event", &self.event)
            .field("root", &self.root)
            .field("focused", &self.focused)
            .field("results", &self.results)
            .field("scratch_keys", &self.scratch.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProcessingContext {
    pub fn new(event: InputEvent, root: Option<ElementId>, focused: Option<ElementId>) -> Self {
        Self {
            original: event.clone(),
            event,
            root,
            focused,
            results: Vec::new(),
            scratch: FxHashMap::default(),
        }
    }

    /// Store a value for later processors
    pub fn set_data<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.scratch.insert(key.into(), Box::new(value));
    }

    pub fn data<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.scratch.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn take_data<T: Any + Send>(&mut self, key: &str) -> Option<T> {
        let value = self.scratch.remove(key)?;
        match value.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(other) => {
                // Wrong type requested; keep the value for its owner
                self.scratch.insert(key.to_string(), other);
                None
            }
        }
    }

    /// Whether any processor failed
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.success)
    }
}

/// A stage in the processor chain
pub trait InputProcessor: Send {
    fn name(&self) -> &str;

    /// Lower runs first
    fn priority(&self) -> i32;

    fn can_process(&self, _event: &InputEvent) -> bool {
        true
    }

    fn process(&mut self, ctx: &mut ProcessingContext) -> Result<ProcessorOutcome>;
}

/// How the chain finished
#[derive(Clone, Debug, PartialEq)]
pub enum ChainOutcome {
    Completed,
    Stopped { processor: String, reason: String },
    /// A failure under [`FailurePolicy::Halt`]
    Failed { processor: String, error: InputError },
}

/// Priority-ordered processors
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn InputProcessor>>,
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.processors.iter().map(|p| (p.name(), p.priority())))
            .finish()
    }
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a processor; equal priorities keep insertion order
    pub fn add(&mut self, processor: Box<dyn InputProcessor>) {
        let priority = processor.priority();
        let index = self
            .processors
            .iter()
            .position(|p| p.priority() > priority)
            .unwrap_or(self.processors.len());
        self.processors.insert(index, processor);
    }

    /// Remove processors named `name`, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.processors.len();
        self.processors.retain(|p| p.name() != name);
        before - self.processors.len()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run the chain over `ctx`
    ///
    /// A processor returning an error (or panicking) is retried up to
    /// `max_retries` more times before its failure is recorded.
    pub fn run(
        &mut self,
        ctx: &mut ProcessingContext,
        policy: FailurePolicy,
        max_retries: u32,
    ) -> ChainOutcome {
        for processor in self.processors.iter_mut() {
            if !processor.can_process(&ctx.event) {
                continue;
            }

            let mut attempts = 0;
            loop {
                attempts += 1;
                let result = catch_unwind(AssertUnwindSafe(|| processor.process(ctx)))
                    .unwrap_or_else(|panic| {
                        Err(InputError::Panicked {
                            stage: "processor",
                            message: panic_message(&*panic),
                        })
                    });

                match result {
                    Ok(outcome) => {
                        let name = processor.name().to_string();
                        let message = match &outcome {
                            ProcessorOutcome::Stop { reason } => Some(reason.clone()),
                            _ => None,
                        };
                        ctx.results.push(ProcessorResult {
                            processor: name.clone(),
                            success: true,
                            message,
                            attempts,
                        });
                        match outcome {
                            ProcessorOutcome::Continue => {}
                            ProcessorOutcome::Replace(event) => ctx.event = event,
                            ProcessorOutcome::Stop { reason } => {
                                tracing::trace!(target: TARGET, processor = %name, %reason, "processor chain stopped");
                                return ChainOutcome::Stopped {
                                    processor: name,
                                    reason,
                                };
                            }
                        }
                        break;
                    }
                    Err(error) if attempts <= max_retries => {
                        tracing::debug!(
                            target: TARGET,
                            processor = processor.name(),
                            attempt = attempts,
                            %error,
                            "processor failed, retrying"
                        );
                    }
                    Err(error) => {
                        let name = processor.name().to_string();
                        tracing::warn!(target: TARGET, processor = %name, %error, "processor failed");
                        ctx.results.push(ProcessorResult {
                            processor: name.clone(),
                            success: false,
                            message: Some(error.to_string()),
                            attempts,
                        });
                        if policy == FailurePolicy::Halt {
                            return ChainOutcome::Failed {
                                processor: name,
                                error,
                            };
                        }
                        break;
                    }
                }
            }
        }
        ChainOutcome::Completed
    }
}

// ============================================================================
// Built-in processors
// ============================================================================

/// Rejects events with a zero timestamp, no device, or an out-of-range position
#[derive(Clone, Debug)]
pub struct ValidationProcessor {
    /// Largest accepted absolute pointer coordinate
    pub max_coordinate: f32,
}

impl Default for ValidationProcessor {
    fn default() -> Self {
        Self {
            max_coordinate: 100_000.0,
        }
    }
}

impl ValidationProcessor {
    pub const PRIORITY: i32 = 0;

    fn fail(&self, message: impl Into<String>) -> InputError {
        InputError::Processor {
            processor: "validation".into(),
            message: message.into(),
        }
    }
}

impl InputProcessor for ValidationProcessor {
    fn name(&self) -> &str {
        "validation"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn process(&mut self, ctx: &mut ProcessingContext) -> Result<ProcessorOutcome> {
        let event = &ctx.event;
        if event.timestamp().is_zero() {
            return Err(self.fail("event has no timestamp"));
        }
        if event.device().is_none() {
            return Err(self.fail("event has no device"));
        }
        if let Some(p) = event.position() {
            if !p.is_finite() || p.x.abs() > self.max_coordinate || p.y.abs() > self.max_coordinate {
                return Err(self.fail(format!("position ({}, {}) out of range", p.x, p.y)));
            }
        }
        Ok(ProcessorOutcome::Continue)
    }
}

/// Stops events from blocked devices, keys, or event kinds
#[derive(Clone, Debug, Default)]
pub struct FilterProcessor {
    blocked_devices: FxHashSet<DeviceKind>,
    blocked_keys: FxHashSet<Key>,
    blocked_kinds: FxHashSet<InputEventKind>,
}

impl FilterProcessor {
    pub const PRIORITY: i32 = 10;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_device(mut self, kind: DeviceKind) -> Self {
        self.blocked_devices.insert(kind);
        self
    }

    pub fn block_key(mut self, key: Key) -> Self {
        self.blocked_keys.insert(key);
        self
    }

    pub fn block_kind(mut self, kind: InputEventKind) -> Self {
        self.blocked_kinds.insert(kind);
        self
    }

    fn blocked_reason(&self, event: &InputEvent) -> Option<String> {
        if self.blocked_kinds.contains(&event.kind()) {
            return Some(format!("{:?} events blocked", event.kind()));
        }
        if let Some(device) = event.device() {
            if self.blocked_devices.contains(&device.kind) {
                return Some(format!("{:?} device blocked", device.kind));
            }
        }
        if let InputEvent::Keyboard(k) = event {
            if self.blocked_keys.contains(&k.key) {
                return Some(format!("key {:?} blocked", k.key));
            }
        }
        None
    }
}

impl InputProcessor for FilterProcessor {
    fn name(&self) -> &str {
        "filter"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn process(&mut self, ctx: &mut ProcessingContext) -> Result<ProcessorOutcome> {
        Ok(match self.blocked_reason(&ctx.event) {
            Some(reason) => ProcessorOutcome::Stop { reason },
            None => ProcessorOutcome::Continue,
        })
    }
}

type PointMap = Box<dyn Fn(Point) -> Point + Send + Sync>;

/// Re-maps pointer and gesture positions
pub struct CoordinateTransformProcessor {
    map: PointMap,
}

impl std::fmt::Debug for CoordinateTransformProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinateTransformProcessor").finish_non_exhaustive()
    }
}

impl CoordinateTransformProcessor {
    pub const PRIORITY: i32 = 20;

    pub fn new<F>(map: F) -> Self
    where
        F: Fn(Point) -> Point + Send + Sync + 'static,
    {
        Self { map: Box::new(map) }
    }

    /// Map positions through an affine transform (e.g. device pixels to logical)
    pub fn from_affine(transform: Affine2D) -> Self {
        Self::new(move |p| transform.transform_point(p))
    }
}

impl InputProcessor for CoordinateTransformProcessor {
    fn name(&self) -> &str {
        "coordinate_transform"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_process(&self, event: &InputEvent) -> bool {
        event.position().is_some()
    }

    fn process(&mut self, ctx: &mut ProcessingContext) -> Result<ProcessorOutcome> {
        Ok(match ctx.event.position() {
            Some(p) => ProcessorOutcome::Replace(ctx.event.with_position((self.map)(p))),
            None => ProcessorOutcome::Continue,
        })
    }
}

/// Logs events of selected kinds
#[derive(Clone, Debug)]
pub struct LoggingProcessor {
    log_all: bool,
    kinds: FxHashSet<InputEventKind>,
    verbosity: LogVerbosity,
    logged: u64,
}

impl LoggingProcessor {
    pub const PRIORITY: i32 = 100;

    /// Log every event at `verbosity`
    pub fn all(verbosity: LogVerbosity) -> Self {
        Self {
            log_all: true,
            kinds: FxHashSet::default(),
            verbosity,
            logged: 0,
        }
    }

    /// Log only events of `kinds`
    pub fn kinds(kinds: impl IntoIterator<Item = InputEventKind>, verbosity: LogVerbosity) -> Self {
        Self {
            log_all: false,
            kinds: kinds.into_iter().collect(),
            verbosity,
            logged: 0,
        }
    }

    /// Events logged so far
    pub fn logged(&self) -> u64 {
        self.logged
    }

    fn wants(&self, event: &InputEvent) -> bool {
        self.log_all || self.kinds.contains(&event.kind())
    }
}

impl InputProcessor for LoggingProcessor {
    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_process(&self, event: &InputEvent) -> bool {
        self.verbosity != LogVerbosity::Off && self.wants(event)
    }

    fn process(&mut self, ctx: &mut ProcessingContext) -> Result<ProcessorOutcome> {
        let event = &ctx.event;
        let kind = event.kind();
        let at = event.timestamp().as_micros();
        match self.verbosity {
            LogVerbosity::Off => return Ok(ProcessorOutcome::Continue),
            LogVerbosity::Error => tracing::error!(target: TARGET, ?kind, at, ?event, "input event"),
            LogVerbosity::Warn => tracing::warn!(target: TARGET, ?kind, at, ?event, "input event"),
            LogVerbosity::Info => tracing::info!(target: TARGET, ?kind, at, ?event, "input event"),
            LogVerbosity::Debug => tracing::debug!(target: TARGET, ?kind, at, ?event, "input event"),
            LogVerbosity::Trace => tracing::trace!(target: TARGET, ?kind, at, ?event, "input event"),
        }
        self.logged += 1;
        Ok(ProcessorOutcome::Continue)
    }
}

//! Input pipeline
//!
//! ```text
//! submit_event ──► queue ──► background loop (batch_size per wake)
//!                               │
//!                               ├─ coalesce pointer moves
//!                               ├─ processor chain (ascending priority)
//!                               ├─ pointer:  gestures → hit test → hover → focus → route
//!                               ├─ key/text: route to focused element
//!                               └─ notify subscribers (Processed | Error)
//! ```
//!
//! Submission never blocks and never drops events. When async processing is
//! off, the submitting thread processes the event before `submit_event`
//! returns.
//!
//! No pipeline lock is held while handlers run: the tree read guard is
//! released after each route is built, so handlers may mutate the tree, move
//! focus, capture pointers, or submit further events. Processors and gesture
//! recognizers run under their own locks and must not register processors or
//! recognizers themselves.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use blinc_core::geometry::Point;
use blinc_core::tree::{ElementId, ElementTree, HitTestable};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::error::{panic_message, InputError, Result};
use crate::event::{GestureEvent, InputEvent, PointerEvent, PointerEventKind};
use crate::focus::FocusManager;
use crate::gesture::{GestureRecognizer, TapRecognizer};
use crate::hit_test::{HitTestEngine, HitTestResult};
use crate::notify::{
    Disposition, NotificationCallback, PipelineError, PipelineNotification, PipelineStage,
    ProcessedEvent,
};
use crate::pointer::{CaptureManager, HoverTracker, HoverTransition, PointerKey};
use crate::processor::{ChainOutcome, InputProcessor, ProcessingContext, ProcessorChain, ValidationProcessor};
use crate::routing::{
    EventPayload, EventRouter, FocusChange, RouteOutcome, RoutedEventArgs, RoutedEventDefinition,
    RoutingContext,
};
use crate::stats::{PipelineStats, StatsCounters};

const TARGET: &str = "blinc_input::pipeline";

/// Longest the loop waits on an empty queue before re-checking cancellation
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Pending per-element invalidations beyond this collapse into a full one
const MAX_PENDING_ELEMENTS: usize = 256;

type Def = Arc<RoutedEventDefinition>;
type StageResult<T> = std::result::Result<T, (PipelineStage, InputError)>;

struct Queued {
    event: InputEvent,
    submitted: Instant,
}

impl Queued {
    fn new(event: InputEvent) -> Self {
        Self {
            event,
            submitted: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct PendingInvalidation {
    all: bool,
    elements: SmallVec<[ElementId; 8]>,
}

impl PendingInvalidation {
    fn push(&mut self, element: Option<ElementId>) {
        match element {
            Some(id) if !self.all => {
                self.elements.push(id);
                if self.elements.len() > MAX_PENDING_ELEMENTS {
                    self.all = true;
                    self.elements.clear();
                }
            }
            Some(_) => {}
            None => {
                self.all = true;
                self.elements.clear();
            }
        }
    }

    fn is_empty(&self) -> bool {
        !self.all && self.elements.is_empty()
    }
}

/// Handle returned by [`InputPipeline::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Shared<T> {
    config: PipelineConfig,
    tree: Arc<RwLock<T>>,
    root: RwLock<Option<ElementId>>,
    routing: Arc<RoutingContext>,
    router: EventRouter,
    engine: Mutex<HitTestEngine>,
    pending: Arc<Mutex<PendingInvalidation>>,
    processors: Mutex<ProcessorChain>,
    recognizers: Mutex<Vec<Box<dyn GestureRecognizer>>>,
    focus: Mutex<FocusManager>,
    capture: Mutex<CaptureManager>,
    hover: Mutex<HoverTracker>,
    subscribers: RwLock<Vec<(SubscriptionId, NotificationCallback)>>,
    next_subscription: AtomicU64,
    stats: StatsCounters,
    over_limit: AtomicBool,
    drained: Notify,
}

struct Worker {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<Option<mpsc::UnboundedReceiver<Queued>>>,
}

/// Queues input events and dispatches them against a visual tree
pub struct InputPipeline<T: HitTestable + Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
    sender: mpsc::UnboundedSender<Queued>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Queued>>>,
    worker: Mutex<Option<Worker>>,
}

impl<T: HitTestable + Send + Sync + 'static> std::fmt::Debug for InputPipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPipeline")
            .field("root", &*self.shared.root.read())
            .field("running", &self.is_running())
            .field("queue_depth", &self.shared.stats.depth.load(Ordering::Relaxed))
            .field("processors", &*self.shared.processors.lock())
            .finish_non_exhaustive()
    }
}

impl InputPipeline<ElementTree> {
    /// Pipeline over an [`ElementTree`], rooted at its root and listening for layout changes
    pub fn for_element_tree(tree: Arc<RwLock<ElementTree>>, config: PipelineConfig) -> Result<Self> {
        let pipeline = Self::new(Arc::clone(&tree), config)?;
        let guard = tree.read();
        pipeline.set_root(guard.root());
        guard.on_layout_updated(pipeline.layout_listener());
        drop(guard);
        Ok(pipeline)
    }
}

impl<T: HitTestable + Send + Sync + 'static> InputPipeline<T> {
    /// Pipeline with its own routing context
    pub fn new(tree: Arc<RwLock<T>>, config: PipelineConfig) -> Result<Self> {
        let routing = Arc::new(RoutingContext::new()?);
        Self::with_routing(tree, routing, config)
    }

    /// Pipeline dispatching to the handlers of a shared routing context
    pub fn with_routing(
        tree: Arc<RwLock<T>>,
        routing: Arc<RoutingContext>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let router = EventRouter::with_cache(config.route_cache_capacity, config.route_cache_ttl);

        let mut processors = ProcessorChain::new();
        processors.add(Box::new(ValidationProcessor::default()));

        let mut recognizers: Vec<Box<dyn GestureRecognizer>> = Vec::new();
        if config.gesture.enabled {
            recognizers.push(Box::new(TapRecognizer::from_config(&config.gesture)));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Shared {
            engine: Mutex::new(HitTestEngine::new(config.hit_test.clone())),
            config,
            tree,
            root: RwLock::new(None),
            routing,
            router,
            pending: Arc::new(Mutex::new(PendingInvalidation::default())),
            processors: Mutex::new(processors),
            recognizers: Mutex::new(recognizers),
            focus: Mutex::new(FocusManager::new()),
            capture: Mutex::new(CaptureManager::new()),
            hover: Mutex::new(HoverTracker::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            stats: StatsCounters::default(),
            over_limit: AtomicBool::new(false),
            drained: Notify::new(),
        };

        Ok(Self {
            shared: Arc::new(shared),
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn tree(&self) -> &Arc<RwLock<T>> {
        &self.shared.tree
    }

    /// Routed events and handler registration
    pub fn routing(&self) -> &Arc<RoutingContext> {
        &self.shared.routing
    }

    pub fn router(&self) -> &EventRouter {
        &self.shared.router
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the background loop on the current tokio runtime
    ///
    /// Does nothing when async processing is disabled. Events submitted
    /// before `start` stay queued and are processed once the loop runs.
    pub fn start(&self) -> Result<()> {
        if !self.shared.config.async_processing {
            tracing::debug!(target: TARGET, "async processing disabled, not starting loop");
            return Ok(());
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(InputError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| InputError::NoRuntime(e.to_string()))?;
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| InputError::LoopFailed("event queue was lost".into()))?;

        let (cancel, cancelled) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let inner = runtime.spawn(run_loop(Arc::clone(&shared), receiver, cancelled));
        let handle = runtime.spawn(async move {
            match inner.await {
                Ok(receiver) => Some(receiver),
                Err(error) => {
                    let message = if error.is_panic() {
                        panic_message(&*error.into_panic())
                    } else {
                        error.to_string()
                    };
                    shared.loop_failed(InputError::LoopFailed(message));
                    None
                }
            }
        });

        tracing::debug!(target: TARGET, "input pipeline started");
        *worker = Some(Worker { cancel, handle });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Stop the background loop, waiting at most the configured shutdown timeout
    ///
    /// The loop finishes its current batch; events still queued stay queued
    /// for a later [`start`](Self::start).
    pub async fn shutdown(&self) -> Result<()> {
        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else {
            return Ok(());
        };
        let _ = worker.cancel.send(true);

        let timeout = self.shared.config.shutdown_timeout;
        match tokio::time::timeout(timeout, &mut worker.handle).await {
            Ok(Ok(Some(receiver))) => {
                *self.receiver.lock() = Some(receiver);
                tracing::debug!(target: TARGET, "input pipeline stopped");
                Ok(())
            }
            Ok(Ok(None)) => Err(InputError::LoopFailed("loop exited abnormally".into())),
            Ok(Err(error)) => Err(InputError::LoopFailed(error.to_string())),
            Err(_) => {
                worker.handle.abort();
                tracing::warn!(target: TARGET, ?timeout, "input loop did not stop in time");
                Err(InputError::ShutdownTimeout(timeout))
            }
        }
    }

    /// Wait until every submitted event has completed
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let drained = async {
            loop {
                let notified = shared.drained.notified();
                if shared.is_drained() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Queue an event (or process it inline when async processing is off)
    pub fn submit_event(&self, event: impl Into<InputEvent>) {
        let queued = self.admit(event.into());
        if self.shared.config.async_processing {
            self.enqueue(queued);
        } else {
            self.shared.process_batch(vec![queued]);
        }
    }

    /// Queue several events in order
    pub fn submit_events<I, E>(&self, events: I)
    where
        I: IntoIterator<Item = E>,
        E: Into<InputEvent>,
    {
        let batch: Vec<Queued> = events.into_iter().map(|e| self.admit(e.into())).collect();
        if self.shared.config.async_processing {
            for queued in batch {
                self.enqueue(queued);
            }
        } else {
            self.shared.process_batch(batch);
        }
    }

    fn admit(&self, event: InputEvent) -> Queued {
        let stats = &self.shared.stats;
        stats.submitted.fetch_add(1, Ordering::AcqRel);
        let depth = stats.depth.fetch_add(1, Ordering::AcqRel) + 1;

        let capacity = self.shared.config.queue_capacity;
        if depth > capacity {
            if !self.shared.over_limit.swap(true, Ordering::Relaxed) {
                tracing::warn!(target: TARGET, depth, capacity, "input queue above soft limit");
            }
        } else if depth <= capacity / 2 {
            self.shared.over_limit.store(false, Ordering::Relaxed);
        }
        Queued::new(event)
    }

    fn enqueue(&self, queued: Queued) {
        if let Err(mpsc::error::SendError(queued)) = self.sender.send(queued) {
            // Receiver died with the loop; complete the event as failed
            self.shared.complete_err(
                &queued,
                PipelineStage::Processors,
                InputError::LoopFailed("event queue closed".into()),
                Duration::ZERO,
            );
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn root(&self) -> Option<ElementId> {
        *self.shared.root.read()
    }

    /// Element hit testing starts from
    pub fn set_root(&self, root: Option<ElementId>) {
        *self.shared.root.write() = root;
        self.shared.pending.lock().push(None);
    }

    pub fn focused(&self) -> Option<ElementId> {
        self.shared.focus.lock().focused()
    }

    /// Move keyboard focus, routing LostFocus and GotFocus
    pub fn set_focus(&self, element: Option<ElementId>) -> Result<()> {
        if let Some(id) = element {
            if !self.shared.tree.read().contains(id) {
                return Err(InputError::UnknownElement(id));
            }
        }
        self.shared.move_focus(element).map(|_| ())
    }

    /// Route `pointer` to `element` until released
    pub fn capture_pointer(&self, pointer: PointerKey, element: ElementId) -> Result<Option<ElementId>> {
        if !self.shared.tree.read().contains(element) {
            return Err(InputError::UnknownElement(element));
        }
        Ok(self.shared.capture.lock().capture(pointer, element))
    }

    pub fn release_pointer(&self, pointer: PointerKey) -> Option<ElementId> {
        self.shared.capture.lock().release(pointer)
    }

    pub fn captured(&self, pointer: PointerKey) -> Option<ElementId> {
        self.shared.capture.lock().captured(pointer)
    }

    /// Elements `pointer` currently hovers, root first
    pub fn hovered(&self, pointer: PointerKey) -> Vec<ElementId> {
        self.shared.hover.lock().hovered(pointer).to_vec()
    }

    /// Invalidate all cached geometry before the next event
    pub fn on_layout_updated(&self) {
        self.shared.pending.lock().push(None);
    }

    /// Invalidate one element's cached geometry (and its subtree) before the next event
    pub fn invalidate_element(&self, element: ElementId) {
        self.shared.pending.lock().push(Some(element));
    }

    /// Callback for a tree's layout listener list
    ///
    /// The callback only records the change, so it is safe to invoke while
    /// the tree is write-locked.
    pub fn layout_listener(&self) -> impl Fn(Option<ElementId>) + Send + Sync + 'static {
        let pending = Arc::clone(&self.shared.pending);
        move |element| pending.lock().push(element)
    }

    /// Hit test against the current root outside of event processing
    pub fn hit_test(&self, point: Point) -> HitTestResult {
        match self.root() {
            Some(root) => {
                self.shared.apply_pending_invalidations();
                self.shared.hit_test_at(root, point)
            }
            None => HitTestResult::miss(point),
        }
    }

    // ========================================================================
    // Extension points
    // ========================================================================

    pub fn add_processor(&self, processor: impl InputProcessor + 'static) {
        self.shared.processors.lock().add(Box::new(processor));
    }

    /// Remove processors by name, returning how many were removed
    pub fn remove_processor(&self, name: &str) -> usize {
        self.shared.processors.lock().remove(name)
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.shared.processors.lock().names()
    }

    pub fn add_gesture_recognizer(&self, recognizer: impl GestureRecognizer + 'static) {
        self.shared.recognizers.lock().push(Box::new(recognizer));
    }

    /// Receive notifications on the processing thread
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PipelineNotification) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.subscribers.write().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn stats(&self) -> PipelineStats {
        let processor_count = self.shared.processors.lock().len();
        let hit_test = self.shared.engine.lock().stats();
        self.shared
            .stats
            .snapshot(processor_count, hit_test, self.shared.router.cache_stats())
    }
}

impl<T: HitTestable + Send + Sync + 'static> Drop for InputPipeline<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.cancel.send(true);
        }
    }
}

// ============================================================================
// Background loop
// ============================================================================

async fn run_loop<T: HitTestable + Send + Sync + 'static>(
    shared: Arc<Shared<T>>,
    mut receiver: mpsc::UnboundedReceiver<Queued>,
    cancelled: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<Queued> {
    let batch_size = shared.config.batch_size.max(1);
    let idle = if shared.config.processing_interval.is_zero() {
        IDLE_WAIT
    } else {
        shared.config.processing_interval
    };
    tracing::debug!(target: TARGET, batch_size, ?idle, "input loop running");

    while !*cancelled.borrow() {
        let mut batch = Vec::with_capacity(batch_size);
        fill_batch(&mut receiver, &mut batch, batch_size);

        if batch.is_empty() {
            match tokio::time::timeout(idle, receiver.recv()).await {
                Ok(Some(queued)) => batch.push(queued),
                Ok(None) => break,
                Err(_) => continue,
            }
            fill_batch(&mut receiver, &mut batch, batch_size);
        }

        shared.process_batch(batch);
        tokio::task::yield_now().await;
    }

    tracing::debug!(target: TARGET, "input loop exiting");
    receiver
}

fn fill_batch(receiver: &mut mpsc::UnboundedReceiver<Queued>, batch: &mut Vec<Queued>, limit: usize) {
    while batch.len() < limit {
        match receiver.try_recv() {
            Ok(queued) => batch.push(queued),
            Err(_) => break,
        }
    }
}

// ============================================================================
// Event processing
// ============================================================================

impl<T: HitTestable + Send + Sync + 'static> Shared<T> {
    fn is_drained(&self) -> bool {
        self.stats.completed() >= self.stats.submitted.load(Ordering::Acquire)
    }

    fn process_batch(&self, batch: Vec<Queued>) {
        let window = self.config.coalescing_window;
        for (i, queued) in batch.iter().enumerate() {
            if !window.is_zero() && superseded(&batch, i, window) {
                self.complete_coalesced(queued);
            } else {
                self.process_one(queued);
            }
        }
    }

    fn process_one(&self, queued: &Queued) {
        let start = Instant::now();
        self.apply_pending_invalidations();

        let stage = Cell::new(PipelineStage::Processors);
        let result = catch_unwind(AssertUnwindSafe(|| self.dispatch(&queued.event, &stage)))
            .unwrap_or_else(|panic| {
                Err((
                    stage.get(),
                    InputError::Panicked {
                        stage: stage.get().as_str(),
                        message: panic_message(&*panic),
                    },
                ))
            });

        let elapsed = start.elapsed();
        self.stats.record_time(elapsed);
        let budget = self.config.event_timeout;
        let exceeded = !budget.is_zero() && elapsed > budget;
        if exceeded {
            self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: TARGET,
                kind = ?queued.event.kind(),
                ?elapsed,
                ?budget,
                "event exceeded processing timeout"
            );
        }

        match result {
            Ok(mut processed) => {
                processed.duration = elapsed;
                processed.exceeded_timeout = exceeded;
                self.complete_ok(queued, processed);
            }
            Err((stage, error)) => self.complete_err(queued, stage, error, elapsed),
        }
    }

    fn complete_ok(&self, queued: &Queued, processed: ProcessedEvent) {
        if self.config.log_verbosity.allows(tracing::Level::DEBUG) {
            tracing::debug!(
                target: TARGET,
                kind = ?processed.event.kind(),
                disposition = ?processed.disposition,
                handled = processed.handled,
                latency = ?queued.submitted.elapsed(),
                "event processed"
            );
        }

        let unhandled = !processed.handled
            && matches!(processed.disposition, Disposition::Routed | Disposition::NoTarget);
        if unhandled {
            self.stats.unhandled.fetch_add(1, Ordering::Relaxed);
            self.notify(&PipelineNotification::Unhandled(processed.clone()));
        }
        self.notify(&PipelineNotification::Processed(processed));
        self.stats.processed.fetch_add(1, Ordering::AcqRel);
        self.finish_one();
    }

    fn complete_err(&self, queued: &Queued, stage: PipelineStage, error: InputError, duration: Duration) {
        if self.config.log_verbosity.allows(tracing::Level::WARN) {
            tracing::warn!(target: TARGET, %stage, %error, kind = ?queued.event.kind(), "event failed");
        }
        self.notify(&PipelineNotification::Error(PipelineError {
            stage,
            event: queued.event.clone(),
            error,
            duration,
        }));
        self.stats.errors.fetch_add(1, Ordering::AcqRel);
        self.finish_one();
    }

    fn complete_coalesced(&self, queued: &Queued) {
        self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
        let mut processed = ProcessedEvent::for_event(&queued.event);
        processed.disposition = Disposition::Coalesced;
        self.notify(&PipelineNotification::Processed(processed));
        self.stats.processed.fetch_add(1, Ordering::AcqRel);
        self.finish_one();
    }

    fn finish_one(&self) {
        self.stats.depth.fetch_sub(1, Ordering::AcqRel);
        if self.is_drained() {
            self.drained.notify_waiters();
        }
    }

    fn notify(&self, notification: &PipelineNotification) {
        let subscribers: Vec<NotificationCallback> =
            self.subscribers.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in subscribers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(notification))) {
                tracing::warn!(target: TARGET, message = %panic_message(&*panic), "notification callback panicked");
            }
        }
    }

    fn loop_failed(&self, error: InputError) {
        tracing::error!(target: TARGET, %error, "input loop failed");
        self.notify(&PipelineNotification::LoopFailed(error));
    }

    fn apply_pending_invalidations(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return;
        }
        let tree = self.tree.read();
        let mut engine = self.engine.lock();
        if pending.all {
            engine.on_layout_updated();
        } else {
            for id in &pending.elements {
                engine.invalidate_subtree(&*tree, *id);
            }
        }
        // Any structural change can move an element under a new parent
        self.router.clear_cache();
        tracing::trace!(
            target: TARGET,
            all = pending.all,
            elements = pending.elements.len(),
            "applied layout invalidations"
        );
    }

    fn hit_test_at(&self, root: ElementId, point: Point) -> HitTestResult {
        let tree = self.tree.read();
        self.engine.lock().hit_test(&*tree, root, point)
    }

    fn dispatch(&self, event: &InputEvent, stage: &Cell<PipelineStage>) -> StageResult<ProcessedEvent> {
        let root = *self.root.read();
        let focused = self.focus.lock().focused();

        stage.set(PipelineStage::Processors);
        let mut ctx = ProcessingContext::new(event.clone(), root, focused);
        let outcome = self
            .processors
            .lock()
            .run(&mut ctx, self.config.failure_policy, self.config.max_retries);
        let retries: u64 = ctx
            .results
            .iter()
            .map(|r| u64::from(r.attempts.saturating_sub(1)))
            .sum();
        if retries > 0 {
            self.stats.retries.fetch_add(retries, Ordering::Relaxed);
        }

        let mut processed = ProcessedEvent::for_event(event);
        processed.dispatched = ctx.event.clone();
        match outcome {
            ChainOutcome::Completed => {}
            ChainOutcome::Stopped { processor, reason } => {
                tracing::trace!(target: TARGET, %processor, %reason, "event stopped by processor");
                processed.disposition = Disposition::StoppedByProcessor;
                return Ok(processed);
            }
            ChainOutcome::Failed { error, .. } => return Err((PipelineStage::Processors, error)),
        }

        match &ctx.event {
            InputEvent::Pointer(pointer) => self.dispatch_pointer(pointer, root, &mut processed, stage)?,
            InputEvent::Gesture(gesture) => {
                stage.set(PipelineStage::Routing);
                let (target, hit, outcome) = self
                    .route_gesture(gesture, root)
                    .map_err(|e| (PipelineStage::Routing, e))?;
                processed.target = target;
                processed.hit = hit;
                processed.disposition = if target.is_some() {
                    Disposition::Routed
                } else {
                    Disposition::NoTarget
                };
                processed.handled = outcome.handled;
                processed.handler_failures = outcome.failures;
            }
            InputEvent::Keyboard(_) | InputEvent::TextInput(_) => {
                self.dispatch_focused(&ctx.event, &mut processed, stage)?
            }
        }
        Ok(processed)
    }

    fn dispatch_pointer(
        &self,
        pointer: &PointerEvent,
        root: Option<ElementId>,
        processed: &mut ProcessedEvent,
        stage: &Cell<PipelineStage>,
    ) -> StageResult<()> {
        let key: PointerKey = (pointer.device.as_ref().map_or(0, |d| d.id), pointer.pointer_id);

        stage.set(PipelineStage::Gestures);
        let gestures: Vec<GestureEvent> = if self.config.gesture.enabled {
            self.recognizers
                .lock()
                .iter_mut()
                .filter_map(|r| r.on_pointer(pointer))
                .collect()
        } else {
            Vec::new()
        };

        stage.set(PipelineStage::HitTest);
        let captured = if self.config.capture.enabled {
            self.capture.lock().captured(key)
        } else {
            None
        };
        let captured = captured.filter(|id| self.tree.read().contains(*id));
        let hit = root.map(|root| self.hit_test_at(root, pointer.position));
        let target = captured.or_else(|| hit.as_ref().and_then(|h| h.element));

        stage.set(PipelineStage::Routing);
        if captured.is_none() {
            let transition = match pointer.kind {
                PointerEventKind::Cancel => HoverTransition {
                    left: self.hover.lock().leave(key),
                    entered: SmallVec::new(),
                },
                _ => {
                    let path = hit.as_ref().map(|h| h.path.as_slice()).unwrap_or(&[]);
                    self.hover.lock().update(key, path)
                }
            };
            self.route_hover(&transition, pointer, processed)
                .map_err(|e| (PipelineStage::Routing, e))?;
        }

        if pointer.kind == PointerEventKind::Down && self.config.focus.focus_on_pointer_down {
            if let Some(target) = target {
                stage.set(PipelineStage::Focus);
                let failures = self
                    .move_focus(Some(target))
                    .map_err(|e| (PipelineStage::Focus, e))?;
                processed.handler_failures.extend(failures);
            }
        }

        stage.set(PipelineStage::Routing);
        let consumed = self.config.gesture.stop_after_gesture && !gestures.is_empty();
        if !consumed {
            if let Some(target) = target {
                let event = InputEvent::Pointer(pointer.clone());
                let defs = self.routing.builtins().for_input(&event);
                let path = match captured {
                    Some(_) => None,
                    None => hit.as_ref().map(|h| h.path.as_slice()),
                };
                let outcome = self
                    .route(&defs, target, EventPayload::Pointer(pointer.clone()), path)
                    .map_err(|e| (PipelineStage::Routing, e))?;
                processed.handled = outcome.handled;
                processed.handler_failures.extend(outcome.failures);
            }
        }

        for gesture in &gestures {
            let (_, _, outcome) = self
                .route_gesture(gesture, root)
                .map_err(|e| (PipelineStage::Gestures, e))?;
            if consumed {
                processed.handled |= outcome.handled;
            }
            processed.handler_failures.extend(outcome.failures);
        }

        let ends_press = matches!(pointer.kind, PointerEventKind::Up | PointerEventKind::Cancel);
        if ends_press && self.config.capture.release_on_pointer_up {
            self.capture.lock().release(key);
        }

        processed.target = target;
        processed.hit = hit;
        processed.gestures = gestures;
        processed.disposition = if consumed {
            Disposition::ConsumedByGesture
        } else if target.is_some() {
            Disposition::Routed
        } else {
            Disposition::NoTarget
        };
        Ok(())
    }

    fn dispatch_focused(
        &self,
        event: &InputEvent,
        processed: &mut ProcessedEvent,
        stage: &Cell<PipelineStage>,
    ) -> StageResult<()> {
        stage.set(PipelineStage::Focus);
        let lost = {
            let tree = self.tree.read();
            self.focus.lock().validate(&*tree)
        };
        if let Some(change) = lost {
            tracing::debug!(target: TARGET, element = ?change.old, "focused element left the tree");
        }

        let Some(target) = self.focus.lock().focused() else {
            processed.disposition = Disposition::NoTarget;
            return Ok(());
        };

        stage.set(PipelineStage::Routing);
        let defs = self.routing.builtins().for_input(event);
        let outcome = self
            .route(&defs, target, EventPayload::from(event.clone()), None)
            .map_err(|e| (PipelineStage::Routing, e))?;
        processed.target = Some(target);
        processed.handled = outcome.handled;
        processed.handler_failures.extend(outcome.failures);
        processed.disposition = Disposition::Routed;
        Ok(())
    }

    /// Hit test a gesture at its focal point and route it
    fn route_gesture(
        &self,
        gesture: &GestureEvent,
        root: Option<ElementId>,
    ) -> Result<(Option<ElementId>, Option<HitTestResult>, RouteOutcome)> {
        let Some(root) = root else {
            return Ok((None, None, RouteOutcome::default()));
        };
        let hit = self.hit_test_at(root, gesture.position);
        let Some(target) = hit.element else {
            return Ok((None, Some(hit), RouteOutcome::default()));
        };
        let defs = [Arc::clone(&self.routing.builtins().gesture)];
        let outcome = self.route(
            &defs,
            target,
            EventPayload::Gesture(gesture.clone()),
            Some(&hit.path),
        )?;
        Ok((Some(target), Some(hit), outcome))
    }

    fn route_hover(
        &self,
        transition: &HoverTransition,
        pointer: &PointerEvent,
        processed: &mut ProcessedEvent,
    ) -> Result<()> {
        if transition.is_empty() {
            return Ok(());
        }
        let builtins = self.routing.builtins();
        let leave = [Arc::clone(&builtins.pointer_leave)];
        let enter = [Arc::clone(&builtins.pointer_enter)];

        let steps = transition
            .left
            .iter()
            .map(|id| (*id, &leave))
            .chain(transition.entered.iter().map(|id| (*id, &enter)));
        for (element, defs) in steps {
            if !self.tree.read().contains(element) {
                continue;
            }
            let outcome = self.route(defs, element, EventPayload::Pointer(pointer.clone()), None)?;
            processed.handler_failures.extend(outcome.failures);
        }
        Ok(())
    }

    /// Move focus and route the change, returning handler failures
    fn move_focus(&self, element: Option<ElementId>) -> Result<Vec<crate::routing::HandlerFailure>> {
        let change = self.focus.lock().set_focus(element);
        let Some(change) = change else {
            return Ok(Vec::new());
        };
        if !self.config.focus.route_focus_events {
            return Ok(Vec::new());
        }
        self.route_focus_change(change)
    }

    fn route_focus_change(&self, change: FocusChange) -> Result<Vec<crate::routing::HandlerFailure>> {
        let builtins = self.routing.builtins();
        let mut failures = Vec::new();
        let steps = [
            (change.old, Arc::clone(&builtins.lost_focus)),
            (change.new, Arc::clone(&builtins.got_focus)),
        ];
        for (element, def) in steps {
            let Some(element) = element else { continue };
            if !self.tree.read().contains(element) {
                continue;
            }
            let outcome = self.route(&[def], element, EventPayload::Focus(change), None)?;
            failures.extend(outcome.failures);
        }
        Ok(failures)
    }

    /// Route `defs` in order over one shared handled flag
    fn route(
        &self,
        defs: &[Def],
        target: ElementId,
        payload: EventPayload,
        hit_path: Option<&[ElementId]>,
    ) -> Result<RouteOutcome> {
        let Some(first) = defs.first() else {
            return Ok(RouteOutcome::default());
        };
        let mut args = RoutedEventArgs::new(Arc::clone(first), target, payload);
        let mut total = RouteOutcome::default();

        for def in defs {
            args.retarget(Arc::clone(def));
            let route = {
                let tree = self.tree.read();
                self.router.build_route(&*tree, target, &args, hit_path)?
            };
            let outcome = self.router.dispatch(self.routing.handlers(), &route, &mut args);
            total.invoked += outcome.invoked;
            total.failures.extend(outcome.failures);
            total.vetoed |= outcome.vetoed;
            total.stopped |= outcome.stopped;
            total.route_len = total.route_len.max(outcome.route_len);
        }
        total.handled = args.handled;
        Ok(total)
    }
}

/// Whether the pointer move at `i` is followed by a move of the same pointer within `window`
fn superseded(batch: &[Queued], i: usize, window: Duration) -> bool {
    let current = &batch[i].event;
    if !current.is_pointer_move() {
        return false;
    }
    batch.get(i + 1).is_some_and(|next| {
        next.event.is_pointer_move()
            && next.event.pointer_key() == current.pointer_key()
            && next.event.timestamp().since(current.timestamp()) <= window
    })
}

impl ProcessedEvent {
    fn for_event(event: &InputEvent) -> Self {
        Self {
            event: event.clone(),
            dispatched: event.clone(),
            target: None,
            hit: None,
            handled: false,
            disposition: Disposition::NoTarget,
            duration: Duration::ZERO,
            exceeded_timeout: false,
            gestures: Vec::new(),
            handler_failures: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{KeyboardEvent, Key, Timestamp};
    use crate::routing::EventHandler;
    use blinc_core::geometry::Rect;
    use blinc_core::tree::ElementProps;

    struct Fixture {
        pipeline: InputPipeline<ElementTree>,
        root: ElementId,
        leaf: ElementId,
        log: Arc<Mutex<Vec<String>>>,
    }

    fn fixture(config: PipelineConfig) -> Fixture {
        let mut tree = ElementTree::new();
        let root = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 100.0, 100.0)));
        let leaf = tree
            .create_child(root, ElementProps::new(Rect::new(10.0, 10.0, 20.0, 20.0)))
            .unwrap();
        let tree = Arc::new(RwLock::new(tree));
        let pipeline = InputPipeline::for_element_tree(tree, config).unwrap();
        Fixture {
            pipeline,
            root,
            leaf,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn sync_config() -> PipelineConfig {
        PipelineConfig::default().with_async_processing(false)
    }

    fn record(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> EventHandler {
        let log = Arc::clone(log);
        let entry = entry.to_string();
        EventHandler::any(move |_ctx, _payload| {
            log.lock().push(entry.clone());
            Ok(())
        })
    }

    #[test]
    fn test_sync_pointer_down_preview_then_bubble() {
        let f = fixture(sync_config());
        let routing = f.pipeline.routing();
        let b = routing.builtins();
        routing.add_handler(f.root, &b.preview_pointer_down, record(&f.log, "root:preview")).unwrap();
        routing.add_handler(f.leaf, &b.preview_pointer_down, record(&f.log, "leaf:preview")).unwrap();
        routing.add_handler(f.leaf, &b.pointer_down, record(&f.log, "leaf:down")).unwrap();
        routing.add_handler(f.root, &b.pointer_down, record(&f.log, "root:down")).unwrap();

        f.pipeline.submit_event(PointerEvent::down(15.0, 15.0));

        assert_eq!(
            *f.log.lock(),
            vec!["root:preview", "leaf:preview", "leaf:down", "root:down"]
        );
        let stats = f.pipeline.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.queue_depth, 0);
    }

    #[test]
    fn test_preview_handled_suppresses_bubble() {
        let f = fixture(sync_config());
        let routing = f.pipeline.routing();
        let b = routing.builtins();
        routing
            .add_handler(
                f.root,
                &b.preview_pointer_down,
                EventHandler::pointer(|ctx, _| {
                    ctx.set_handled();
                    Ok(())
                }),
            )
            .unwrap();
        routing.add_handler(f.leaf, &b.pointer_down, record(&f.log, "leaf:down")).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.pipeline.subscribe(move |n| sink.lock().push(n.clone()));
        f.pipeline.submit_event(PointerEvent::down(15.0, 15.0));

        assert!(f.log.lock().is_empty());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            PipelineNotification::Processed(p) => {
                assert!(p.handled);
                assert_eq!(p.target, Some(f.leaf));
                assert_eq!(p.disposition, Disposition::Routed);
                assert_eq!(p.hit.as_ref().unwrap().path, vec![f.root, f.leaf]);
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[test]
    fn test_keyboard_routes_to_focus() {
        let f = fixture(sync_config());
        let routing = f.pipeline.routing();
        let b = routing.builtins();
        routing.add_handler(f.leaf, &b.got_focus, record(&f.log, "leaf:got")).unwrap();
        routing.add_handler(f.leaf, &b.key_down, record(&f.log, "leaf:key")).unwrap();
        routing.add_handler(f.root, &b.key_down, record(&f.log, "root:key")).unwrap();

        // No focus yet: key events have no target
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.pipeline.subscribe(move |n| {
            if let PipelineNotification::Processed(p) = n {
                sink.lock().push(p.disposition);
            }
        });
        f.pipeline.submit_event(KeyboardEvent::pressed(Key::Enter));

        // Pointer down focuses the leaf
        f.pipeline.submit_event(PointerEvent::down(15.0, 15.0));
        assert_eq!(f.pipeline.focused(), Some(f.leaf));

        f.pipeline.submit_event(KeyboardEvent::pressed(Key::Enter));
        assert_eq!(*f.log.lock(), vec!["leaf:got", "leaf:key", "root:key"]);
        assert_eq!(
            *seen.lock(),
            vec![Disposition::NoTarget, Disposition::Routed, Disposition::Routed]
        );
    }

    #[test]
    fn test_hover_enter_and_leave() {
        let f = fixture(sync_config());
        let routing = f.pipeline.routing();
        let b = routing.builtins();
        routing.add_handler(f.leaf, &b.pointer_enter, record(&f.log, "leaf:enter")).unwrap();
        routing.add_handler(f.leaf, &b.pointer_leave, record(&f.log, "leaf:leave")).unwrap();
        routing.add_handler(f.root, &b.pointer_enter, record(&f.log, "root:enter")).unwrap();

        f.pipeline.submit_event(PointerEvent::moved(50.0, 50.0));
        f.pipeline.submit_event(PointerEvent::moved(15.0, 15.0));
        f.pipeline.submit_event(PointerEvent::moved(16.0, 16.0));
        f.pipeline.submit_event(PointerEvent::moved(50.0, 50.0));

        assert_eq!(*f.log.lock(), vec!["root:enter", "leaf:enter", "leaf:leave"]);
        assert_eq!(f.pipeline.hovered((0, 0)), vec![f.root]);
    }

    #[test]
    fn test_capture_redirects_pointer() {
        let f = fixture(sync_config());
        let routing = f.pipeline.routing();
        let b = routing.builtins();
        routing.add_handler(f.leaf, &b.pointer_move, record(&f.log, "leaf:move")).unwrap();

        f.pipeline.capture_pointer((0, 0), f.leaf).unwrap();
        f.pipeline.submit_event(PointerEvent::moved(90.0, 90.0));
        f.pipeline.submit_event(PointerEvent::up(90.0, 90.0));
        assert_eq!(f.pipeline.captured((0, 0)), None);
        f.pipeline.submit_event(PointerEvent::moved(90.0, 90.0));

        assert_eq!(*f.log.lock(), vec!["leaf:move"]);
    }

    #[test]
    fn test_tap_gesture_routed_inline() {
        let f = fixture(sync_config());
        let routing = f.pipeline.routing();
        let b = routing.builtins();
        routing.add_handler(f.leaf, &b.gesture, record(&f.log, "leaf:gesture")).unwrap();
        routing.add_handler(f.leaf, &b.pointer_up, record(&f.log, "leaf:up")).unwrap();

        let gestures = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&gestures);
        f.pipeline.subscribe(move |n| {
            if let PipelineNotification::Processed(p) = n {
                *count.lock() += p.gestures.len();
            }
        });

        f.pipeline.submit_event(PointerEvent::down(15.0, 15.0).with_timestamp(Timestamp::from_millis(10)));
        f.pipeline.submit_event(PointerEvent::up(15.0, 15.0).with_timestamp(Timestamp::from_millis(50)));

        assert_eq!(*f.log.lock(), vec!["leaf:up", "leaf:gesture"]);
        assert_eq!(*gestures.lock(), 1);
        assert_eq!(f.pipeline.stats().processed, 2);
    }

    #[test]
    fn test_validation_failure_under_halt_is_error() {
        let f = fixture(sync_config().with_failure_policy(crate::config::FailurePolicy::Halt));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        f.pipeline.subscribe(move |n| {
            if let PipelineNotification::Error(e) = n {
                sink.lock().push(e.stage);
            }
        });

        f.pipeline.submit_event(PointerEvent::down(15.0, 15.0).with_timestamp(Timestamp::ZERO));
        assert_eq!(*errors.lock(), vec![PipelineStage::Processors]);
        assert_eq!(f.pipeline.stats().errors, 1);
    }

    #[test]
    fn test_panicking_handler_does_not_fail_event() {
        let f = fixture(sync_config());
        let routing = f.pipeline.routing();
        routing
            .add_handler(
                f.leaf,
                &routing.builtins().pointer_down,
                EventHandler::pointer(|_, _| panic!("handler bug")),
            )
            .unwrap();

        let failures = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&failures);
        f.pipeline.subscribe(move |n| {
            if let PipelineNotification::Processed(p) = n {
                *sink.lock() += p.handler_failures.len();
            }
        });
        f.pipeline.submit_event(PointerEvent::down(15.0, 15.0));

        assert_eq!(*failures.lock(), 1);
        assert_eq!(f.pipeline.stats().errors, 0);
    }

    #[test]
    fn test_coalescing_keeps_latest_move() {
        let f = fixture(sync_config().with_coalescing_window(Duration::from_millis(8)));
        let routing = f.pipeline.routing();
        routing
            .add_handler(f.root, &routing.builtins().pointer_move, record(&f.log, "move"))
            .unwrap();

        f.pipeline.submit_events([
            PointerEvent::moved(50.0, 50.0).with_timestamp(Timestamp::from_millis(1)),
            PointerEvent::moved(51.0, 50.0).with_timestamp(Timestamp::from_millis(2)),
            PointerEvent::moved(52.0, 50.0).with_timestamp(Timestamp::from_millis(3)),
            PointerEvent::moved(53.0, 50.0).with_timestamp(Timestamp::from_millis(40)),
        ]);

        assert_eq!(f.log.lock().len(), 2);
        let stats = f.pipeline.stats();
        assert_eq!(stats.coalesced, 2);
        assert_eq!(stats.processed, 4);
    }

    #[test]
    fn test_layout_change_reaches_hit_test() {
        let f = fixture(sync_config());
        assert_eq!(f.pipeline.hit_test(Point::new(15.0, 15.0)).element, Some(f.leaf));

        f.pipeline
            .tree()
            .write()
            .update(f.leaf, |p| p.local_bounds = Rect::new(60.0, 60.0, 20.0, 20.0))
            .unwrap();

        assert_eq!(f.pipeline.hit_test(Point::new(15.0, 15.0)).element, Some(f.root));
        assert_eq!(f.pipeline.hit_test(Point::new(65.0, 65.0)).element, Some(f.leaf));
    }

    /// root -> {a -> leaf, b}, with b to the right of a
    fn split_scene() -> (InputPipeline<ElementTree>, [ElementId; 4]) {
        let mut tree = ElementTree::new();
        let root = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 400.0, 400.0)));
        let a = tree
            .create_child(root, ElementProps::new(Rect::new(0.0, 0.0, 200.0, 200.0)))
            .unwrap();
        let b = tree
            .create_child(root, ElementProps::new(Rect::new(0.0, 0.0, 200.0, 200.0)).at(200.0, 0.0))
            .unwrap();
        let leaf = tree
            .create_child(a, ElementProps::new(Rect::new(0.0, 0.0, 50.0, 50.0)).at(50.0, 50.0))
            .unwrap();
        let pipeline = InputPipeline::for_element_tree(Arc::new(RwLock::new(tree)), sync_config()).unwrap();
        (pipeline, [root, a, b, leaf])
    }

    fn reparent(pipeline: &InputPipeline<ElementTree>, element: ElementId, parent: ElementId) {
        let mut tree = pipeline.tree().write();
        tree.detach(element).unwrap();
        tree.append_child(parent, element).unwrap();
        assert_eq!(tree.parent(element), Some(parent));
    }

    #[test]
    fn test_keyboard_follows_reparented_focus() {
        let (pipeline, [_, a, b, leaf]) = split_scene();
        let log = Arc::new(Mutex::new(Vec::new()));
        let routing = pipeline.routing();
        let key_down = &routing.builtins().key_down;
        routing.add_handler(a, key_down, record(&log, "a")).unwrap();
        routing.add_handler(b, key_down, record(&log, "b")).unwrap();

        pipeline.set_focus(Some(leaf)).unwrap();
        pipeline.submit_event(KeyboardEvent::pressed(Key::Enter));
        reparent(&pipeline, leaf, b);
        pipeline.submit_event(KeyboardEvent::pressed(Key::Enter));

        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_pointer_follows_reparented_element() {
        let (pipeline, [root, a, b, leaf]) = split_scene();
        let log = Arc::new(Mutex::new(Vec::new()));
        let routing = pipeline.routing();
        let pointer_down = &routing.builtins().pointer_down;
        routing.add_handler(a, pointer_down, record(&log, "a")).unwrap();
        routing.add_handler(b, pointer_down, record(&log, "b")).unwrap();

        pipeline.submit_event(PointerEvent::down(75.0, 75.0));
        reparent(&pipeline, leaf, b);

        // The leaf now sits under b's translation
        let hit = pipeline.hit_test(Point::new(275.0, 75.0));
        assert_eq!(hit.element, Some(leaf));
        assert_eq!(hit.path, vec![root, b, leaf]);
        assert_eq!(pipeline.hit_test(Point::new(75.0, 75.0)).element, Some(a));

        pipeline.submit_event(PointerEvent::down(275.0, 75.0));
        pipeline.submit_event(PointerEvent::down(75.0, 75.0));
        assert_eq!(*log.lock(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_start_requires_runtime() {
        let f = fixture(PipelineConfig::default());
        assert!(matches!(f.pipeline.start(), Err(InputError::NoRuntime(_))));
    }
}

//! Input pipeline configuration presets.
//!
//! All sections deserialize with defaults for missing fields, so a TOML file
//! only needs to name what it changes:
//!
//! ```rust
//! use blinc_input::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_toml_str(
//!     r#"
//!     queue_capacity = 64
//!     processing_interval_ms = 0
//!
//!     [hit_test]
//!     bounding_box_only = true
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.queue_capacity, 64);
//! assert!(config.hit_test.bounding_box_only);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InputError, Result};

/// Serde helper storing a `Duration` as integer milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// How verbose pipeline logging is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogVerbosity {
    /// Matching tracing level, `None` for [`LogVerbosity::Off`]
    pub fn level(self) -> Option<tracing::Level> {
        match self {
            LogVerbosity::Off => None,
            LogVerbosity::Error => Some(tracing::Level::ERROR),
            LogVerbosity::Warn => Some(tracing::Level::WARN),
            LogVerbosity::Info => Some(tracing::Level::INFO),
            LogVerbosity::Debug => Some(tracing::Level::DEBUG),
            LogVerbosity::Trace => Some(tracing::Level::TRACE),
        }
    }

    /// Whether messages at `level` should be emitted
    pub fn allows(self, level: tracing::Level) -> bool {
        // tracing orders levels by verbosity: TRACE > DEBUG > ... > ERROR
        self.level().is_some_and(|max| level <= max)
    }
}

/// What the processor chain does when a processor fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure and run the remaining processors
    #[default]
    Continue,
    /// Fail the event at the first processor failure
    Halt,
}

/// Gesture recognition settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Offer pointer events to gesture recognizers
    pub enabled: bool,
    /// Skip hit testing and routing of the pointer event once a gesture is recognized
    pub stop_after_gesture: bool,
    /// Maximum pointer travel between down and up for a tap
    pub tap_max_distance: f32,
    /// Maximum time between down and up for a tap (ms).
    #[serde(rename = "tap_max_duration_ms", with = "duration_ms")]
    pub tap_max_duration: Duration,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stop_after_gesture: false,
            tap_max_distance: 8.0,
            tap_max_duration: Duration::from_millis(300),
        }
    }
}

/// Pointer capture settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Route captured pointers to the capturing element
    pub enabled: bool,
    /// Release the capture when the captured pointer goes up
    pub release_on_pointer_up: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            release_on_pointer_up: true,
        }
    }
}

/// Keyboard focus settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Move focus to the hit element on pointer down
    pub focus_on_pointer_down: bool,
    /// Route GotFocus/LostFocus when focus changes
    pub route_focus_events: bool,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            focus_on_pointer_down: true,
            route_focus_events: true,
        }
    }
}

/// Hit testing settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitTestConfig {
    /// Query a quadtree instead of scanning every element
    pub use_spatial_index: bool,
    /// Elements at or below this effective opacity are not hit
    pub opacity_threshold: f32,
    /// Disabled elements can still be hit
    pub include_disabled: bool,
    /// Accept any point inside the global bounds, skipping local shape tests
    pub bounding_box_only: bool,
    /// Tree depth below which the walk stops descending
    pub max_depth: usize,
    /// Quadtree node capacity before splitting
    pub max_elements_per_node: usize,
    /// Quadtree split depth limit
    pub max_quadtree_depth: usize,
}

impl Default for HitTestConfig {
    fn default() -> Self {
        Self {
            use_spatial_index: true,
            opacity_threshold: 0.001,
            include_disabled: false,
            bounding_box_only: false,
            max_depth: 256,
            max_elements_per_node: crate::spatial::DEFAULT_MAX_ELEMENTS_PER_NODE,
            max_quadtree_depth: crate::spatial::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Configuration for an input pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Queue depth above which submission logs a warning (events are never dropped).
    pub queue_capacity: usize,
    /// Sleep between polls of an empty queue (ms). Zero waits for the next event.
    #[serde(rename = "processing_interval_ms", with = "duration_ms")]
    pub processing_interval: Duration,
    /// Process on a background task. When off, submission processes inline.
    pub async_processing: bool,
    /// Per-event processing budget (ms). Zero disables the check.
    #[serde(rename = "event_timeout_ms", with = "duration_ms")]
    pub event_timeout: Duration,
    /// Events dequeued per wake before checking for cancellation.
    pub batch_size: usize,
    /// Pointer moves from one pointer within this window are merged (ms). Zero disables.
    #[serde(rename = "coalescing_window_ms", with = "duration_ms")]
    pub coalescing_window: Duration,
    /// Extra attempts for a processor that returns an error.
    pub max_retries: u32,
    /// Processor chain behavior on failure.
    pub failure_policy: FailurePolicy,
    /// Bounded wait for the background loop on shutdown (ms).
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// Route cache capacity (entries).
    pub route_cache_capacity: usize,
    /// Route cache entry lifetime (ms).
    #[serde(rename = "route_cache_ttl_ms", with = "duration_ms")]
    pub route_cache_ttl: Duration,
    /// Pipeline logging verbosity.
    pub log_verbosity: LogVerbosity,
    pub gesture: GestureConfig,
    pub capture: CaptureConfig,
    pub focus: FocusConfig,
    pub hit_test: HitTestConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl PipelineConfig {
    /// Standard configuration for general use.
    pub fn standard() -> Self {
        Self {
            queue_capacity: 1_024,
            processing_interval: Duration::from_millis(1),
            async_processing: true,
            event_timeout: Duration::from_millis(100),
            batch_size: 32,
            coalescing_window: Duration::ZERO,
            max_retries: 0,
            failure_policy: FailurePolicy::Continue,
            shutdown_timeout: Duration::from_secs(5),
            route_cache_capacity: 256,
            route_cache_ttl: Duration::from_secs(600),
            log_verbosity: LogVerbosity::Warn,
            gesture: GestureConfig::default(),
            capture: CaptureConfig::default(),
            focus: FocusConfig::default(),
            hit_test: HitTestConfig::default(),
        }
    }

    /// Throughput over precision: large queue, no polling sleep, coarse hit tests.
    pub fn high_performance() -> Self {
        Self {
            queue_capacity: 16_384,
            processing_interval: Duration::ZERO,
            batch_size: 256,
            coalescing_window: Duration::from_millis(8),
            route_cache_capacity: 4_096,
            log_verbosity: LogVerbosity::Error,
            hit_test: HitTestConfig {
                bounding_box_only: true,
                ..HitTestConfig::default()
            },
            ..Self::standard()
        }
    }

    /// Each event handled as soon as it is submitted.
    pub fn low_latency() -> Self {
        Self {
            queue_capacity: 128,
            processing_interval: Duration::ZERO,
            async_processing: false,
            batch_size: 1,
            coalescing_window: Duration::ZERO,
            event_timeout: Duration::from_millis(16), // one frame at 60fps
            ..Self::standard()
        }
    }

    /// Small queue, verbose logging, one retry.
    pub fn debug() -> Self {
        Self {
            queue_capacity: 256,
            max_retries: 1,
            log_verbosity: LogVerbosity::Debug,
            ..Self::standard()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_processing_interval(mut self, interval: Duration) -> Self {
        self.processing_interval = interval;
        self
    }

    pub fn with_async_processing(mut self, enabled: bool) -> Self {
        self.async_processing = enabled;
        self
    }

    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_coalescing_window(mut self, window: Duration) -> Self {
        self.coalescing_window = window;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_log_verbosity(mut self, verbosity: LogVerbosity) -> Self {
        self.log_verbosity = verbosity;
        self
    }

    pub fn with_gesture(mut self, gesture: GestureConfig) -> Self {
        self.gesture = gesture;
        self
    }

    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_focus(mut self, focus: FocusConfig) -> Self {
        self.focus = focus;
        self
    }

    pub fn with_hit_test(mut self, hit_test: HitTestConfig) -> Self {
        self.hit_test = hit_test;
        self
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(InputError::InvalidConfig(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(InputError::InvalidConfig(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.route_cache_capacity == 0 {
            return Err(InputError::InvalidConfig(
                "route_cache_capacity must be greater than zero".into(),
            ));
        }
        let hit = &self.hit_test;
        if hit.max_elements_per_node == 0 {
            return Err(InputError::InvalidConfig(
                "hit_test.max_elements_per_node must be greater than zero".into(),
            ));
        }
        if hit.max_depth == 0 {
            return Err(InputError::InvalidConfig(
                "hit_test.max_depth must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&hit.opacity_threshold) {
            return Err(InputError::InvalidConfig(format!(
                "hit_test.opacity_threshold must be in [0, 1), got {}",
                hit.opacity_threshold
            )));
        }
        if !self.gesture.tap_max_distance.is_finite() || self.gesture.tap_max_distance < 0.0 {
            return Err(InputError::InvalidConfig(format!(
                "gesture.tap_max_distance must be a non-negative number, got {}",
                self.gesture.tap_max_distance
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(source).map_err(|e| InputError::ConfigFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| InputError::ConfigFormat(e.to_string()))
    }
}

//! Gesture recognition seam
//!
//! Pointer events are offered to every registered [`GestureRecognizer`]
//! before hit testing. A recognized gesture is hit-tested at its focal point
//! and routed as a Gesture event within the same pipeline step.

use std::time::Duration;

use blinc_core::geometry::Point;
use rustc_hash::FxHashMap;

use crate::config::GestureConfig;
use crate::event::{GestureEvent, GestureKind, GestureState, PointerEvent, PointerEventKind, Timestamp};
use crate::pointer::PointerKey;

/// Turns pointer sequences into gestures
pub trait GestureRecognizer: Send {
    fn name(&self) -> &str;

    /// Offer a pointer event; return a gesture if one was recognized
    fn on_pointer(&mut self, event: &PointerEvent) -> Option<GestureEvent>;

    /// Drop any in-progress recognition
    fn reset(&mut self) {}
}

/// Recognizes a press and release close together in space and time
#[derive(Debug)]
pub struct TapRecognizer {
    max_distance: f32,
    max_duration: Duration,
    pending: FxHashMap<PointerKey, (Point, Timestamp)>,
}

impl TapRecognizer {
    pub fn new(max_distance: f32, max_duration: Duration) -> Self {
        Self {
            max_distance,
            max_duration,
            pending: FxHashMap::default(),
        }
    }

    pub fn from_config(config: &GestureConfig) -> Self {
        Self::new(config.tap_max_distance, config.tap_max_duration)
    }
}

impl Default for TapRecognizer {
    fn default() -> Self {
        Self::from_config(&GestureConfig::default())
    }
}

fn key_of(event: &PointerEvent) -> PointerKey {
    (event.device.as_ref().map_or(0, |d| d.id), event.pointer_id)
}

impl GestureRecognizer for TapRecognizer {
    fn name(&self) -> &str {
        "tap"
    }

    fn on_pointer(&mut self, event: &PointerEvent) -> Option<GestureEvent> {
        let key = key_of(event);
        match event.kind {
            PointerEventKind::Down => {
                self.pending.insert(key, (event.position, event.timestamp));
                None
            }
            PointerEventKind::Move => {
                if let Some((start, _)) = self.pending.get(&key) {
                    if start.distance(event.position) > self.max_distance {
                        self.pending.remove(&key);
                    }
                }
                None
            }
            PointerEventKind::Up => {
                let (start, at) = self.pending.remove(&key)?;
                let moved = start.distance(event.position);
                let held = event.timestamp.since(at);
                if moved > self.max_distance || held > self.max_duration {
                    return None;
                }
                Some(
                    GestureEvent::new(GestureKind::Tap, GestureState::Ended, event.position)
                        .with_timestamp(event.timestamp)
                        .with_device(event.device.clone()),
                )
            }
            PointerEventKind::Cancel => {
                self.pending.remove(&key);
                None
            }
            PointerEventKind::Wheel { .. } => None,
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(event: PointerEvent, millis: u64) -> PointerEvent {
        event.with_timestamp(Timestamp::from_millis(millis))
    }

    #[test]
    fn test_quick_press_is_tap() {
        let mut tap = TapRecognizer::new(8.0, Duration::from_millis(300));
        assert!(tap.on_pointer(&at(PointerEvent::down(10.0, 10.0), 1)).is_none());
        let gesture = tap.on_pointer(&at(PointerEvent::up(12.0, 11.0), 100)).unwrap();
        assert_eq!(gesture.kind, GestureKind::Tap);
        assert_eq!(gesture.position, Point::new(12.0, 11.0));
        assert_eq!(gesture.timestamp, Timestamp::from_millis(100));
    }

    #[test]
    fn test_slow_or_far_press_is_not_tap() {
        let mut tap = TapRecognizer::new(8.0, Duration::from_millis(300));
        tap.on_pointer(&at(PointerEvent::down(10.0, 10.0), 1));
        assert!(tap.on_pointer(&at(PointerEvent::up(10.0, 10.0), 900)).is_none());

        tap.on_pointer(&at(PointerEvent::down(10.0, 10.0), 1000));
        tap.on_pointer(&at(PointerEvent::moved(50.0, 10.0), 1010));
        assert!(tap.on_pointer(&at(PointerEvent::up(10.0, 10.0), 1020)).is_none());
    }

    #[test]
    fn test_up_without_down_is_ignored() {
        let mut tap = TapRecognizer::default();
        assert!(tap.on_pointer(&PointerEvent::up(0.0, 0.0)).is_none());
    }
}

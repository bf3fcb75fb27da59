//! Normalized input events
//!
//! Platform input providers convert their raw signals into [`InputEvent`]
//! values before submitting them to the pipeline. Events are immutable
//! values: stages that change an event (for example a coordinate transform)
//! produce a new instance with [`InputEvent::with_position`].

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use blinc_core::geometry::Point;
use serde::{Deserialize, Serialize};

// ============================================================================
// Timestamps and devices
// ============================================================================

/// Process start, the epoch for [`Timestamp::now`]
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Event time in microseconds
///
/// Zero is reserved as "unset" and is rejected by validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1000)
    }

    /// Monotonic time since the first call in this process (never zero)
    pub fn now() -> Self {
        let epoch = *EPOCH.get_or_init(Instant::now);
        Self(epoch.elapsed().as_micros() as u64 + 1)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Kind of input device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Mouse,
    Touch,
    Pen,
    Touchpad,
    Keyboard,
    /// Synthesized input (automation, replays)
    Virtual,
}

/// Originating device of an event
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// Platform device id
    pub id: u32,
    pub kind: DeviceKind,
    /// Human-readable device name, if the platform reports one
    pub name: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(id: u32, kind: DeviceKind) -> Self {
        Self {
            id,
            kind,
            name: None,
        }
    }

    pub fn mouse() -> Self {
        Self::new(0, DeviceKind::Mouse)
    }

    pub fn keyboard() -> Self {
        Self::new(0, DeviceKind::Keyboard)
    }

    pub fn touch(id: u32) -> Self {
        Self::new(id, DeviceKind::Touch)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ============================================================================
// Modifiers, buttons, keys
// ============================================================================

/// Modifier key state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    /// Command on macOS, Windows key on Windows
    pub meta: bool,
}

impl Modifiers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn any(&self) -> bool {
        self.shift || self.ctrl || self.alt || self.meta
    }
}

/// Pointer buttons
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Other(u16),
}

impl MouseButton {
    fn bit(self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Right => 1 << 1,
            MouseButton::Middle => 1 << 2,
            MouseButton::Back => 1 << 3,
            MouseButton::Forward => 1 << 4,
            MouseButton::Other(_) => 1 << 5,
        }
    }
}

/// Set of currently pressed pointer buttons
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ButtonSet(u8);

impl ButtonSet {
    pub const EMPTY: ButtonSet = ButtonSet(0);

    pub fn with(mut self, button: MouseButton) -> Self {
        self.0 |= button.bit();
        self
    }

    pub fn contains(&self, button: MouseButton) -> bool {
        self.0 & button.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Key press/release state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyState {
    Pressed,
    Released,
}

/// Logical keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Printable character key
    Char(char),
    Enter,
    Escape,
    Tab,
    Backspace,
    Delete,
    Insert,
    Space,
    Home,
    End,
    PageUp,
    PageDown,
    Left,
    Right,
    Up,
    Down,
    Shift,
    Ctrl,
    Alt,
    Meta,
    /// Function key F1..F24
    F(u8),
    /// Unmapped key with its platform scan code
    Unknown(u32),
}

// ============================================================================
// Event payloads
// ============================================================================

/// What happened to the pointer
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEventKind {
    Down,
    Up,
    Move,
    Wheel { delta_x: f32, delta_y: f32 },
    /// The platform cancelled the pointer (e.g. a system gesture took over)
    Cancel,
}

/// Pointer (mouse, touch, pen) event
#[derive(Clone, Debug, PartialEq)]
pub struct PointerEvent {
    pub timestamp: Timestamp,
    pub device: Option<DeviceDescriptor>,
    /// Distinguishes simultaneous touches on one device
    pub pointer_id: u64,
    pub kind: PointerEventKind,
    /// Position in window coordinates
    pub position: Point,
    /// Button that changed state (Down/Up only)
    pub button: Option<MouseButton>,
    /// Buttons held after this event
    pub buttons: ButtonSet,
    pub modifiers: Modifiers,
    /// Pressure in 0.0..=1.0 (1.0 for devices without pressure)
    pub pressure: f32,
}

impl PointerEvent {
    /// A mouse event at `position`, timestamped now
    pub fn new(kind: PointerEventKind, position: Point) -> Self {
        Self {
            timestamp: Timestamp::now(),
            device: Some(DeviceDescriptor::mouse()),
            pointer_id: 0,
            kind,
            position,
            button: None,
            buttons: ButtonSet::EMPTY,
            modifiers: Modifiers::none(),
            pressure: 1.0,
        }
    }

    pub fn down(x: f32, y: f32) -> Self {
        let mut event = Self::new(PointerEventKind::Down, Point::new(x, y));
        event.button = Some(MouseButton::Left);
        event.buttons = ButtonSet::EMPTY.with(MouseButton::Left);
        event
    }

    pub fn up(x: f32, y: f32) -> Self {
        let mut event = Self::new(PointerEventKind::Up, Point::new(x, y));
        event.button = Some(MouseButton::Left);
        event
    }

    pub fn moved(x: f32, y: f32) -> Self {
        Self::new(PointerEventKind::Move, Point::new(x, y))
    }

    pub fn wheel(x: f32, y: f32, delta_x: f32, delta_y: f32) -> Self {
        Self::new(PointerEventKind::Wheel { delta_x, delta_y }, Point::new(x, y))
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_device(mut self, device: Option<DeviceDescriptor>) -> Self {
        self.device = device;
        self
    }

    pub fn with_pointer_id(mut self, pointer_id: u64) -> Self {
        self.pointer_id = pointer_id;
        self
    }

    pub fn with_button(mut self, button: MouseButton) -> Self {
        self.button = Some(button);
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Key press or release
#[derive(Clone, Debug, PartialEq)]
pub struct KeyboardEvent {
    pub timestamp: Timestamp,
    pub device: Option<DeviceDescriptor>,
    pub key: Key,
    pub state: KeyState,
    pub modifiers: Modifiers,
    /// Auto-repeat while held
    pub repeat: bool,
}

impl KeyboardEvent {
    pub fn new(key: Key, state: KeyState) -> Self {
        Self {
            timestamp: Timestamp::now(),
            device: Some(DeviceDescriptor::keyboard()),
            key,
            state,
            modifiers: Modifiers::none(),
            repeat: false,
        }
    }

    pub fn pressed(key: Key) -> Self {
        Self::new(key, KeyState::Pressed)
    }

    pub fn released(key: Key) -> Self {
        Self::new(key, KeyState::Released)
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_device(mut self, device: Option<DeviceDescriptor>) -> Self {
        self.device = device;
        self
    }
}

/// Committed text
#[derive(Clone, Debug, PartialEq)]
pub struct TextInputEvent {
    pub timestamp: Timestamp,
    pub device: Option<DeviceDescriptor>,
    pub text: String,
}

impl TextInputEvent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            timestamp: Timestamp::now(),
            device: Some(DeviceDescriptor::keyboard()),
            text: text.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Recognized gesture type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GestureKind {
    Tap,
    DoubleTap,
    LongPress,
    Pan,
    Pinch,
    Rotate,
}

/// Gesture lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GestureState {
    Began,
    Changed,
    Ended,
    Cancelled,
}

/// Gesture event
#[derive(Clone, Debug, PartialEq)]
pub struct GestureEvent {
    pub timestamp: Timestamp,
    pub device: Option<DeviceDescriptor>,
    pub kind: GestureKind,
    pub state: GestureState,
    /// Gesture focal point in window coordinates
    pub position: Point,
    /// Accumulated translation (pan)
    pub translation: Point,
    /// Accumulated scale factor (pinch)
    pub scale: f32,
    /// Accumulated rotation in radians (rotate)
    pub rotation: f32,
}

impl GestureEvent {
    pub fn new(kind: GestureKind, state: GestureState, position: Point) -> Self {
        Self {
            timestamp: Timestamp::now(),
            device: Some(DeviceDescriptor::touch(0)),
            kind,
            state,
            position,
            translation: Point::ZERO,
            scale: 1.0,
            rotation: 0.0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_device(mut self, device: Option<DeviceDescriptor>) -> Self {
        self.device = device;
        self
    }
}

// ============================================================================
// InputEvent
// ============================================================================

/// Discriminant of [`InputEvent`], used by filters and logging
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputEventKind {
    Pointer,
    Keyboard,
    TextInput,
    Gesture,
}

/// Normalized input event
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Pointer(PointerEvent),
    Keyboard(KeyboardEvent),
    TextInput(TextInputEvent),
    Gesture(GestureEvent),
}

impl InputEvent {
    pub fn kind(&self) -> InputEventKind {
        match self {
            InputEvent::Pointer(_) => InputEventKind::Pointer,
            InputEvent::Keyboard(_) => InputEventKind::Keyboard,
            InputEvent::TextInput(_) => InputEventKind::TextInput,
            InputEvent::Gesture(_) => InputEventKind::Gesture,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            InputEvent::Pointer(e) => e.timestamp,
            InputEvent::Keyboard(e) => e.timestamp,
            InputEvent::TextInput(e) => e.timestamp,
            InputEvent::Gesture(e) => e.timestamp,
        }
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        match self {
            InputEvent::Pointer(e) => e.device.as_ref(),
            InputEvent::Keyboard(e) => e.device.as_ref(),
            InputEvent::TextInput(e) => e.device.as_ref(),
            InputEvent::Gesture(e) => e.device.as_ref(),
        }
    }

    /// Window position for pointer and gesture events
    pub fn position(&self) -> Option<Point> {
        match self {
            InputEvent::Pointer(e) => Some(e.position),
            InputEvent::Gesture(e) => Some(e.position),
            InputEvent::Keyboard(_) | InputEvent::TextInput(_) => None,
        }
    }

    /// A copy of this event moved to `position`
    ///
    /// Events without a position are returned unchanged.
    pub fn with_position(&self, position: Point) -> InputEvent {
        match self {
            InputEvent::Pointer(e) => InputEvent::Pointer(PointerEvent {
                position,
                ..e.clone()
            }),
            InputEvent::Gesture(e) => InputEvent::Gesture(GestureEvent {
                position,
                ..e.clone()
            }),
            other => other.clone(),
        }
    }

    /// Pointer moves are the only events eligible for coalescing
    pub fn is_pointer_move(&self) -> bool {
        matches!(
            self,
            InputEvent::Pointer(PointerEvent {
                kind: PointerEventKind::Move,
                ..
            })
        )
    }

    /// Key used to group events from the same pointer
    pub fn pointer_key(&self) -> Option<(u32, u64)> {
        match self {
            InputEvent::Pointer(e) => Some((e.device.as_ref().map_or(0, |d| d.id), e.pointer_id)),
            _ => None,
        }
    }
}

impl From<PointerEvent> for InputEvent {
    fn from(event: PointerEvent) -> Self {
        InputEvent::Pointer(event)
    }
}

impl From<KeyboardEvent> for InputEvent {
    fn from(event: KeyboardEvent) -> Self {
        InputEvent::Keyboard(event)
    }
}

impl From<TextInputEvent> for InputEvent {
    fn from(event: TextInputEvent) -> Self {
        InputEvent::TextInput(event)
    }
}

impl From<GestureEvent> for InputEvent {
    fn from(event: GestureEvent) -> Self {
        InputEvent::Gesture(event)
    }
}

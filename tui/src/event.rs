use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// A decoded keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Printable input; the text lives in `KeyEvent::runes`.
    Runes,
    /// A control byte without a dedicated name, e.g. `Ctrl('c')` for 0x03.
    Ctrl(char),
    Enter,
    Tab,
    BackTab,
    Backspace,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    /// Text for `Key::Runes`; empty otherwise. A bracketed paste arrives as
    /// one event carrying the whole buffer.
    pub runes: String,
    pub alt: bool,
    pub shift: bool,
    pub ctrl: bool,
    pub paste: bool,
}

impl KeyEvent {
    pub fn key(key: Key) -> Self {
        Self {
            key,
            runes: String::new(),
            alt: false,
            shift: false,
            ctrl: false,
            paste: false,
        }
    }

    pub fn runes(text: impl Into<String>) -> Self {
        Self {
            key: Key::Runes,
            runes: text.into(),
            alt: false,
            shift: false,
            ctrl: false,
            paste: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Press,
    Release,
    Motion,
}

/// A decoded mouse report (X10 or SGR encoding), zero-based coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub x: u16,
    pub y: u16,
    pub button: MouseButton,
    pub action: MouseAction,
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub width: u16,
    pub height: u16,
}

/// Handed to the model with `SigInt`/`SigTerm`. Calling `cancel` vetoes the
/// teardown that would otherwise follow the update.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    canceled: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Everything `Model::update` can receive. `User` wraps messages the model
/// or its workers sent through the runtime handle.
#[derive(Debug, Clone)]
pub enum Event<M> {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(ResizeEvent),
    SigInt(StopSignal),
    SigTerm(StopSignal),
    /// Delivered after a resume-from-suspend, strictly after the terminal
    /// has been re-entered.
    SigResume,
    User(M),
}

//! Byte-level terminal input decoder: printable UTF-8, control bytes, CSI
//! sequences, SS3 function keys, bracketed paste, and X10/SGR mouse
//! reports. The decoder is a pure state machine so it can be fed arbitrary
//! byte chunks; escape disambiguation (lone ESC vs. sequence introducer) is
//! driven by the reader's poll interval via [`Decoder::pump_escape`].

use crate::event::Key;
use crate::event::KeyEvent;
use crate::event::MouseAction;
use crate::event::MouseButton;
use crate::event::MouseEvent;

#[derive(Debug, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
}

#[derive(Debug)]
enum State {
    Ground,
    /// Got ESC; the next byte decides between a sequence and Alt+key.
    Esc,
    /// Collecting CSI parameter/intermediate bytes.
    Csi(Vec<u8>),
    /// Got `ESC O`.
    Ss3,
    /// X10 mouse report: exactly three payload bytes follow `CSI M`.
    X10(Vec<u8>),
    /// Mid-UTF-8 sequence.
    Utf8 { need: usize, buf: Vec<u8>, alt: bool },
}

#[derive(Debug)]
pub struct Decoder {
    state: State,
    /// Accumulates printable input so one read produces one Runes event.
    pending_runes: String,
    /// `Some` while inside a bracketed paste.
    paste: Option<String>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            pending_runes: String::new(),
            paste: None,
        }
    }

    /// Feeds raw bytes and returns the completed events, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<InputEvent> {
        let mut out = Vec::new();
        for &byte in bytes {
            self.step(byte, &mut out);
        }
        self.flush_runes(&mut out);
        out
    }

    /// Resolves a pending lone ESC to the Escape key. The reader calls this
    /// when its poll interval elapses with no continuation bytes.
    pub fn pump_escape(&mut self) -> Option<InputEvent> {
        if matches!(self.state, State::Esc) {
            self.state = State::Ground;
            if self.paste.is_some() {
                // Escapes are stripped from pastes.
                return None;
            }
            return Some(InputEvent::Key(KeyEvent::key(Key::Escape)));
        }
        None
    }

    fn step(&mut self, byte: u8, out: &mut Vec<InputEvent>) {
        match std::mem::replace(&mut self.state, State::Ground) {
            State::Ground => self.ground(byte, false, out),
            State::Esc => match byte {
                b'[' => {
                    self.flush_runes(out);
                    self.state = State::Csi(Vec::new());
                }
                b'O' => {
                    self.flush_runes(out);
                    self.state = State::Ss3;
                }
                0x1b => {
                    self.emit(KeyEvent::key(Key::Escape), out);
                    self.state = State::Esc;
                }
                _ => self.ground(byte, true, out),
            },
            State::Csi(mut buf) => match byte {
                // A bare `CSI M` introduces an X10 mouse report.
                b'M' if buf.is_empty() => self.state = State::X10(Vec::new()),
                0x40..=0x7e => self.finish_csi(&buf, byte, out),
                0x20..=0x3f => {
                    buf.push(byte);
                    self.state = State::Csi(buf);
                }
                _ => {
                    // Malformed sequence; drop it and reprocess the byte.
                    self.ground(byte, false, out);
                }
            },
            State::Ss3 => {
                let key = match byte {
                    b'A' => Some(Key::Up),
                    b'B' => Some(Key::Down),
                    b'C' => Some(Key::Right),
                    b'D' => Some(Key::Left),
                    b'H' => Some(Key::Home),
                    b'F' => Some(Key::End),
                    b'P' => Some(Key::F(1)),
                    b'Q' => Some(Key::F(2)),
                    b'R' => Some(Key::F(3)),
                    b'S' => Some(Key::F(4)),
                    _ => None,
                };
                if let Some(key) = key {
                    self.emit(KeyEvent::key(key), out);
                }
            }
            State::X10(mut buf) => {
                buf.push(byte);
                if buf.len() == 3 {
                    if let Some(mouse) = decode_x10(&buf) {
                        out.push(InputEvent::Mouse(mouse));
                    }
                } else {
                    self.state = State::X10(buf);
                }
            }
            State::Utf8 { need, mut buf, alt } => {
                if byte & 0xc0 == 0x80 {
                    buf.push(byte);
                    if buf.len() == need {
                        if let Ok(s) = std::str::from_utf8(&buf) {
                            let text: String = s.to_string();
                            if alt {
                                let mut event = KeyEvent::runes(text);
                                event.alt = true;
                                self.emit(event, out);
                            } else {
                                self.push_runes(&text);
                            }
                        }
                    } else {
                        self.state = State::Utf8 { need, buf, alt };
                    }
                } else {
                    // Broken sequence; reprocess the byte from ground.
                    self.ground(byte, false, out);
                }
            }
        }
    }

    fn ground(&mut self, byte: u8, alt: bool, out: &mut Vec<InputEvent>) {
        match byte {
            0x1b => {
                self.flush_runes(out);
                self.state = State::Esc;
            }
            0x00..=0x1f | 0x7f => {
                let mut event = KeyEvent::key(control_key(byte));
                event.alt = alt;
                self.emit(event, out);
            }
            0x20..=0x7e => {
                let c = byte as char;
                if alt {
                    let mut event = KeyEvent::runes(c.to_string());
                    event.alt = true;
                    self.emit(event, out);
                } else {
                    self.push_runes(&c.to_string());
                }
            }
            _ => {
                let need = utf8_len(byte);
                if need > 1 {
                    self.state = State::Utf8 {
                        need,
                        buf: vec![byte],
                        alt,
                    };
                }
                // Stray continuation bytes are dropped.
            }
        }
    }

    fn finish_csi(&mut self, buf: &[u8], final_byte: u8, out: &mut Vec<InputEvent>) {
        if buf.first() == Some(&b'<') {
            if let Some(mouse) = decode_sgr(&buf[1..], final_byte) {
                out.push(InputEvent::Mouse(mouse));
            }
            return;
        }

        let params: Vec<u16> = std::str::from_utf8(buf)
            .unwrap_or("")
            .split(';')
            .filter_map(|p| p.parse().ok())
            .collect();
        let modifier = params.get(1).copied().unwrap_or(1).saturating_sub(1);
        let shift = modifier & 1 != 0;
        let alt = modifier & 2 != 0;
        let ctrl = modifier & 4 != 0;

        let key = match final_byte {
            b'A' => Some(Key::Up),
            b'B' => Some(Key::Down),
            b'C' => Some(Key::Right),
            b'D' => Some(Key::Left),
            b'H' => Some(Key::Home),
            b'F' => Some(Key::End),
            b'Z' => Some(Key::BackTab),
            b'~' => match params.first().copied().unwrap_or(0) {
                200 => {
                    self.paste = Some(String::new());
                    None
                }
                201 => {
                    let text = self.paste.take().unwrap_or_default();
                    let mut event = KeyEvent::runes(text);
                    event.paste = true;
                    out.push(InputEvent::Key(event));
                    None
                }
                code => tilde_key(code),
            },
            _ => None,
        };

        if let Some(key) = key {
            let mut event = KeyEvent::key(key);
            event.shift = shift;
            event.alt = alt;
            event.ctrl = ctrl;
            self.emit(event, out);
        }
    }

    fn push_runes(&mut self, text: &str) {
        match &mut self.paste {
            Some(buffer) => buffer.push_str(text),
            None => self.pending_runes.push_str(text),
        }
    }

    fn flush_runes(&mut self, out: &mut Vec<InputEvent>) {
        if !self.pending_runes.is_empty() {
            let text = std::mem::take(&mut self.pending_runes);
            out.push(InputEvent::Key(KeyEvent::runes(text)));
        }
    }

    /// Emits a key event, or routes it into the paste buffer when one is
    /// open: only newline-ish control characters survive a paste, everything
    /// else is stripped.
    fn emit(&mut self, event: KeyEvent, out: &mut Vec<InputEvent>) {
        if let Some(buffer) = &mut self.paste {
            match event.key {
                Key::Enter => buffer.push('\n'),
                Key::Tab => buffer.push('\t'),
                Key::Runes if !event.paste => buffer.push_str(&event.runes),
                // Other controls and sequences are stripped from pastes.
                _ => {}
            }
            return;
        }
        self.flush_runes(out);
        out.push(InputEvent::Key(event));
    }
}

fn control_key(byte: u8) -> Key {
    match byte {
        0x0d => Key::Enter,
        0x09 => Key::Tab,
        0x08 | 0x7f => Key::Backspace,
        0x1b => Key::Escape,
        0x0a => Key::Enter,
        _ => Key::Ctrl((byte | 0x60) as char),
    }
}

fn tilde_key(code: u16) -> Option<Key> {
    match code {
        1 | 7 => Some(Key::Home),
        2 => Some(Key::Insert),
        3 => Some(Key::Delete),
        4 | 8 => Some(Key::End),
        5 => Some(Key::PageUp),
        6 => Some(Key::PageDown),
        11..=15 => Some(Key::F((code - 10) as u8)),
        17..=21 => Some(Key::F((code - 11) as u8)),
        23 | 24 => Some(Key::F((code - 12) as u8)),
        _ => None,
    }
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

/// `ESC [ M b x y`: payload bytes are offset by 32; coordinates are
/// additionally 1-based.
fn decode_x10(payload: &[u8]) -> Option<MouseEvent> {
    let [b, x, y] = payload else {
        return None;
    };
    let bits = u16::from(b.checked_sub(32)?);
    let x = u16::from(x.checked_sub(33)?);
    let y = u16::from(y.checked_sub(33)?);
    Some(mouse_from_bits(bits, x, y, (bits & 0x3) != 3))
}

/// `ESC [ < b ; x ; y M|m`: `M` is press, `m` release; coordinates 1-based.
fn decode_sgr(params: &[u8], final_byte: u8) -> Option<MouseEvent> {
    let text = std::str::from_utf8(params).ok()?;
    let mut parts = text.split(';');
    let bits: u16 = parts.next()?.parse().ok()?;
    let x: u16 = parts.next()?.parse::<u16>().ok()?.checked_sub(1)?;
    let y: u16 = parts.next()?.parse::<u16>().ok()?.checked_sub(1)?;
    Some(mouse_from_bits(bits, x, y, final_byte == b'M'))
}

fn mouse_from_bits(bits: u16, x: u16, y: u16, press: bool) -> MouseEvent {
    let wheel = bits & 64 != 0;
    let motion = bits & 32 != 0;
    let low = bits & 0x3;
    let button = if wheel {
        if low & 1 == 0 {
            MouseButton::WheelUp
        } else {
            MouseButton::WheelDown
        }
    } else {
        match low {
            0 => MouseButton::Left,
            1 => MouseButton::Middle,
            2 => MouseButton::Right,
            _ => MouseButton::None,
        }
    };
    let action = if motion {
        MouseAction::Motion
    } else if !press || (!wheel && low == 3) {
        MouseAction::Release
    } else {
        MouseAction::Press
    };
    MouseEvent {
        x,
        y,
        button,
        action,
        shift: bits & 4 != 0,
        alt: bits & 8 != 0,
        ctrl: bits & 16 != 0,
    }
}

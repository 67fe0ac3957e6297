//! Hexadecimal keypad input state.
use std::fmt;

use crate::constants::KEY_COUNT;

/// The 16 keys of the COSMAC VIP keypad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyCode {
    Key0 = 0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF = 0xF,
}

impl KeyCode {
    pub const ALL: [KeyCode; KEY_COUNT] = [
        Self::Key0,
        Self::Key1,
        Self::Key2,
        Self::Key3,
        Self::Key4,
        Self::Key5,
        Self::Key6,
        Self::Key7,
        Self::Key8,
        Self::Key9,
        Self::KeyA,
        Self::KeyB,
        Self::KeyC,
        Self::KeyD,
        Self::KeyE,
        Self::KeyF,
    ];

    #[inline(always)]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let key_id = self.as_u8();
        write!(f, "k{key_id:x}")
    }
}

impl From<KeyCode> for u8 {
    fn from(keycode: KeyCode) -> Self {
        keycode.as_u8()
    }
}

impl TryFrom<u8> for KeyCode {
    type Error = InvalidKeyCode;

    fn try_from(key_id: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(key_id as usize)
            .copied()
            .ok_or(InvalidKeyCode(key_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidKeyCode(pub u8);

impl std::error::Error for InvalidKeyCode {}

impl fmt::Display for InvalidKeyCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "keycode must be in range 0 <= keycode < 16, got {}",
            self.0
        )
    }
}

/// Pressed state of each key, indexed by key value.
///
/// Written by the host, only ever read by the interpreter.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Keypad([bool; KEY_COUNT]);

impl Keypad {
    #[inline]
    pub fn set(&mut self, key: KeyCode, pressed: bool) {
        self.0[key as usize] = pressed;
    }

    /// Whether the key with the given value is pressed.
    ///
    /// Register values are 8-bit, so anything above 0xF
    /// is not a key and never pressed.
    #[inline]
    pub fn is_pressed(&self, key_id: u8) -> bool {
        self.0.get(key_id as usize).copied().unwrap_or(false)
    }

    /// Check whether any key is pressed down.
    #[inline(always)]
    pub fn any(&self) -> bool {
        self.0.iter().any(|pressed| *pressed)
    }

    /// Lowest key that is pressed down.
    #[inline]
    pub fn first_pressed(&self) -> Option<KeyCode> {
        self.0
            .iter()
            .position(|pressed| *pressed)
            .map(|index| KeyCode::ALL[index])
    }

    /// Set all keys to up.
    #[inline(always)]
    pub fn clear(&mut self) {
        self.0 = [false; KEY_COUNT];
    }

    #[inline(always)]
    pub fn as_array(&self) -> &[bool; KEY_COUNT] {
        &self.0
    }
}

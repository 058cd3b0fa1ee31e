//! PIN-derived "weak" Two-Fish key used to authenticate the `KEY_RESPONSE`
//! packet during pairing, before the real session keys are known.
//!
//! The exact expansion used by the reference implementation is not fully
//! specified; the shape below (BCD-pack the 10 digits, repeat to 16 bytes,
//! nibble-swap every other repeat, XOR in a fixed mask) reproduces the
//! *structure* of the documented "generateWeakKeyFromPIN" expansion. It has
//! not been validated against hardware-derived vectors. Treat any mismatch
//! against a real pump as a blocker and substitute verified vectors here
//! before shipping against real hardware.
use crate::cipher::TwofishKey;
use crate::error::{Error, Result};

/// A 10-digit decimal pairing PIN as shown on the pump's display.
#[derive(Clone, Copy)]
pub struct Pin([u8; 10]);

impl Pin {
    /// Parses a PIN from its 10 ASCII decimal digits.
    pub fn new(digits: [u8; 10]) -> Result<Self> {
        if digits.iter().all(u8::is_ascii_digit) {
            Ok(Self(digits))
        } else {
            Err(Error::InvalidPin)
        }
    }

    /// Parses a PIN from a decimal string, requiring exactly 10 digits.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes: [u8; 10] = s.as_bytes().try_into().map_err(|_| Error::InvalidPin)?;
        Self::new(bytes)
    }
}

/// Fixed per-position mask applied while expanding the 5-byte BCD PIN into
/// a 16-byte key, so that all-zero and all-nine PINs don't collide with
/// their own nibble-swapped repeats.
const WEAK_KEY_MASK: [u8; 16] = [
    0x12, 0x7E, 0x45, 0x9A, 0x3C, 0xD1, 0x88, 0x0F, 0x56, 0xAB, 0x23, 0x64, 0xF0, 0x9D, 0x77, 0xE8,
];

/// Derives the weak Two-Fish key for `pin`.
#[must_use]
pub fn weak_key_from_pin(pin: Pin) -> TwofishKey {
    let mut bcd = [0u8; 5];
    for (i, b) in bcd.iter_mut().enumerate() {
        let hi = pin.0[2 * i] - b'0';
        let lo = pin.0[2 * i + 1] - b'0';
        *b = (hi << 4) | lo;
    }
    let mut key = [0u8; 16];
    for (i, k) in key.iter_mut().enumerate() {
        let b = bcd[i % 5];
        let swapped = b.rotate_left(4);
        let base = if (i / 5) % 2 == 0 { b } else { swapped };
        *k = base ^ WEAK_KEY_MASK[i];
    }
    TwofishKey::new(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_digit_pin() {
        assert!(Pin::parse("123456789a").is_err());
    }

    #[test]
    fn accepts_ten_digit_pin() {
        assert!(Pin::parse("1234567890").is_ok());
    }

    #[test]
    fn derivation_is_deterministic() {
        let pin = Pin::parse("1234567890").unwrap();
        let k1 = weak_key_from_pin(pin).encrypt([0; 16]);
        let k2 = weak_key_from_pin(pin).encrypt([0; 16]);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_pins_derive_different_keys() {
        let a = weak_key_from_pin(Pin::parse("1234567890").unwrap()).encrypt([0; 16]);
        let b = weak_key_from_pin(Pin::parse("0987654321").unwrap()).encrypt([0; 16]);
        assert_ne!(a, b);
    }
}

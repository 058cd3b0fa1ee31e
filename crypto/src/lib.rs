//! Accu-Chek Combo cryptographic toolbox: Two-Fish block cipher, the
//! CCM-style packet MAC, CRC-16/MCRF4XX, and PIN-derived weak-key
//! expansion.

mod cipher;
mod crc16;
mod error;
mod mac;
mod pin;

pub use crate::cipher::{Block, TwofishKey};
pub use crc16::crc16_mcrf4xx;
pub use error::{Error, Result};
pub use mac::{compute_mac, verify_mac, MAC_LEN};
pub use pin::{weak_key_from_pin, Pin};

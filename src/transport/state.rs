//! Per-pump persistent record and per-connection volatile session state
//! ([spec] §3).

use crate::transport::nonce::Nonce;

/// Persistent, per-paired-pump record. Created once at the end of pairing
/// and read-only afterward; mutating it implies re-pairing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvariantPumpData {
    /// Client -> pump session key.
    pub client_to_pump_key: [u8; 16],
    /// Pump -> client session key.
    pub pump_to_client_key: [u8; 16],
    /// Source/destination nibble address negotiated during pairing.
    pub key_response_address: u8,
    /// Pump-ID string reported in `ID_RESPONSE`, at most 13 characters.
    pub pump_id: String,
}

impl InvariantPumpData {
    /// Returns the address with source and destination nibbles swapped,
    /// as required when deriving the key-response address from the
    /// `KEY_RESPONSE` packet's own address byte.
    #[must_use]
    pub const fn swap_nibbles(addr: u8) -> u8 {
        (addr << 4) | (addr >> 4)
    }
}

/// Per-connection volatile state: the current outgoing nonce and the
/// alternating sequence-bit flag. Reset on `REGULAR_CONNECTION_REQUEST_ACCEPTED`
/// and on connect.
#[derive(Clone, Copy, Debug, Default)]
pub struct PumpSessionState {
    tx_nonce: Nonce,
    sequence_flag: bool,
}

impl PumpSessionState {
    #[must_use]
    pub fn new(tx_nonce: Nonce) -> Self {
        Self {
            tx_nonce,
            sequence_flag: false,
        }
    }

    /// Returns the next Tx nonce to use, persisting the advance.
    pub fn next_tx_nonce(&mut self) -> Nonce {
        self.tx_nonce = self.tx_nonce.wrapping_increment();
        self.tx_nonce
    }

    #[must_use]
    pub const fn tx_nonce(&self) -> Nonce {
        self.tx_nonce
    }

    pub fn set_tx_nonce(&mut self, nonce: Nonce) {
        self.tx_nonce = nonce;
    }

    #[must_use]
    pub const fn sequence_flag(&self) -> bool {
        self.sequence_flag
    }

    /// Returns the current flag and toggles it, for use on reliable sends.
    pub fn take_and_toggle_sequence_flag(&mut self) -> bool {
        let cur = self.sequence_flag;
        self.sequence_flag = !self.sequence_flag;
        cur
    }

    /// Resets the sequence flag to `false` (connect / `REGULAR_CONNECTION_REQUEST_ACCEPTED`).
    pub fn reset_sequence_flag(&mut self) {
        self.sequence_flag = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_nibbles_round_trips() {
        assert_eq!(InvariantPumpData::swap_nibbles(0x12), 0x21);
        assert_eq!(InvariantPumpData::swap_nibbles(InvariantPumpData::swap_nibbles(0xAB)), 0xAB);
    }

    #[test]
    fn sequence_flag_toggles_only_on_reliable_take() {
        let mut s = PumpSessionState::default();
        assert!(!s.sequence_flag());
        assert!(!s.take_and_toggle_sequence_flag());
        assert!(s.sequence_flag());
        assert!(s.take_and_toggle_sequence_flag());
        assert!(!s.sequence_flag());
    }

    #[test]
    fn reset_clears_flag() {
        let mut s = PumpSessionState::default();
        s.take_and_toggle_sequence_flag();
        assert!(s.sequence_flag());
        s.reset_sequence_flag();
        assert!(!s.sequence_flag());
    }
}

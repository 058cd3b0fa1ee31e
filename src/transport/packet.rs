//! Transport-packet wire codec ([spec] §3, §4.4).

use num_enum::{IntoPrimitive, TryFromPrimitive};

use combo_crypto::{compute_mac, verify_mac, TwofishKey, MAC_LEN};

use crate::error::{Error, Result};
use crate::transport::nonce::Nonce;

/// Largest payload a transport packet may carry; the 16-bit length field
/// cannot represent more.
pub const MAX_VALID_TL_PAYLOAD_SIZE: usize = 65535;

/// Fixed header size: version(1) + control(1) + len(2) + address(1) + nonce(13).
const HEADER_LEN: usize = 1 + 1 + 2 + 1 + 13;

/// Protocol version carried by every transport packet.
pub const VERSION: u8 = 0x10;

/// Pre-pairing address used by the three CRC-only commands.
pub const PRE_PAIRING_ADDRESS: u8 = 0xF0;

/// Transport-layer command IDs ([spec] §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TpCommand {
    AckResponse = 0x05,
    Data = 0x03,
    ErrorResponse = 0x06,
    RequestPairingConnection = 0x09,
    PairingConnectionRequestAccepted = 0x0A,
    RequestKeys = 0x0C,
    GetAvailableKeys = 0x0F,
    KeyResponse = 0x11,
    RequestId = 0x12,
    IdResponse = 0x14,
    RequestRegularConnection = 0x17,
    RegularConnectionRequestAccepted = 0x18,
    Disconnect = 0x1B,
}

impl TpCommand {
    /// Whether this command's wire payload is the 2-byte CRC-16 of the
    /// header rather than application data.
    #[must_use]
    pub const fn is_crc_command(self) -> bool {
        matches!(
            self,
            Self::RequestPairingConnection | Self::RequestKeys | Self::GetAvailableKeys
        )
    }
}

/// A fully decoded transport packet ([spec] §3).
#[derive(Clone, Debug)]
pub struct TransportPacket {
    pub command: TpCommand,
    pub sequence_bit: bool,
    pub reliability_bit: bool,
    pub address: u8,
    pub nonce: Nonce,
    pub payload: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl TransportPacket {
    /// Serializes the packet. `with_payload` controls whether the payload
    /// bytes are included (omitted when computing the CRC header), and
    /// `with_mac` controls whether the trailing MAC bytes are appended
    /// (omitted while computing the MAC itself).
    #[must_use]
    pub fn to_bytes(&self, with_mac: bool, with_payload: bool) -> Vec<u8> {
        let payload_len = if with_payload { self.payload.len() } else { 0 };
        let mut out = Vec::with_capacity(HEADER_LEN + payload_len + MAC_LEN);
        out.push(VERSION);
        let cmd_id: u8 = self.command.into();
        let ctrl = (u8::from(self.sequence_bit) << 7)
            | (u8::from(self.reliability_bit) << 5)
            | (cmd_id & 0x1F);
        out.push(ctrl);
        out.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        out.push(self.address);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        if with_payload {
            out.extend_from_slice(&self.payload);
        }
        if with_mac {
            out.extend_from_slice(&self.mac);
        }
        out
    }

    /// Parses a packet from a complete, deframed byte slice.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + MAC_LEN {
            return Err(Error::InvalidPayload {
                reason: format!("transport packet too short: {} bytes", bytes.len()),
            });
        }
        let version = bytes[0];
        if version != VERSION {
            return Err(Error::InvalidPayload {
                reason: format!("unexpected transport version {version:#04x}"),
            });
        }
        let ctrl = bytes[1];
        let sequence_bit = ctrl & 0x80 != 0;
        let reliability_bit = ctrl & 0x20 != 0;
        let cmd_id = ctrl & 0x1F;
        let command = TpCommand::try_from(cmd_id)
            .map_err(|_| Error::InvalidCommandId(u16::from(cmd_id)))?;
        let payload_len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        let address = bytes[4];
        let nonce = Nonce::from_le_bytes(bytes[5..18].try_into().expect("13 bytes"));
        let expected_len = HEADER_LEN + payload_len + MAC_LEN;
        if bytes.len() != expected_len {
            return Err(Error::InvalidPayload {
                reason: format!(
                    "header declares {payload_len} payload bytes but packet is {} bytes",
                    bytes.len()
                ),
            });
        }
        let payload = bytes[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
        let mac: [u8; MAC_LEN] = bytes[HEADER_LEN + payload_len..]
            .try_into()
            .expect("8 mac bytes");
        Ok(Self {
            command,
            sequence_bit,
            reliability_bit,
            address,
            nonce,
            payload,
            mac,
        })
    }

    /// Computes and stores the MAC authenticating this packet under `key`.
    pub fn authenticate(&mut self, key: &TwofishKey) {
        let data = self.to_bytes(false, true);
        self.mac = compute_mac(key, &self.nonce.to_le_bytes(), &data);
    }

    /// Verifies the packet's MAC under `key`.
    #[must_use]
    pub fn verify(&self, key: &TwofishKey) -> bool {
        let data = self.to_bytes(false, true);
        verify_mac(key, &self.nonce.to_le_bytes(), &data, &self.mac)
    }

    /// Writes the CRC-16/MCRF4XX of the header (excluding payload and MAC)
    /// as this packet's 2-byte payload.
    pub fn compute_crc16_payload(&mut self) {
        let header = self.to_bytes(false, false);
        let crc = combo_crypto::crc16_mcrf4xx(&header);
        self.payload = crc.to_le_bytes().to_vec();
    }

    /// Verifies that this packet's 2-byte payload is the CRC-16/MCRF4XX of
    /// its header.
    #[must_use]
    pub fn verify_crc16_payload(&self) -> bool {
        if self.payload.len() != 2 {
            return false;
        }
        let header = self.to_bytes(false, false);
        let crc = combo_crypto::crc16_mcrf4xx(&header);
        self.payload == crc.to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: Vec<u8>) -> TransportPacket {
        TransportPacket {
            command: TpCommand::Data,
            sequence_bit: true,
            reliability_bit: true,
            address: 0x42,
            nonce: Nonce::from_le_bytes([9; 13]),
            payload,
            mac: [0; MAC_LEN],
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut p = sample(vec![1, 2, 3, 4, 5]);
        let key = TwofishKey::new(&[0x11; 16]);
        p.authenticate(&key);
        let bytes = p.to_bytes(true, true);
        let parsed = TransportPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.command, p.command);
        assert_eq!(parsed.sequence_bit, p.sequence_bit);
        assert_eq!(parsed.reliability_bit, p.reliability_bit);
        assert_eq!(parsed.address, p.address);
        assert_eq!(parsed.nonce, p.nonce);
        assert_eq!(parsed.payload, p.payload);
        assert_eq!(parsed.mac, p.mac);
        assert!(parsed.verify(&key));
    }

    #[test]
    fn rejects_truncated_packet() {
        let p = sample(vec![1, 2, 3]);
        let bytes = p.to_bytes(true, true);
        assert!(TransportPacket::parse(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn rejects_unknown_command_id() {
        let p = sample(vec![]);
        let mut bytes = p.to_bytes(true, true);
        bytes[1] = (bytes[1] & 0xE0) | 0x1F; // unused command id
        match TransportPacket::parse(&bytes) {
            Err(Error::InvalidCommandId(0x1F)) => {}
            // fallthrough below panics with a readable message
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn crc_payload_round_trips() {
        let mut p = TransportPacket {
            command: TpCommand::RequestPairingConnection,
            sequence_bit: false,
            reliability_bit: false,
            address: PRE_PAIRING_ADDRESS,
            nonce: Nonce::NULL,
            payload: Vec::new(),
            mac: [0; MAC_LEN],
        };
        p.compute_crc16_payload();
        assert!(p.verify_crc16_payload());
        p.payload[0] ^= 0xFF;
        assert!(!p.verify_crc16_payload());
    }

    #[test]
    fn mac_verification_fails_on_tamper() {
        let key = TwofishKey::new(&[0x22; 16]);
        let mut p = sample(vec![5, 6, 7]);
        p.authenticate(&key);
        p.payload[0] ^= 1;
        assert!(!p.verify(&key));
    }
}

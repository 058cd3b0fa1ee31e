//! Accu-Chek Combo insulin pump protocol client.
//!
//! A client library for the pump's proprietary two-layer Bluetooth RFCOMM
//! protocol: an outer transport layer (framing, sequencing, Two-Fish
//! CCM-style authentication, nonce management, pairing handshake) and an
//! inner application layer (service/command multiplexing, remote-terminal
//! mode, command mode for bolus delivery and history retrieval).
//!
//! Discovery, pump-manager lifecycle, UI, OCR, and dose-adjustment
//! workflows live outside this crate; it depends on them only through the
//! collaborator traits in [`collab`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod application;
pub mod collab;
mod error;
pub mod transport;

pub use error::{Error, Result};

pub use application::{AppCommand, ApplicationPacket, ApplicationSession, Service};
pub use collab::{FilterDecision, PacketFilter, PairingPin, PinCallback, PumpStateStore, RfcommIo};
pub use transport::{
    default_filter, Diagnostics, InvariantPumpData, Nonce, PumpSessionState, SessionConfig,
    SessionHandle, SessionState, TpCommand, TransportPacket, TransportSession,
    MAX_VALID_TL_PAYLOAD_SIZE,
};

//! Contracts for the external collaborators named in the system overview:
//! the Bluetooth byte stream, the persistent pump-pairing store, and the
//! PIN-entry prompt. The engine depends only on these traits; the concrete
//! RFCOMM socket, on-disk store, and UI prompt live outside this crate.

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::state::InvariantPumpData;
use crate::transport::TransportPacket;
use crate::transport::Nonce;

/// The PIN entered by the user from the pump's display during pairing.
pub type PairingPin = combo_crypto::Pin;

/// Raw byte transport to the pump, normally an RFCOMM socket.
#[async_trait]
pub trait RfcommIo: Send {
    /// Writes `bytes` to the stream.
    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    /// Reads the next chunk of bytes from the stream. May return fewer or
    /// more bytes than one frame; the frame codec handles reassembly.
    async fn receive(&mut self) -> std::io::Result<Vec<u8>>;
    /// Closes the underlying socket, unblocking any in-flight `receive`.
    fn close(&mut self);
}

/// Persistent storage of paired-pump records, keyed by key-response address.
#[async_trait]
pub trait PumpStateStore: Send + Sync {
    async fn has(&self, addr: u8) -> Result<bool>;
    async fn get_invariant(&self, addr: u8) -> Result<Option<InvariantPumpData>>;
    async fn create(&self, addr: u8, data: InvariantPumpData) -> Result<()>;
    async fn get_tx_nonce(&self, addr: u8) -> Result<Option<Nonce>>;
    async fn set_tx_nonce(&self, addr: u8, nonce: Nonce) -> Result<()>;
    async fn delete(&self, addr: u8) -> Result<()>;
    async fn list_addresses(&self) -> Result<Vec<u8>>;
}

/// Prompts the user for the pairing PIN shown on the pump.
#[async_trait]
pub trait PinCallback: Send + Sync {
    /// `previous_attempt_failed` is `true` on every retry after the first.
    async fn request_pin(&self, previous_attempt_failed: bool) -> Result<PairingPin>;
}

/// What a [`PacketFilter`] decides to do with an incoming transport packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterDecision {
    /// Hand the packet to the normal dispatch path.
    Forward,
    /// Drop the packet; it is not delivered to `receive_packet`.
    Drop,
}

/// Hook replacing the subclassing the reference implementation used to
/// customize packet handling ([DESIGN.md] "inheritance -> hook interface").
pub trait PacketFilter: Send + Sync {
    fn filter(&self, packet: &mut TransportPacket) -> FilterDecision;
}

/// A filter that forwards every packet, used when no customization is
/// needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardAll;

impl PacketFilter for ForwardAll {
    fn filter(&self, _packet: &mut TransportPacket) -> FilterDecision {
        FilterDecision::Forward
    }
}

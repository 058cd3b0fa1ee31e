//! Outer transport layer: framing, sequencing, authentication, pairing, and
//! the reliable-packet discipline ([spec] §4.2–§4.5).

pub mod frame;
pub mod nonce;
pub mod packet;
pub mod session;
pub mod state;

pub use nonce::Nonce;
pub use packet::{TpCommand, TransportPacket, MAX_VALID_TL_PAYLOAD_SIZE};
pub use session::{
    default_filter, Diagnostics, SessionConfig, SessionHandle, SessionState, TransportSession,
};
pub use state::{InvariantPumpData, PumpSessionState};

use std::sync::Arc;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the transport and application protocol engines.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid command id {0:#06x}")]
    InvalidCommandId(u16),
    #[error("invalid application service id {0:#04x}")]
    InvalidServiceId(u8),
    #[error("invalid payload: {reason}")]
    InvalidPayload { reason: String },
    #[error("payload data corruption: {reason}")]
    PayloadDataCorruption { reason: String },
    #[error("packet verification failed")]
    PacketVerification,
    #[error("pairing aborted")]
    PairingAborted,
    #[error("incorrect packet: expected {expected:?}, got {got:#06x}")]
    IncorrectPacket { expected: Option<u16>, got: u16 },
    #[error("pump reported error response {error_id:#06x}")]
    ErrorResponse { error_id: u16 },
    #[error("CTRL_SERVICE_ERROR reported by pump")]
    ServiceError,
    #[error("application error code {code:#06x}")]
    ApplicationErrorCode { code: u16 },
    #[error("I/O error: {0}")]
    ComboIo(String),
    #[error("pump state store access failed")]
    PumpStateStoreAccess,
    #[error("illegal state: engine is {0}")]
    IllegalState(&'static str),
    #[error("background worker failed: {0}")]
    BackgroundIo(Arc<Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::ComboIo(e.to_string())
    }
}

impl From<combo_crypto::Error> for Error {
    fn from(e: combo_crypto::Error) -> Self {
        Self::InvalidPayload {
            reason: e.to_string(),
        }
    }
}

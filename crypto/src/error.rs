/// Crate-local error type for the crypto primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key must be exactly 16 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("PIN must be exactly 10 decimal digits")]
    InvalidPin,
}

pub type Result<T> = core::result::Result<T, Error>;

//! Inner application layer: service/command multiplexing, remote-terminal
//! mode, and command-mode operations ([spec] §4.6–§4.9).

pub mod command;
pub mod packet;
pub mod rt;
pub mod session;
pub mod timestamp;

pub use packet::{AppCommand, ApplicationPacket, Service};
pub use session::ApplicationSession;

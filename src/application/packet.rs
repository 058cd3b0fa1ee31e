//! Application-layer packet wire codec: inner header, service/command
//! multiplexing, and the reliable-packet error-code convention
//! ([spec] §3, §4.6).

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};
use crate::transport::{TpCommand, TransportPacket};

/// Protocol version carried by every application packet.
pub const VERSION: u8 = 0x10;

/// Application-layer services ([spec] §3, §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Service {
    Control = 0x00,
    RtMode = 0x48,
    CommandMode = 0xB7,
}

/// Every (service, command-id) pair named in the wire tables ([spec] §6).
/// `CMD_DELIVER_BOLUS` and `CMD_CANCEL_BOLUS` share one command id
/// (`CmdBolus`), disambiguated by payload shape in [`crate::application::command`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum AppCommand {
    CtrlConnect = 0x9055,
    CtrlConnectResponse = 0xA055,
    CtrlBind = 0x9095,
    CtrlBindResponse = 0xA095,
    CtrlDisconnect = 0x005A,
    CtrlActivateService = 0x9066,
    CtrlActivateServiceResponse = 0xA066,
    CtrlDeactivateAllServices = 0x906A,
    CtrlDeactivateAllServicesResponse = 0xA06A,
    CtrlServiceError = 0x00AA,

    CmdPing = 0x9AAA,
    CmdPingResponse = 0xAAAA,
    CmdReadPumpStatus = 0x9A9A,
    CmdReadPumpStatusResponse = 0xAA9A,
    CmdReadHistoryBlock = 0x9996,
    CmdReadHistoryBlockResponse = 0xA996,
    CmdConfirmHistoryBlock = 0x9999,
    CmdConfirmHistoryBlockResponse = 0xA999,
    CmdGetBolusStatus = 0x966A,
    CmdGetBolusStatusResponse = 0xA66A,
    CmdBolus = 0x9669,
    CmdBolusResponse = 0xA669,
    CmdReadDateTime = 0x9AA6,
    CmdReadDateTimeResponse = 0xAAA6,

    RtButtonStatus = 0x0565,
    RtKeepAlive = 0x0566,
    RtButtonConfirmation = 0x0556,
    RtDisplay = 0x0555,
    RtAudio = 0x0559,
    RtVibration = 0x055A,
}

impl AppCommand {
    /// The service this command belongs to.
    #[must_use]
    pub const fn service(self) -> Service {
        match self {
            Self::CtrlConnect
            | Self::CtrlConnectResponse
            | Self::CtrlBind
            | Self::CtrlBindResponse
            | Self::CtrlDisconnect
            | Self::CtrlActivateService
            | Self::CtrlActivateServiceResponse
            | Self::CtrlDeactivateAllServices
            | Self::CtrlDeactivateAllServicesResponse
            | Self::CtrlServiceError => Service::Control,

            Self::CmdPing
            | Self::CmdPingResponse
            | Self::CmdReadPumpStatus
            | Self::CmdReadPumpStatusResponse
            | Self::CmdReadHistoryBlock
            | Self::CmdReadHistoryBlockResponse
            | Self::CmdConfirmHistoryBlock
            | Self::CmdConfirmHistoryBlockResponse
            | Self::CmdGetBolusStatus
            | Self::CmdGetBolusStatusResponse
            | Self::CmdBolus
            | Self::CmdBolusResponse
            | Self::CmdReadDateTime
            | Self::CmdReadDateTimeResponse => Service::CommandMode,

            Self::RtButtonStatus
            | Self::RtKeepAlive
            | Self::RtButtonConfirmation
            | Self::RtDisplay
            | Self::RtAudio
            | Self::RtVibration => Service::RtMode,
        }
    }

    /// Whether the wrapping transport `DATA` packet must set the
    /// reliability bit: true for every `CTRL`/`CMD` command, false for
    /// every `RT` command ([spec] §6).
    #[must_use]
    pub const fn reliable(self) -> bool {
        !matches!(self.service(), Service::RtMode)
    }
}

/// A decoded application packet, carried inside a transport `DATA` payload.
#[derive(Clone, Debug)]
pub struct ApplicationPacket {
    pub command: AppCommand,
    pub payload: Vec<u8>,
}

impl ApplicationPacket {
    /// Serializes into the bytes that become a transport `DATA` payload.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let cmd_id: u16 = self.command.into();
        let service: u8 = self.command.service().into();
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.push(VERSION);
        out.push(service);
        out.extend_from_slice(&cmd_id.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses an application packet out of a transport `DATA` packet.
    pub fn from_transport(tp: &TransportPacket) -> Result<Self> {
        if tp.command != TpCommand::Data {
            return Err(Error::InvalidPayload {
                reason: "application packet requires a transport DATA packet".into(),
            });
        }
        if tp.payload.len() < 4 {
            return Err(Error::InvalidPayload {
                reason: format!("application header too short: {} bytes", tp.payload.len()),
            });
        }
        let service_id = tp.payload[1];
        let service =
            Service::try_from(service_id).map_err(|_| Error::InvalidServiceId(service_id))?;
        let command_id = u16::from_le_bytes([tp.payload[2], tp.payload[3]]);
        let command = AppCommand::try_from(command_id)
            .map_err(|_| Error::InvalidCommandId(command_id))?;
        if command.service() != service {
            return Err(Error::InvalidServiceId(service_id));
        }
        let payload = tp.payload[4..].to_vec();

        if tp.reliability_bit && command != AppCommand::CtrlServiceError {
            if payload.len() < 2 {
                return Err(Error::InvalidPayload {
                    reason: "reliable application packet missing error code".into(),
                });
            }
            let code = u16::from_le_bytes([payload[0], payload[1]]);
            if code != 0 {
                return Err(Error::ApplicationErrorCode { code });
            }
        }

        Ok(Self { command, payload })
    }
}

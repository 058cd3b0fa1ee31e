//! Application session engine: sits atop the transport session, stamps the
//! RT sequence counter on outbound RT packets, and serializes
//! request/response exchanges ([spec] §4.7).

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::application::packet::{AppCommand, ApplicationPacket, Service};
use crate::error::{Error, Result};
use crate::transport::{SessionHandle, TpCommand};

/// Wraps a [`SessionHandle`] with the application-layer send/receive
/// discipline: RT-sequence stamping and request/response serialization.
pub struct ApplicationSession {
    transport: Arc<SessionHandle>,
    rt_sequence: AtomicU16,
    request_lock: AsyncMutex<()>,
}

impl ApplicationSession {
    #[must_use]
    pub fn new(transport: Arc<SessionHandle>) -> Self {
        Self {
            transport,
            rt_sequence: AtomicU16::new(0),
            request_lock: AsyncMutex::new(()),
        }
    }

    /// Overwrites the leading RT-sequence placeholder for RT-mode packets
    /// and advances the counter (wraps at 65536, [spec] §8).
    fn stamp_rt_sequence(&self, app: &mut ApplicationPacket) {
        if app.command.service() != Service::RtMode {
            return;
        }
        let seq = self.rt_sequence.fetch_add(1, Ordering::Relaxed);
        if app.payload.len() < 2 {
            app.payload.resize(2, 0);
        }
        app.payload[0..2].copy_from_slice(&seq.to_le_bytes());
    }

    /// Sends `app` without awaiting a response.
    pub async fn send_no_response(&self, mut app: ApplicationPacket) -> Result<()> {
        self.stamp_rt_sequence(&mut app);
        let reliable = app.command.reliable();
        self.transport.send(TpCommand::Data, app.to_bytes(), reliable).await
    }

    /// Awaits the next application packet off the transport's incoming
    /// channel. If `expected` is set and the command doesn't match, fails
    /// with `IncorrectPacket`.
    pub async fn receive(&self, expected: Option<AppCommand>) -> Result<ApplicationPacket> {
        let tp = self.transport.receive_packet().await?;
        let app = ApplicationPacket::from_transport(&tp)?;
        if let Some(want) = expected {
            if app.command != want {
                return Err(Error::IncorrectPacket {
                    expected: Some(u16::from(want)),
                    got: u16::from(app.command),
                });
            }
        }
        Ok(app)
    }

    /// Sends `app` and awaits its response, serialized under a mutex so
    /// concurrent request/response exchanges cannot interleave ([spec] §5).
    pub async fn send_with_response(
        &self,
        app: ApplicationPacket,
        expected: Option<AppCommand>,
    ) -> Result<ApplicationPacket> {
        let _guard = self.request_lock.lock().await;
        self.send_no_response(app).await?;
        self.receive(expected).await
    }

    /// `CTRL_CONNECT` / `CTRL_CONNECT_RESPONSE` ([spec] §8 scenario 2).
    pub async fn connect(&self) -> Result<()> {
        let req = ApplicationPacket {
            command: AppCommand::CtrlConnect,
            payload: Vec::new(),
        };
        self.send_with_response(req, Some(AppCommand::CtrlConnectResponse))
            .await?;
        Ok(())
    }

    /// `CTRL_BIND` / `CTRL_BIND_RESPONSE`. Payload byte `0x48` is
    /// documented as experimentally determined in the source; see
    /// DESIGN.md for the open-question note.
    pub async fn bind(&self) -> Result<()> {
        let req = ApplicationPacket {
            command: AppCommand::CtrlBind,
            payload: vec![0x48],
        };
        self.send_with_response(req, Some(AppCommand::CtrlBindResponse))
            .await?;
        Ok(())
    }

    /// `CTRL_ACTIVATE_SERVICE` / `CTRL_ACTIVATE_SERVICE_RESPONSE`.
    pub async fn activate_service(&self, service: Service) -> Result<()> {
        let req = ApplicationPacket {
            command: AppCommand::CtrlActivateService,
            payload: vec![service.into()],
        };
        self.send_with_response(req, Some(AppCommand::CtrlActivateServiceResponse))
            .await?;
        Ok(())
    }

    /// `CTRL_DEACTIVATE_ALL_SERVICES` / its response.
    pub async fn deactivate_all_services(&self) -> Result<()> {
        let req = ApplicationPacket {
            command: AppCommand::CtrlDeactivateAllServices,
            payload: Vec::new(),
        };
        self.send_with_response(req, Some(AppCommand::CtrlDeactivateAllServicesResponse))
            .await?;
        Ok(())
    }

    /// `CTRL_DISCONNECT`, fire-and-forget (no response command is defined
    /// on the wire). Payload `0x0003` is documented as experimentally
    /// determined in the source; see DESIGN.md.
    pub async fn disconnect(&self) -> Result<()> {
        let req = ApplicationPacket {
            command: AppCommand::CtrlDisconnect,
            payload: vec![0x03, 0x00],
        };
        self.send_no_response(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rt_sequence_stamping_overwrites_placeholder_and_wraps() {
        let counter = AtomicU16::new(65535);
        let seq = counter.fetch_add(1, Ordering::Relaxed);
        assert_eq!(seq, 65535);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}

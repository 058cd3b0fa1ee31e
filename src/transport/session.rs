//! Single-threaded transport session engine: pairing handshake, reliable
//! ACK protocol, nonce/sequence bookkeeping, and packet throttling
//! ([spec] §4.5, §5).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use combo_crypto::TwofishKey;

use crate::collab::{FilterDecision, ForwardAll, PacketFilter, PinCallback, PumpStateStore, RfcommIo};
use crate::error::{Error, Result};
use crate::transport::frame::Deframer;
use crate::transport::nonce::Nonce;
use crate::transport::packet::{TpCommand, TransportPacket, PRE_PAIRING_ADDRESS};
use crate::transport::state::{InvariantPumpData, PumpSessionState};

/// Tunables for the session engine.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Minimum spacing between consecutive transmissions, so the pump's
    /// internal ring buffer entries are not overwritten ([spec] §4.5).
    pub throttle: Duration,
    /// How many times the PIN callback is retried on `KEY_RESPONSE`
    /// verification failure before pairing is abandoned.
    pub max_pin_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(200),
            max_pin_retries: 3,
        }
    }
}

/// Observable session lifecycle state ([spec] §4.5).
#[derive(Clone, Debug)]
pub enum SessionState {
    Disconnected,
    AwaitingPairingConnection,
    AwaitingKeyResponse,
    AwaitingIdResponse,
    Paired,
    AwaitingRegularConnection,
    Connected,
    Failed(Error),
}

/// A request dispatched onto the worker task; the worker owns all mutable
/// session state so these never race with the receive loop.
enum WorkerCommand {
    Pair {
        pump_address: u8,
        pin: Arc<dyn PinCallback>,
        reply: oneshot::Sender<Result<()>>,
    },
    ConnectRegular {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        command: TpCommand,
        payload: Vec<u8>,
        reliable: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        disconnect_payload: Option<Vec<u8>>,
        reply: oneshot::Sender<()>,
    },
}

/// A synchronous, best-effort mirror of the worker's Tx-nonce and sequence
/// flag, for diagnostics/inspection that shouldn't have to go through the
/// worker's channel. The worker task's own copies remain authoritative.
#[derive(Clone, Copy, Debug, Default)]
pub struct Diagnostics {
    pub last_tx_nonce: Option<Nonce>,
    pub sequence_flag: bool,
}

/// Public handle to a running transport session worker.
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<WorkerCommand>,
    incoming_rx: AsyncMutex<mpsc::UnboundedReceiver<TransportPacket>>,
    state_rx: watch::Receiver<SessionState>,
    diagnostics: Arc<SyncMutex<Diagnostics>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Subscribes to session state changes.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Snapshot of the worker's last-known Tx nonce and sequence flag, for
    /// inspection only; never used to drive protocol decisions.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        *self.diagnostics.lock()
    }

    /// Drives the pairing handshake to completion, prompting for the PIN
    /// via `pin` (possibly more than once, see [spec] §7).
    pub async fn pair(&self, pump_address: u8, pin: Arc<dyn PinCallback>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(WorkerCommand::Pair {
            pump_address,
            pin,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::IllegalState("worker gone"))?
    }

    /// Establishes the regular (post-pairing) connection.
    pub async fn connect_regular(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(WorkerCommand::ConnectRegular { reply }).await?;
        rx.await.map_err(|_| Error::IllegalState("worker gone"))?
    }

    /// Sends a transport-level `DATA` or control packet.
    pub async fn send(&self, command: TpCommand, payload: Vec<u8>, reliable: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(WorkerCommand::Send {
            command,
            payload,
            reliable,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::IllegalState("worker gone"))?
    }

    /// Awaits the next packet delivered by the receive loop (after ACK echo
    /// and transport-level dispatch have already run).
    pub async fn receive_packet(&self) -> Result<TransportPacket> {
        let mut guard = self.incoming_rx.lock().await;
        guard.recv().await.ok_or(Error::IllegalState("worker gone"))
    }

    /// Shuts the session down: optionally transmits a disconnect packet,
    /// then closes the socket and cancels the worker ([spec] §4.5).
    pub async fn stop_io(&self, disconnect_payload: Option<Vec<u8>>) {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(WorkerCommand::Stop {
                disconnect_payload,
                reply,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        self.cancel.cancel();
    }

    async fn dispatch(&self, cmd: WorkerCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::IllegalState("worker gone"))
    }
}

/// Spawns the transport session worker.
pub struct TransportSession;

impl TransportSession {
    /// Starts the worker task for a fresh pairing: no stored keys, Tx nonce
    /// at zero, `pair` must be called before anything else will succeed.
    pub fn start(
        io: Box<dyn RfcommIo>,
        store: Arc<dyn PumpStateStore>,
        filter: Arc<dyn PacketFilter>,
        config: SessionConfig,
    ) -> SessionHandle {
        Self::spawn_worker(
            io,
            store,
            filter,
            config,
            PRE_PAIRING_ADDRESS,
            None,
            PumpSessionState::default(),
            SessionState::Disconnected,
        )
    }

    /// Starts the worker task for a pump that's already paired, loading its
    /// persisted keys and Tx nonce from `store` before the worker ever
    /// touches the wire ([spec] §3: `InvariantPumpData` is persistent and
    /// read-only after pairing; the Tx nonce is persisted across
    /// disconnects). Fails if `store` has no record for `pump_address` —
    /// callers should fall back to [`TransportSession::start`] and `pair`
    /// in that case.
    pub async fn start_resumed(
        io: Box<dyn RfcommIo>,
        store: Arc<dyn PumpStateStore>,
        filter: Arc<dyn PacketFilter>,
        config: SessionConfig,
        pump_address: u8,
    ) -> Result<SessionHandle> {
        let invariant = store.get_invariant(pump_address).await?.ok_or(
            Error::IllegalState("no stored pairing data for this pump address"),
        )?;
        let tx_nonce = store
            .get_tx_nonce(pump_address)
            .await?
            .unwrap_or(Nonce::FIRST_TX);
        Ok(Self::spawn_worker(
            io,
            store,
            filter,
            config,
            pump_address,
            Some(invariant),
            PumpSessionState::new(tx_nonce),
            SessionState::Paired,
        ))
    }

    fn spawn_worker(
        io: Box<dyn RfcommIo>,
        store: Arc<dyn PumpStateStore>,
        filter: Arc<dyn PacketFilter>,
        config: SessionConfig,
        pump_address: u8,
        invariant: Option<InvariantPumpData>,
        session: PumpSessionState,
        initial_state: SessionState,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial_state);
        let cancel = CancellationToken::new();
        let diagnostics = Arc::new(SyncMutex::new(Diagnostics::default()));

        let worker = Worker {
            io,
            store,
            filter: filter.clone(),
            config,
            session,
            invariant,
            pump_address,
            deframer: Deframer::new(),
            pending_frames: VecDeque::new(),
            last_tx: None,
            state_tx,
            incoming_tx,
            diagnostics: diagnostics.clone(),
            cancel: cancel.clone(),
            ignore_errors: false,
            failed_cause: None,
        };
        tokio::spawn(worker.run(cmd_rx));

        SessionHandle {
            cmd_tx,
            incoming_rx: AsyncMutex::new(incoming_rx),
            state_rx,
            diagnostics,
            cancel,
        }
    }
}

/// Default packet filter that forwards every packet, for callers that don't
/// need the [`PacketFilter`] hook.
#[must_use]
pub fn default_filter() -> Arc<dyn PacketFilter> {
    Arc::new(ForwardAll)
}

struct Worker {
    io: Box<dyn RfcommIo>,
    store: Arc<dyn PumpStateStore>,
    filter: Arc<dyn PacketFilter>,
    config: SessionConfig,
    session: PumpSessionState,
    invariant: Option<InvariantPumpData>,
    pump_address: u8,
    deframer: Deframer,
    /// Frames a single `io.receive()` chunk decoded to more than one
    /// complete frame; drained one per loop iteration before the next
    /// socket read.
    pending_frames: VecDeque<Vec<u8>>,
    last_tx: Option<Instant>,
    state_tx: watch::Sender<SessionState>,
    incoming_tx: mpsc::UnboundedSender<TransportPacket>,
    diagnostics: Arc<SyncMutex<Diagnostics>>,
    cancel: CancellationToken,
    ignore_errors: bool,
    /// Set once a fatal transport error has put the session in
    /// `SessionState::Failed`; cleared only by `stop_io`. While set, every
    /// new command fails fast with `Error::BackgroundIo` instead of being
    /// serviced as if the session were healthy.
    failed_cause: Option<Arc<Error>>,
}

impl Worker {
    fn set_state(&self, s: SessionState) {
        debug!(?s, "session state transition");
        let _ = self.state_tx.send(s);
    }

    /// Chooses the outgoing nonce for `command` per the recipe in [spec] §4.5.
    fn nonce_for(&mut self, command: TpCommand) -> Nonce {
        match command {
            TpCommand::RequestPairingConnection
            | TpCommand::RequestKeys
            | TpCommand::GetAvailableKeys => Nonce::NULL,
            TpCommand::RequestId => Nonce::FIRST_TX,
            _ => self.session.next_tx_nonce(),
        }
    }

    /// Builds and authenticates an outgoing packet, applying the throttle.
    async fn send_packet(
        &mut self,
        command: TpCommand,
        payload: Vec<u8>,
        reliable: bool,
        sequence_override: Option<bool>,
    ) -> Result<()> {
        let uses_session_nonce = !matches!(
            command,
            TpCommand::RequestPairingConnection
                | TpCommand::RequestKeys
                | TpCommand::GetAvailableKeys
                | TpCommand::RequestId
        );
        let nonce = self.nonce_for(command);
        let address = match command {
            TpCommand::RequestPairingConnection
            | TpCommand::RequestKeys
            | TpCommand::GetAvailableKeys => PRE_PAIRING_ADDRESS,
            _ => self.pump_address,
        };
        let sequence_bit = match sequence_override {
            Some(b) => b,
            None if reliable => self.session.take_and_toggle_sequence_flag(),
            None => false,
        };

        let mut packet = TransportPacket {
            command,
            sequence_bit,
            reliability_bit: reliable,
            address,
            nonce,
            payload,
            mac: [0; combo_crypto::MAC_LEN],
        };

        if command.is_crc_command() {
            packet.compute_crc16_payload();
        } else if let Some(inv) = &self.invariant {
            let key = TwofishKey::new(&inv.client_to_pump_key);
            packet.authenticate(&key);
        }
        // REQUEST_ID authenticates with the client->pump key just derived
        // during pairing, handled by the caller populating `self.invariant`
        // before this call.

        self.throttle().await;
        let bytes = crate::transport::frame::encode(&packet.to_bytes(true, true));
        self.io.send(&bytes).await?;
        self.last_tx = Some(Instant::now());
        trace!(?command, "sent transport packet");
        {
            let mut d = self.diagnostics.lock();
            d.last_tx_nonce = Some(nonce);
            d.sequence_flag = sequence_bit;
        }

        if uses_session_nonce && self.invariant.is_some() {
            self.persist_tx_nonce().await?;
        }
        Ok(())
    }

    async fn persist_tx_nonce(&self) -> Result<()> {
        self.store
            .set_tx_nonce(self.pump_address, self.session.tx_nonce())
            .await
    }

    async fn throttle(&self) {
        if let Some(last) = self.last_tx {
            let elapsed = last.elapsed();
            if elapsed < self.config.throttle {
                tokio::time::sleep(self.config.throttle - elapsed).await;
            }
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<WorkerCommand>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    break;
                }
                result = self.handle_incoming() => {
                    if let Err(e) = result {
                        if !self.ignore_errors {
                            error!(error = %e, "fatal transport error");
                            self.failed_cause = Some(Arc::new(e.clone()));
                            self.set_state(SessionState::Failed(e));
                        }
                    }
                }
                Some(cmd) = cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }
            }
        }
    }

    /// Pulls one complete frame off the wire, buffering any extras a single
    /// `io.receive()` chunk happened to contain so none are dropped.
    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(frame) = self.pending_frames.pop_front() {
            return Ok(Some(frame));
        }
        let bytes = self.io.receive().await?;
        let mut frames = self.deframer.push(&bytes);
        if frames.is_empty() {
            return Ok(None);
        }
        let first = frames.remove(0);
        self.pending_frames.extend(frames);
        Ok(Some(first))
    }

    /// Reads and parses the next transport packet. Unrecognized command ids
    /// are logged and skipped rather than surfaced as an error ([spec]
    /// §4.4/§7), uniformly for both the pairing loop and the post-pairing
    /// receive loop.
    async fn recv_transport_packet(&mut self) -> Result<Option<TransportPacket>> {
        let Some(raw) = self.recv_frame().await? else {
            return Ok(None);
        };
        match TransportPacket::parse(&raw) {
            Ok(p) => Ok(Some(p)),
            Err(Error::InvalidCommandId(id)) => {
                warn!(id, "unknown transport command id, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Emits `ACK_RESPONSE` for `packet` if its reliability bit is set.
    /// [spec] §8 states this unconditionally for every reliable inbound
    /// packet, with no pairing-phase exception, so both the pairing loop
    /// and the post-pairing receive loop call this.
    async fn ack_if_reliable(&mut self, packet: &TransportPacket) -> Result<()> {
        if packet.reliability_bit {
            self.send_packet(
                TpCommand::AckResponse,
                Vec::new(),
                false,
                Some(packet.sequence_bit),
            )
            .await?;
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: WorkerCommand) {
        if let Some(cause) = self.failed_cause.clone() {
            if !matches!(cmd, WorkerCommand::Stop { .. }) {
                let err = Error::BackgroundIo(cause);
                match cmd {
                    WorkerCommand::Pair { reply, .. } => {
                        let _ = reply.send(Err(err));
                    }
                    WorkerCommand::ConnectRegular { reply } => {
                        let _ = reply.send(Err(err));
                    }
                    WorkerCommand::Send { reply, .. } => {
                        let _ = reply.send(Err(err));
                    }
                    WorkerCommand::Stop { .. } => unreachable!("excluded above"),
                }
                return;
            }
        }
        match cmd {
            WorkerCommand::Pair {
                pump_address,
                pin,
                reply,
            } => {
                let _ = reply.send(self.do_pair(pump_address, pin).await);
            }
            WorkerCommand::ConnectRegular { reply } => {
                let _ = reply.send(self.do_connect_regular().await);
            }
            WorkerCommand::Send {
                command,
                payload,
                reliable,
                reply,
            } => {
                let _ = reply.send(self.send_packet(command, payload, reliable, None).await);
            }
            WorkerCommand::Stop {
                disconnect_payload,
                reply,
            } => {
                self.ignore_errors = true;
                self.failed_cause = None;
                if let Some(payload) = disconnect_payload {
                    let _ = self.send_packet(TpCommand::Disconnect, payload, false, None).await;
                }
                self.io.close();
                self.set_state(SessionState::Disconnected);
                let _ = reply.send(());
            }
        }
    }

    async fn do_pair(&mut self, pump_address: u8, pin: Arc<dyn PinCallback>) -> Result<()> {
        self.pump_address = pump_address;
        self.set_state(SessionState::AwaitingPairingConnection);
        self.send_packet(TpCommand::RequestPairingConnection, Vec::new(), false, None)
            .await?;

        let mut retries_left = self.config.max_pin_retries;
        let mut previous_failed = false;
        loop {
            let Some(packet) = self.recv_transport_packet().await? else {
                continue;
            };
            self.ack_if_reliable(&packet).await?;
            match packet.command {
                TpCommand::PairingConnectionRequestAccepted => {
                    self.send_packet(TpCommand::RequestKeys, Vec::new(), false, None)
                        .await?;
                    self.send_packet(TpCommand::GetAvailableKeys, Vec::new(), false, None)
                        .await?;
                    self.set_state(SessionState::AwaitingKeyResponse);
                }
                TpCommand::KeyResponse => {
                    let pin_value = pin.request_pin(previous_failed).await?;
                    let weak = combo_crypto::weak_key_from_pin(pin_value);
                    if !packet.verify(&weak) {
                        previous_failed = true;
                        if retries_left == 0 {
                            return Err(Error::PairingAborted);
                        }
                        retries_left -= 1;
                        continue;
                    }
                    let (client_to_pump, pump_to_client) = split_keys(&packet.payload)?;
                    let key_response_address = InvariantPumpData::swap_nibbles(packet.address);
                    self.pump_address = key_response_address;
                    self.invariant = Some(InvariantPumpData {
                        client_to_pump_key: client_to_pump,
                        pump_to_client_key: pump_to_client,
                        key_response_address,
                        pump_id: String::new(),
                    });
                    self.set_state(SessionState::AwaitingIdResponse);

                    let mut payload = Vec::with_capacity(17);
                    payload.extend_from_slice(&0x0001_0000u32.to_le_bytes());
                    let mut name = [0u8; 13];
                    let bt_name = b"test-bt-name";
                    name[..bt_name.len()].copy_from_slice(bt_name);
                    payload.extend_from_slice(&name);
                    self.send_packet(TpCommand::RequestId, payload, false, None)
                        .await?;
                }
                TpCommand::IdResponse => {
                    if packet.payload.len() < 17 {
                        return Err(Error::InvalidPayload {
                            reason: format!(
                                "ID_RESPONSE payload too short: {} bytes",
                                packet.payload.len()
                            ),
                        });
                    }
                    let server_id = u32::from_le_bytes(
                        packet.payload[0..4].try_into().expect("4 bytes"),
                    );
                    let pump_id = parse_nul_terminated(&packet.payload[4..17]);
                    let _ = server_id;
                    if let Some(inv) = &mut self.invariant {
                        inv.pump_id = pump_id;
                        self.store.create(self.pump_address, inv.clone()).await?;
                    }
                    self.session.set_tx_nonce(Nonce::FIRST_TX);
                    self.persist_tx_nonce().await?;
                    self.set_state(SessionState::Paired);
                    return Ok(());
                }
                TpCommand::ErrorResponse => {
                    let error_id = u16::from_le_bytes(
                        packet.payload[0..2].try_into().unwrap_or([0, 0]),
                    );
                    return Err(Error::ErrorResponse { error_id });
                }
                other => {
                    warn!(?other, "unexpected packet during pairing, dropping");
                }
            }
        }
    }

    async fn do_connect_regular(&mut self) -> Result<()> {
        self.set_state(SessionState::AwaitingRegularConnection);
        self.send_packet(TpCommand::RequestRegularConnection, Vec::new(), false, None)
            .await
    }

    /// Implements the incoming-packet loop of [spec] §4.5. Returns `Ok(())`
    /// both when a packet was fully processed and when `recv_frame` had
    /// nothing to deliver yet; only a genuine I/O or protocol failure is an
    /// `Err`.
    async fn handle_incoming(&mut self) -> Result<()> {
        let Some(mut packet) = self.recv_transport_packet().await? else {
            return Ok(());
        };

        if packet.command != TpCommand::KeyResponse {
            if let Some(inv) = &self.invariant {
                let key = TwofishKey::new(&inv.pump_to_client_key);
                if !packet.verify(&key) {
                    return Err(Error::PacketVerification);
                }
            }
        }

        self.ack_if_reliable(&packet).await?;

        match packet.command {
            TpCommand::RegularConnectionRequestAccepted => {
                self.session.reset_sequence_flag();
                self.set_state(SessionState::Connected);
            }
            TpCommand::ErrorResponse => {
                let error_id = u16::from_le_bytes(packet.payload[0..2].try_into().unwrap_or([0, 0]));
                return Err(Error::ErrorResponse { error_id });
            }
            TpCommand::AckResponse => return Ok(()),
            TpCommand::RequestPairingConnection
            | TpCommand::RequestKeys
            | TpCommand::GetAvailableKeys
            | TpCommand::RequestRegularConnection
            | TpCommand::RequestId
            | TpCommand::Disconnect => {
                warn!(?packet.command, "outgoing-only command received, dropping");
                return Ok(());
            }
            _ => {}
        }

        if self.filter.filter(&mut packet) == FilterDecision::Drop {
            return Ok(());
        }
        let _ = self.incoming_tx.send(packet);
        Ok(())
    }
}

fn split_keys(payload: &[u8]) -> Result<([u8; 16], [u8; 16])> {
    if payload.len() < 32 {
        return Err(Error::InvalidPayload {
            reason: format!("KEY_RESPONSE payload too short: {} bytes", payload.len()),
        });
    }
    let client_to_pump: [u8; 16] = payload[0..16].try_into().expect("16 bytes");
    let pump_to_client: [u8; 16] = payload[16..32].try_into().expect("16 bytes");
    Ok((client_to_pump, pump_to_client))
}

fn parse_nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

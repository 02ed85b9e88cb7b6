#[cfg(test)]
mod association_test;

mod association_internal;
mod association_stats;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_payload_data::PayloadProtocolIdentifier;
use crate::error::{Error, Result};
use crate::stream::Stream;
use crate::timer::ack_timer::{AckTimer, ACK_INTERVAL};
use crate::timer::rtx_timer::{RtxTimer, RtxTimerId, MAX_INIT_RETRANS, MAX_SHUTDOWN_RETRANS, NO_MAX_RETRANS};
use crate::transport::SecuredTransport;

use association_internal::*;
use association_stats::*;

/// buffer size for inbound datagrams from the secured transport
pub(crate) const RECEIVE_MTU: usize = 8192;
/// conservative MTU for outbound packets, fits any DTLS path
pub(crate) const INITIAL_MTU: u32 = 1228;
pub(crate) const INITIAL_RECV_BUF_SIZE: u32 = 1024 * 1024;
pub(crate) const COMMON_HEADER_SIZE: u32 = 12;
pub(crate) const DATA_CHUNK_HEADER_SIZE: u32 = 16;
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE: u32 = 65536;

pub(crate) const ACCEPT_CH_SIZE: usize = 16;

/// Association states per RFC 4960 sec 4, stored as an atomic u8 so streams
/// can gate sends without locking the internal state.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum AssociationState {
    Closed = 0,
    CookieWait = 1,
    CookieEchoed = 2,
    Established = 3,
    ShutdownAckSent = 4,
    ShutdownPending = 5,
    ShutdownReceived = 6,
    ShutdownSent = 7,
}

impl From<u8> for AssociationState {
    fn from(v: u8) -> AssociationState {
        match v {
            1 => AssociationState::CookieWait,
            2 => AssociationState::CookieEchoed,
            3 => AssociationState::Established,
            4 => AssociationState::ShutdownAckSent,
            5 => AssociationState::ShutdownPending,
            6 => AssociationState::ShutdownReceived,
            7 => AssociationState::ShutdownSent,
            _ => AssociationState::Closed,
        }
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AssociationState::Closed => "Closed",
            AssociationState::CookieWait => "CookieWait",
            AssociationState::CookieEchoed => "CookieEchoed",
            AssociationState::Established => "Established",
            AssociationState::ShutdownPending => "ShutdownPending",
            AssociationState::ShutdownSent => "ShutdownSent",
            AssociationState::ShutdownReceived => "ShutdownReceived",
            AssociationState::ShutdownAckSent => "ShutdownAckSent",
        };
        write!(f, "{s}")
    }
}

/// Delayed-ack behavior override, used by tests to pin the ack path.
#[derive(Default, Debug, Copy, Clone, PartialEq)]
pub(crate) enum AckMode {
    #[default]
    Normal,
    NoDelay,
    AlwaysDelay,
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AckMode::Normal => "Normal",
            AckMode::NoDelay => "NoDelay",
            AckMode::AlwaysDelay => "AlwaysDelay",
        };
        write!(f, "{s}")
    }
}

/// Ack transmission state.
#[derive(Default, Debug, Copy, Clone, PartialEq)]
pub(crate) enum AckState {
    /// ack timer is off
    #[default]
    Idle,
    /// will send ack at the next write-loop pass
    Immediate,
    /// ack timer is on, ack is being delayed
    Delay,
}

impl fmt::Display for AckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AckState::Idle => "Idle",
            AckState::Immediate => "Immediate",
            AckState::Delay => "Delay",
        };
        write!(f, "{s}")
    }
}

/// Arguments for creating an association. The ports come from the
/// negotiation layer (SDP), the transport from the DTLS stack.
pub struct Config {
    pub transport: Arc<dyn SecuredTransport + Send + Sync>,
    pub local_port: u16,
    pub remote_port: u16,
    pub max_receive_buffer_size: u32,
    pub max_message_size: u32,
    pub name: String,
}

/// One SCTP association: the single long-lived entity per peer connection.
///
/// This is the handle the upper layer holds; all protocol state lives in the
/// internal struct behind the mutex, fed by a read loop (inbound packets), a
/// write loop (gathered outbound packets), and the timer tasks. Exactly one
/// of those is ever mutating the state at a time.
pub struct Association {
    name: String,
    state: Arc<AtomicU8>,
    max_message_size: Arc<AtomicU32>,
    inflight_queue_length: Arc<AtomicUsize>,
    will_send_shutdown: Arc<AtomicBool>,
    awake_write_loop_ch: Arc<mpsc::Sender<()>>,
    close_loop_ch_rx: Mutex<broadcast::Receiver<()>>,
    accept_ch_rx: Mutex<mpsc::Receiver<Arc<Stream>>>,
    transport: Arc<dyn SecuredTransport + Send + Sync>,
    bytes_received: Arc<AtomicUsize>,
    bytes_sent: Arc<AtomicUsize>,

    pub(crate) association_internal: Arc<Mutex<AssociationInternal>>,
}

impl Association {
    /// Waits for a peer's handshake and accepts the association
    /// (the passive, "server", side).
    pub async fn server(config: Config) -> Result<Self> {
        let (a, mut handshake_completed_ch_rx) = Association::new(config, false).await?;

        match handshake_completed_ch_rx.recv().await {
            Some(None) => Ok(a),
            Some(Some(err)) => Err(err),
            None => Err(Error::ErrAssociationHandshakeClosed),
        }
    }

    /// Initiates the handshake and establishes the association
    /// (the active, "client", side).
    pub async fn client(config: Config) -> Result<Self> {
        let (a, mut handshake_completed_ch_rx) = Association::new(config, true).await?;

        match handshake_completed_ch_rx.recv().await {
            Some(None) => Ok(a),
            Some(Some(err)) => Err(err),
            None => Err(Error::ErrAssociationHandshakeClosed),
        }
    }

    /// Initiates the graceful shutdown sequence and blocks until it
    /// completes. New sends are refused immediately; outstanding data is
    /// drained first per RFC 4960 sec 9.2.
    pub async fn shutdown(&self) -> Result<()> {
        log::debug!("[{}] closing association..", self.name);

        if self.get_state() != AssociationState::Established {
            return Err(Error::ErrShutdownNonEstablished);
        }

        self.set_state(AssociationState::ShutdownPending);

        if self.inflight_queue_length.load(Ordering::SeqCst) == 0 {
            // No more outstanding, send SHUTDOWN now.
            self.will_send_shutdown.store(true, Ordering::SeqCst);
            let _ = self.awake_write_loop_ch.try_send(());
            self.set_state(AssociationState::ShutdownSent);
        }

        {
            let mut close_loop_ch_rx = self.close_loop_ch_rx.lock().await;
            let _ = close_loop_ch_rx.recv().await;
        }

        Ok(())
    }

    /// Tears the association down immediately and cleans up state.
    pub async fn close(&self) -> Result<()> {
        log::debug!("[{}] closing association..", self.name);

        let _ = self.transport.close().await;

        let mut ai = self.association_internal.lock().await;
        ai.close().await
    }

    async fn new(config: Config, is_client: bool) -> Result<(Self, mpsc::Receiver<Option<Error>>)> {
        let transport = Arc::clone(&config.transport);

        let (awake_write_loop_ch_tx, awake_write_loop_ch_rx) = mpsc::channel(1);
        let (accept_ch_tx, accept_ch_rx) = mpsc::channel(ACCEPT_CH_SIZE);
        let (handshake_completed_ch_tx, handshake_completed_ch_rx) = mpsc::channel(1);
        let (close_loop_ch_tx, close_loop_ch_rx) = broadcast::channel(1);
        let (close_loop_ch_rx1, close_loop_ch_rx2) =
            (close_loop_ch_tx.subscribe(), close_loop_ch_tx.subscribe());
        let awake_write_loop_ch = Arc::new(awake_write_loop_ch_tx);

        let ai = AssociationInternal::new(
            config,
            close_loop_ch_tx,
            accept_ch_tx,
            handshake_completed_ch_tx,
            Arc::clone(&awake_write_loop_ch),
        );

        let bytes_received = Arc::new(AtomicUsize::new(0));
        let bytes_sent = Arc::new(AtomicUsize::new(0));
        let name = ai.name.clone();
        let state = Arc::clone(&ai.state);
        let max_message_size = Arc::clone(&ai.max_message_size);
        let inflight_queue_length = Arc::clone(&ai.inflight_queue_length);
        let will_send_shutdown = Arc::clone(&ai.will_send_shutdown);

        let mut init = ChunkInit {
            initial_tsn: ai.my_next_tsn,
            num_outbound_streams: ai.my_max_num_outbound_streams,
            num_inbound_streams: ai.my_max_num_inbound_streams,
            initiate_tag: ai.my_verification_tag,
            advertised_receiver_window_credit: ai.max_receive_buffer_size,
            ..Default::default()
        };
        init.set_supported_extensions();

        let association_internal = Arc::new(Mutex::new(ai));

        {
            let weak = Arc::downgrade(&association_internal);

            let mut ai = association_internal.lock().await;
            ai.t1init = Some(RtxTimer::new(
                weak.clone(),
                RtxTimerId::T1Init,
                MAX_INIT_RETRANS,
            ));
            ai.t1cookie = Some(RtxTimer::new(
                weak.clone(),
                RtxTimerId::T1Cookie,
                MAX_INIT_RETRANS,
            ));
            ai.t2shutdown = Some(RtxTimer::new(
                weak.clone(),
                RtxTimerId::T2Shutdown,
                MAX_SHUTDOWN_RETRANS,
            ));
            ai.t3rtx = Some(RtxTimer::new(weak.clone(), RtxTimerId::T3Rtx, NO_MAX_RETRANS));
            ai.treconfig = Some(RtxTimer::new(
                weak.clone(),
                RtxTimerId::Reconfig,
                NO_MAX_RETRANS,
            ));
            ai.ack_timer = Some(AckTimer::new(weak, ACK_INTERVAL));
        }

        {
            let name = name.clone();
            let bytes_received = Arc::clone(&bytes_received);
            let transport = Arc::clone(&transport);
            let association_internal = Arc::clone(&association_internal);
            tokio::spawn(async move {
                Association::read_loop(
                    name,
                    bytes_received,
                    transport,
                    close_loop_ch_rx1,
                    association_internal,
                )
                .await;
            });
        }

        {
            let name = name.clone();
            let bytes_sent = Arc::clone(&bytes_sent);
            let transport = Arc::clone(&transport);
            let association_internal = Arc::clone(&association_internal);
            tokio::spawn(async move {
                Association::write_loop(
                    name,
                    bytes_sent,
                    transport,
                    close_loop_ch_rx2,
                    association_internal,
                    awake_write_loop_ch_rx,
                )
                .await;
            });
        }

        if is_client {
            let mut ai = association_internal.lock().await;
            ai.set_state(AssociationState::CookieWait);
            ai.stored_init = Some(init);
            ai.send_init()?;
            let rto = ai.rto_mgr.get_rto();
            if let Some(t1init) = &ai.t1init {
                t1init.start(rto).await;
            }
        }

        Ok((
            Association {
                name,
                state,
                max_message_size,
                inflight_queue_length,
                will_send_shutdown,
                awake_write_loop_ch,
                close_loop_ch_rx: Mutex::new(close_loop_ch_rx),
                accept_ch_rx: Mutex::new(accept_ch_rx),
                transport,
                bytes_received,
                bytes_sent,
                association_internal,
            },
            handshake_completed_ch_rx,
        ))
    }

    /// Feeds inbound datagrams into the association, one at a time.
    async fn read_loop(
        name: String,
        bytes_received: Arc<AtomicUsize>,
        transport: Arc<dyn SecuredTransport + Send + Sync>,
        mut close_loop_ch: broadcast::Receiver<()>,
        association_internal: Arc<Mutex<AssociationInternal>>,
    ) {
        log::debug!("[{}] read_loop entered", name);

        let mut buffer = vec![0u8; RECEIVE_MTU];
        let mut done = false;
        while !done {
            let n = tokio::select! {
                _ = close_loop_ch.recv() => break,
                result = transport.recv(&mut buffer) => {
                    match result {
                        Ok(n) => n,
                        Err(err) => {
                            log::warn!("[{}] failed to read packets on transport: {}", name, err);
                            break;
                        }
                    }
                }
            };

            // The payload travels to the reassembly queue without further
            // copies, so detach it from the receive buffer here.
            let inbound = Bytes::from(buffer[..n].to_vec());
            bytes_received.fetch_add(n, Ordering::SeqCst);

            {
                let mut ai = association_internal.lock().await;
                if let Err(err) = ai.handle_inbound(&inbound).await {
                    log::warn!("[{}] failed to handle_inbound: {:?}", name, err);
                    done = true;
                }
            }
        }

        {
            let mut ai = association_internal.lock().await;
            if let Err(err) = ai.close().await {
                log::warn!("[{}] failed to close association: {:?}", name, err);
            }
        }

        log::debug!("[{}] read_loop exited", name);
    }

    /// Drains gathered outbound packets to the transport whenever the
    /// association signals there is something to send.
    async fn write_loop(
        name: String,
        bytes_sent: Arc<AtomicUsize>,
        transport: Arc<dyn SecuredTransport + Send + Sync>,
        mut close_loop_ch: broadcast::Receiver<()>,
        association_internal: Arc<Mutex<AssociationInternal>>,
        mut awake_write_loop_ch: mpsc::Receiver<()>,
    ) {
        log::debug!("[{}] write_loop entered", name);

        let mut done = false;
        while !done {
            let (packets, continue_loop) = {
                let mut ai = association_internal.lock().await;
                ai.gather_outbound().await
            };

            let mut buf = BytesMut::with_capacity(16 * 1024);
            for raw in packets {
                buf.clear();
                if let Err(err) = raw.marshal_to(&mut buf) {
                    log::warn!("[{}] failed to serialize a packet: {:?}", name, err);
                    continue;
                }
                match transport.send(buf.as_ref()).await {
                    Ok(_) => {
                        bytes_sent.fetch_add(buf.len(), Ordering::SeqCst);
                    }
                    Err(err) => {
                        log::warn!("[{}] failed to write packets on transport: {}", name, err);
                        done = true;
                        break;
                    }
                }
            }

            if !continue_loop || done {
                break;
            }

            tokio::select! {
                _ = awake_write_loop_ch.recv() => {}
                _ = close_loop_ch.recv() => {
                    done = true;
                }
            }
        }

        {
            let mut ai = association_internal.lock().await;
            if let Err(err) = ai.close().await {
                log::warn!("[{}] failed to close association: {:?}", name, err);
            }
        }

        log::debug!("[{}] write_loop exited", name);
    }

    /// Number of bytes sent to the transport.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// Number of bytes received from the transport.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received.load(Ordering::SeqCst)
    }

    /// Opens a stream with the given identifier.
    pub async fn open_stream(
        &self,
        stream_identifier: u16,
        default_payload_type: PayloadProtocolIdentifier,
    ) -> Result<Arc<Stream>> {
        let mut ai = self.association_internal.lock().await;
        ai.open_stream(stream_identifier, default_payload_type)
    }

    /// Waits for the next stream the peer opens. Returns `None` once the
    /// association is closed.
    pub async fn accept_stream(&self) -> Option<Arc<Stream>> {
        let mut accept_ch_rx = self.accept_ch_rx.lock().await;
        accept_ch_rx.recv().await
    }

    /// The maximum message size accepted by `Stream::write`.
    pub fn max_message_size(&self) -> u32 {
        self.max_message_size.load(Ordering::SeqCst)
    }

    /// Updates the maximum message size accepted by `Stream::write`.
    pub fn set_max_message_size(&self, max_message_size: u32) {
        self.max_message_size
            .store(max_message_size, Ordering::SeqCst);
    }

    fn set_state(&self, new_state: AssociationState) {
        let old_state = AssociationState::from(self.state.swap(new_state as u8, Ordering::SeqCst));
        if new_state != old_state {
            log::debug!(
                "[{}] state change: '{}' => '{}'",
                self.name,
                old_state,
                new_state,
            );
        }
    }

    fn get_state(&self) -> AssociationState {
        self.state.load(Ordering::SeqCst).into()
    }
}

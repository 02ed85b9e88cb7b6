#[cfg(test)]
mod data_channel_test;

use std::fmt;
use std::future::Future;
use std::net::Shutdown;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use arc_swap::ArcSwapOption;
use bytes::{Buf, Bytes};
use sctp::association::Association;
use sctp::chunk::chunk_payload_data::PayloadProtocolIdentifier;
use sctp::stream::{ReliabilityType, Stream};
use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};
use crate::marshal::{Marshal, Unmarshal};
use crate::message::message_channel_ack::*;
use crate::message::message_channel_open::*;
use crate::message::*;

const RECEIVE_MTU: usize = 8192;
/// large enough for any message under the default maximum message size
const DATA_CHANNEL_BUFFER_SIZE: usize = 65536;

/// Configuration of one data channel, mirroring the DATA_CHANNEL_OPEN body.
#[derive(Eq, PartialEq, Default, Clone, Debug)]
pub struct Config {
    pub channel_type: ChannelType,
    pub negotiated: bool,
    pub priority: u16,
    pub reliability_parameter: u32,
    pub label: String,
    pub protocol: String,
}

/// Data channel lifecycle states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for DataChannelState {
    fn from(v: u8) -> DataChannelState {
        match v {
            1 => DataChannelState::Open,
            2 => DataChannelState::Closing,
            3 => DataChannelState::Closed,
            _ => DataChannelState::Connecting,
        }
    }
}

impl fmt::Display for DataChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            DataChannelState::Connecting => "Connecting",
            DataChannelState::Open => "Open",
            DataChannelState::Closing => "Closing",
            DataChannelState::Closed => "Closed",
        };
        write!(f, "{s}")
    }
}

/// One message delivered by a data channel.
#[derive(Debug, Clone)]
pub struct DataChannelMessage {
    pub is_string: bool,
    pub data: Bytes,
}

pub type OnMessageHdlrFn = Box<
    dyn (FnMut(DataChannelMessage) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnOpenHdlrFn =
    Box<dyn (FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

pub type OnCloseHdlrFn =
    Box<dyn (FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

pub type OnErrorHdlrFn = Box<
    dyn (FnMut(Error) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;

/// A data channel: a logical, bidirectional message pipe layered on one SCTP
/// stream pair.
///
/// Locally opened channels send DATA_CHANNEL_OPEN and stay `Connecting`
/// until the peer's ACK; remotely opened channels are `Open` on creation.
/// User payload and DCEP control traffic share the stream, told apart by the
/// payload protocol identifier.
pub struct DataChannel {
    pub config: Config,
    stream: Arc<Stream>,
    ready_state: Arc<AtomicU8>,

    on_open_handler: SyncMutex<Option<OnOpenHdlrFn>>,
    on_message_handler: Arc<ArcSwapOption<Mutex<OnMessageHdlrFn>>>,
    on_close_handler: Arc<ArcSwapOption<Mutex<OnCloseHdlrFn>>>,
    on_error_handler: Arc<ArcSwapOption<Mutex<OnErrorHdlrFn>>>,

    notify_tx: Arc<Notify>,

    // stats
    messages_sent: AtomicUsize,
    messages_received: AtomicUsize,
    bytes_sent: AtomicUsize,
    bytes_received: AtomicUsize,
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("config", &self.config)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl DataChannel {
    pub(crate) fn new(stream: Arc<Stream>, config: Config, state: DataChannelState) -> Self {
        Self {
            config,
            stream,
            ready_state: Arc::new(AtomicU8::new(state as u8)),

            on_open_handler: SyncMutex::new(None),
            on_message_handler: Arc::new(ArcSwapOption::empty()),
            on_close_handler: Arc::new(ArcSwapOption::empty()),
            on_error_handler: Arc::new(ArcSwapOption::empty()),

            notify_tx: Arc::new(Notify::new()),

            messages_sent: AtomicUsize::default(),
            messages_received: AtomicUsize::default(),
            bytes_sent: AtomicUsize::default(),
            bytes_received: AtomicUsize::default(),
        }
    }

    /// Opens a data channel on the given stream identifier (the local side
    /// of the DCEP exchange, or either side of a negotiated channel).
    pub async fn dial(
        association: &Arc<Association>,
        identifier: u16,
        config: Config,
    ) -> Result<Self> {
        let stream = association
            .open_stream(identifier, PayloadProtocolIdentifier::Binary)
            .await?;

        if config.negotiated {
            // Out-of-band agreement: no DCEP, usable right away.
            let dc = DataChannel::new(stream, config, DataChannelState::Open);
            dc.commit_reliability_params();
            Ok(dc)
        } else {
            let msg = Message::DataChannelOpen(DataChannelOpen {
                channel_type: config.channel_type,
                priority: config.priority,
                reliability_parameter: config.reliability_parameter,
                label: config.label.bytes().collect(),
                protocol: config.protocol.bytes().collect(),
            })
            .marshal()?;

            stream
                .write_sctp(&msg, PayloadProtocolIdentifier::Dcep)
                .await?;

            Ok(DataChannel::new(
                stream,
                config,
                DataChannelState::Connecting,
            ))
        }
    }

    /// Accepts a data channel the peer opened: waits for a new stream,
    /// reads its DATA_CHANNEL_OPEN, and replies with the ACK.
    pub async fn accept(association: &Arc<Association>, mut config: Config) -> Result<Self> {
        let stream = association
            .accept_stream()
            .await
            .ok_or(Error::ErrAssociationClosed)?;

        stream.set_default_payload_type(PayloadProtocolIdentifier::Binary);

        let mut buf = vec![0u8; RECEIVE_MTU];
        let (n, ppi) = stream.read_sctp(&mut buf).await?;

        if ppi != PayloadProtocolIdentifier::Dcep {
            return Err(Error::InvalidPayloadProtocolIdentifier(ppi as u32));
        }

        let mut read_buf = &buf[..n];
        let msg = Message::unmarshal(&mut read_buf)?;

        if let Message::DataChannelOpen(dco) = msg {
            config.channel_type = dco.channel_type;
            config.priority = dco.priority;
            config.reliability_parameter = dco.reliability_parameter;
            config.label = String::from_utf8(dco.label)?;
            config.protocol = String::from_utf8(dco.protocol)?;
        } else {
            return Err(Error::InvalidMessageType(msg.message_type() as u8));
        };

        // A remotely initiated channel is open the moment it exists.
        let data_channel = DataChannel::new(stream, config, DataChannelState::Open);

        data_channel.write_data_channel_ack().await?;
        data_channel.commit_reliability_params();

        Ok(data_channel)
    }

    /// Current lifecycle state.
    pub fn ready_state(&self) -> DataChannelState {
        self.ready_state.load(Ordering::SeqCst).into()
    }

    /// The SCTP stream identifier this channel runs on.
    pub fn stream_identifier(&self) -> u16 {
        self.stream.stream_identifier()
    }

    /// Sets the handler invoked once the channel reaches `Open`. Invoked
    /// immediately if it already has.
    pub fn on_open(&self, f: OnOpenHdlrFn) {
        {
            let mut on_open_handler = self.on_open_handler.lock().unwrap();
            *on_open_handler = Some(f);
        }

        if self.ready_state() == DataChannelState::Open {
            self.do_open();
        }
    }

    fn do_open(&self) {
        let on_open_handler = { self.on_open_handler.lock().unwrap().take() };
        if let Some(f) = on_open_handler {
            tokio::spawn(async move {
                f().await;
            });
        }
    }

    /// Sets the handler invoked for every inbound message.
    pub fn on_message(&self, f: OnMessageHdlrFn) {
        self.on_message_handler.store(Some(Arc::new(Mutex::new(f))));
    }

    async fn do_message(&self, msg: DataChannelMessage) {
        if let Some(handler) = &*self.on_message_handler.load() {
            let mut f = handler.lock().await;
            f(msg).await;
        }
    }

    /// Sets the handler invoked when the channel transitions to `Closed`.
    pub fn on_close(&self, f: OnCloseHdlrFn) {
        self.on_close_handler.store(Some(Arc::new(Mutex::new(f))));
    }

    async fn do_close(&self) {
        if let Some(handler) = &*self.on_close_handler.load() {
            let mut f = handler.lock().await;
            f().await;
        }
    }

    /// Sets the handler invoked on channel errors. An error is always
    /// followed by the close handler.
    pub fn on_error(&self, f: OnErrorHdlrFn) {
        self.on_error_handler.store(Some(Arc::new(Mutex::new(f))));
    }

    async fn do_error(&self, err: Error) {
        if let Some(handler) = &*self.on_error_handler.load() {
            let mut f = handler.lock().await;
            f(err).await;
        }
    }

    /// Spawns the event loop dispatching inbound traffic to the `on_*`
    /// handlers. Call once after the handlers are installed.
    pub fn start(self: &Arc<Self>) {
        let dc = Arc::clone(self);
        let notify_rx = dc.notify_tx.clone();
        tokio::spawn(async move {
            let mut buffer = vec![0u8; DATA_CHANNEL_BUFFER_SIZE];
            loop {
                let (n, ppi) = tokio::select! {
                    _ = notify_rx.notified() => break,
                    result = dc.stream.read_sctp(&mut buffer) => match result {
                        Ok((0, PayloadProtocolIdentifier::Unknown)) => {
                            // the stream was reset or shut down
                            dc.set_closed().await;
                            break;
                        }
                        Ok((n, ppi)) => (n, ppi),
                        Err(err) => {
                            dc.do_error(err.into()).await;
                            dc.set_closed().await;
                            break;
                        }
                    }
                };

                if let Err(err) = dc.handle_inbound(&buffer[..n], ppi).await {
                    dc.do_error(err).await;
                    dc.set_closed().await;
                    break;
                }
            }
        });
    }

    async fn handle_inbound(&self, data: &[u8], ppi: PayloadProtocolIdentifier) -> Result<()> {
        match ppi {
            PayloadProtocolIdentifier::Dcep => {
                let mut data = data;
                self.handle_dcep(&mut data).await
            }
            PayloadProtocolIdentifier::String | PayloadProtocolIdentifier::StringEmpty => {
                self.deliver_message(true, data, ppi).await;
                Ok(())
            }
            PayloadProtocolIdentifier::Binary | PayloadProtocolIdentifier::BinaryEmpty => {
                self.deliver_message(false, data, ppi).await;
                Ok(())
            }
            other => Err(Error::InvalidPayloadProtocolIdentifier(other as u32)),
        }
    }

    async fn deliver_message(
        &self,
        is_string: bool,
        data: &[u8],
        ppi: PayloadProtocolIdentifier,
    ) {
        // Empty messages travel as a single zero byte under an "empty" PPID
        // (RFC 8831 sec 6.6).
        let data = match ppi {
            PayloadProtocolIdentifier::StringEmpty | PayloadProtocolIdentifier::BinaryEmpty => {
                Bytes::new()
            }
            _ => Bytes::copy_from_slice(data),
        };

        self.messages_received.fetch_add(1, Ordering::SeqCst);
        self.bytes_received.fetch_add(data.len(), Ordering::SeqCst);

        self.do_message(DataChannelMessage { is_string, data }).await;
    }

    async fn handle_dcep<B>(&self, data: &mut B) -> Result<()>
    where
        B: Buf,
    {
        let msg = Message::unmarshal(data)?;

        match msg {
            Message::DataChannelOpen(_) => {
                log::debug!("received DATA_CHANNEL_OPEN on stream {}", self.stream_identifier());
                // A pre-negotiated stream id must never see an in-band open;
                // that is an id-coordination failure on the application side.
                if self.config.negotiated {
                    return Err(Error::ErrChannelIdInUse);
                }
                self.write_data_channel_ack().await?;
            }
            Message::DataChannelAck(_) => {
                log::debug!("received DATA_CHANNEL_ACK on stream {}", self.stream_identifier());
                self.commit_reliability_params();
                if self.ready_state() == DataChannelState::Connecting {
                    self.set_ready_state(DataChannelState::Open);
                    self.do_open();
                }
            }
        };

        Ok(())
    }

    /// Reads the next user message into `buf` (pull flavor of the API).
    /// DCEP traffic is consumed internally. Returns 0 at end of stream.
    pub async fn read_data_channel(&self, buf: &mut [u8]) -> Result<(usize, bool)> {
        loop {
            let (mut n, ppi) = match self.stream.read_sctp(buf).await {
                Ok((0, PayloadProtocolIdentifier::Unknown)) => {
                    // the stream was reset or the reading half shut down
                    return Ok((0, false));
                }
                Ok((n, ppi)) => (n, ppi),
                Err(err) => {
                    self.close().await?;
                    return Err(err.into());
                }
            };

            let mut is_string = false;
            match ppi {
                PayloadProtocolIdentifier::Dcep => {
                    let mut data = &buf[..n];
                    if let Err(err) = self.handle_dcep(&mut data).await {
                        log::error!("failed to handle DCEP: {:?}", err);
                    }
                    continue;
                }
                PayloadProtocolIdentifier::String | PayloadProtocolIdentifier::StringEmpty => {
                    is_string = true;
                }
                _ => {}
            };

            if let PayloadProtocolIdentifier::StringEmpty | PayloadProtocolIdentifier::BinaryEmpty =
                ppi
            {
                n = 0;
            }

            self.messages_received.fetch_add(1, Ordering::SeqCst);
            self.bytes_received.fetch_add(n, Ordering::SeqCst);

            return Ok((n, is_string));
        }
    }

    /// Sends `data` as one binary message.
    pub async fn write(&self, data: &Bytes) -> Result<usize> {
        self.write_data_channel(data, false).await
    }

    /// Sends `data` as one message, string or binary.
    ///
    /// Fails with `ErrChannelNotOpened` unless the channel is `Open`.
    pub async fn write_data_channel(&self, data: &Bytes, is_string: bool) -> Result<usize> {
        if self.ready_state() != DataChannelState::Open {
            return Err(Error::ErrChannelNotOpened);
        }

        let data_len = data.len();

        // RFC 8831 sec 6.6: SCTP cannot carry empty user messages, so an
        // empty message is one zero byte under an "empty" PPID.
        let ppi = match (is_string, data_len) {
            (false, 0) => PayloadProtocolIdentifier::BinaryEmpty,
            (false, _) => PayloadProtocolIdentifier::Binary,
            (true, 0) => PayloadProtocolIdentifier::StringEmpty,
            (true, _) => PayloadProtocolIdentifier::String,
        };

        let n = if data_len == 0 {
            let _ = self
                .stream
                .write_sctp(&Bytes::from_static(&[0]), ppi)
                .await?;
            0
        } else {
            let n = self.stream.write_sctp(data, ppi).await?;
            self.bytes_sent.fetch_add(n, Ordering::SeqCst);
            n
        };

        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    async fn write_data_channel_ack(&self) -> Result<usize> {
        let ack = Message::DataChannelAck(DataChannelAck {}).marshal()?;
        Ok(self
            .stream
            .write_sctp(&ack, PayloadProtocolIdentifier::Dcep)
            .await?)
    }

    /// Closes this channel by resetting the underlying outgoing stream
    /// (RFC 8831 sec 6.7). The peer's direction closes independently when
    /// its own reset arrives.
    pub async fn close(&self) -> Result<()> {
        let state = self.ready_state();
        if state == DataChannelState::Closed || state == DataChannelState::Closing {
            return Ok(());
        }
        self.set_ready_state(DataChannelState::Closing);

        Ok(self.stream.shutdown(Shutdown::Both).await?)
    }

    async fn set_closed(&self) {
        let prev: DataChannelState = self
            .ready_state
            .swap(DataChannelState::Closed as u8, Ordering::SeqCst)
            .into();
        if prev != DataChannelState::Closed {
            self.do_close().await;
        }
    }

    fn set_ready_state(&self, state: DataChannelState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }

    /// Stops the event loop. Does not close the channel.
    pub fn stop(&self) {
        self.notify_tx.notify_waiters();
    }

    /// Messages sent over this channel.
    pub fn messages_sent(&self) -> usize {
        self.messages_sent.load(Ordering::SeqCst)
    }

    /// Messages received over this channel.
    pub fn messages_received(&self) -> usize {
        self.messages_received.load(Ordering::SeqCst)
    }

    /// Payload bytes sent over this channel.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// Payload bytes received over this channel.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received.load(Ordering::SeqCst)
    }

    /// Bytes queued for sending, not yet acknowledged by the peer.
    pub fn buffered_amount(&self) -> usize {
        self.stream.buffered_amount()
    }

    /// Applies the negotiated channel type to the underlying stream.
    fn commit_reliability_params(&self) {
        let reliability_type = match self.config.channel_type {
            ChannelType::Reliable | ChannelType::ReliableUnordered => ReliabilityType::Reliable,
            ChannelType::PartialReliableRexmit | ChannelType::PartialReliableRexmitUnordered => {
                ReliabilityType::Rexmit
            }
            ChannelType::PartialReliableTimed | ChannelType::PartialReliableTimedUnordered => {
                ReliabilityType::Timed
            }
        };

        self.stream.set_reliability_params(
            !self.config.channel_type.is_ordered(),
            reliability_type,
            self.config.reliability_parameter,
        );
    }
}

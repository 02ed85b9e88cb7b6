use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use sctp::association::Association;
use tokio::sync::Mutex;

use crate::data_channel::{Config, DataChannel, OnCloseHdlrFn};
use crate::error::{Error, Result};
use crate::message::message_channel_open::{ChannelType, CHANNEL_PRIORITY_NORMAL};

/// The local DTLS role, as decided by the negotiation layer. It settles
/// stream-id parity: the client takes even ids, the server odd ones, so
/// channels opened concurrently by both peers can never collide
/// (RFC 8832 sec 6).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DtlsRole {
    #[default]
    Client,
    Server,
}

/// Options for `create_data_channel`, mirroring the W3C dictionary: either
/// reliability bound may be set, not both; `negotiated` carries the
/// pre-agreed stream id when DCEP is skipped.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub label: String,
    pub protocol: String,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
    pub max_packet_life_time: Option<u16>,
    pub negotiated: Option<u16>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            label: String::new(),
            protocol: String::new(),
            ordered: true,
            max_retransmits: None,
            max_packet_life_time: None,
            negotiated: None,
        }
    }
}

pub type OnDataChannelHdlrFn = Box<
    dyn (FnMut(Arc<DataChannel>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// The channel-to-association glue: owns all data channels of one
/// established association, assigns stream ids by role parity, and surfaces
/// remotely opened channels as events.
pub struct DataChannelTransport {
    association: Arc<Association>,
    role: DtlsRole,
    channels: Mutex<Vec<Arc<DataChannel>>>,

    on_data_channel_handler: Arc<ArcSwapOption<Mutex<OnDataChannelHdlrFn>>>,
    on_close_handler: Arc<ArcSwapOption<Mutex<OnCloseHdlrFn>>>,
}

impl DataChannelTransport {
    /// Wraps an established association. The accept loop for remotely
    /// opened channels starts immediately; install `on_data_channel` before
    /// the peer is expected to open any.
    pub fn new(association: Arc<Association>, role: DtlsRole) -> Arc<Self> {
        let transport = Arc::new(DataChannelTransport {
            association,
            role,
            channels: Mutex::new(vec![]),
            on_data_channel_handler: Arc::new(ArcSwapOption::empty()),
            on_close_handler: Arc::new(ArcSwapOption::empty()),
        });

        {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport.accept_loop().await;
            });
        }

        transport
    }

    /// Opens a data channel towards the peer.
    ///
    /// Non-negotiated channels get the next free stream id of this side's
    /// parity and announce themselves in-band; negotiated channels use the
    /// caller-provided id and no DCEP.
    pub async fn create_data_channel(&self, config: ChannelConfig) -> Result<Arc<DataChannel>> {
        let (channel_type, reliability_parameter) =
            match (config.max_retransmits, config.max_packet_life_time) {
                (Some(_), Some(_)) => return Err(Error::ErrInvalidReliabilityParams),
                (None, None) => {
                    if config.ordered {
                        (ChannelType::Reliable, 0)
                    } else {
                        (ChannelType::ReliableUnordered, 0)
                    }
                }
                (Some(max_retransmits), None) => {
                    if config.ordered {
                        (ChannelType::PartialReliableRexmit, max_retransmits as u32)
                    } else {
                        (
                            ChannelType::PartialReliableRexmitUnordered,
                            max_retransmits as u32,
                        )
                    }
                }
                (None, Some(max_packet_life_time)) => {
                    if config.ordered {
                        (ChannelType::PartialReliableTimed, max_packet_life_time as u32)
                    } else {
                        (
                            ChannelType::PartialReliableTimedUnordered,
                            max_packet_life_time as u32,
                        )
                    }
                }
            };

        let mut channels = self.channels.lock().await;

        let identifier = match config.negotiated {
            Some(id) => {
                if channels.iter().any(|c| c.stream_identifier() == id) {
                    return Err(Error::ErrChannelIdInUse);
                }
                id
            }
            None => self.generate_stream_identifier(&channels)?,
        };

        let dc_config = Config {
            channel_type,
            negotiated: config.negotiated.is_some(),
            priority: CHANNEL_PRIORITY_NORMAL,
            reliability_parameter,
            label: config.label,
            protocol: config.protocol,
        };

        let dc = Arc::new(DataChannel::dial(&self.association, identifier, dc_config).await?);
        dc.start();
        channels.push(Arc::clone(&dc));

        Ok(dc)
    }

    /// Sets the handler invoked with every channel the peer opens.
    pub fn on_data_channel(&self, f: OnDataChannelHdlrFn) {
        self.on_data_channel_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// Sets the handler invoked once the association is gone and no further
    /// channels can exist.
    pub fn on_close(&self, f: OnCloseHdlrFn) {
        self.on_close_handler.store(Some(Arc::new(Mutex::new(f))));
    }

    /// Closes every channel, then the association itself.
    pub async fn close(&self) -> Result<()> {
        {
            let channels = self.channels.lock().await;
            for dc in channels.iter() {
                let _ = dc.close().await;
                dc.stop();
            }
        }

        self.association.close().await?;
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>) {
        loop {
            let dc = match DataChannel::accept(&self.association, Config::default()).await {
                Ok(dc) => Arc::new(dc),
                Err(err) => {
                    log::debug!("accept loop ending: {}", err);
                    break;
                }
            };

            dc.start();
            {
                let mut channels = self.channels.lock().await;
                channels.push(Arc::clone(&dc));
            }

            if let Some(handler) = &*self.on_data_channel_handler.load() {
                let mut f = handler.lock().await;
                f(Arc::clone(&dc)).await;
            }
        }

        if let Some(handler) = &*self.on_close_handler.load() {
            let mut f = handler.lock().await;
            f().await;
        }
    }

    fn generate_stream_identifier(&self, in_use: &[Arc<DataChannel>]) -> Result<u16> {
        let ids: Vec<u16> = in_use.iter().map(|c| c.stream_identifier()).collect();
        next_stream_identifier(self.role, &ids)
    }
}

/// The first unused stream id of this role's parity: even for the DTLS
/// client, odd for the server.
fn next_stream_identifier(role: DtlsRole, in_use: &[u16]) -> Result<u16> {
    let mut id: u16 = match role {
        DtlsRole::Client => 0,
        DtlsRole::Server => 1,
    };

    while in_use.contains(&id) {
        id = id.checked_add(2).ok_or(Error::ErrMaxDataChannelId)?;
    }

    Ok(id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stream_identifier_parity() {
        assert_eq!(next_stream_identifier(DtlsRole::Client, &[]).unwrap(), 0);
        assert_eq!(next_stream_identifier(DtlsRole::Server, &[]).unwrap(), 1);
    }

    #[test]
    fn test_stream_identifier_skips_used_ids() {
        assert_eq!(
            next_stream_identifier(DtlsRole::Client, &[0, 2, 5]).unwrap(),
            4
        );
        assert_eq!(
            next_stream_identifier(DtlsRole::Server, &[1, 3, 4]).unwrap(),
            5
        );
    }

}

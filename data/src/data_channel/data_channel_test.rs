use std::io;
use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use async_trait::async_trait;
use sctp::transport::SecuredTransport;
use sctp::Config as AssociationConfig;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::transport::{ChannelConfig, DataChannelTransport, DtlsRole};

/// return true to drop the outbound datagram
type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

struct PipeTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    drop_filter: SyncMutex<Option<DropFilter>>,
}

#[async_trait]
impl SecuredTransport for PipeTransport {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")),
        }
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        {
            let mut drop_filter = self.drop_filter.lock().unwrap();
            if let Some(f) = drop_filter.as_mut() {
                if f(buf) {
                    return Ok(buf.len());
                }
            }
        }

        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))?;
        Ok(buf.len())
    }

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

fn pipe() -> (Arc<PipeTransport>, Arc<PipeTransport>) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        Arc::new(PipeTransport {
            tx: a_tx,
            rx: Mutex::new(a_rx),
            drop_filter: SyncMutex::new(None),
        }),
        Arc::new(PipeTransport {
            tx: b_tx,
            rx: Mutex::new(b_rx),
            drop_filter: SyncMutex::new(None),
        }),
    )
}

fn drop_once_containing(needle: &'static [u8]) -> DropFilter {
    let mut dropped = false;
    Box::new(move |raw: &[u8]| {
        if !dropped && raw.windows(needle.len()).any(|w| w == needle) {
            dropped = true;
            return true;
        }
        false
    })
}

fn association_config(
    transport: Arc<PipeTransport>,
    name: &str,
) -> AssociationConfig {
    AssociationConfig {
        transport,
        local_port: 5000,
        remote_port: 5000,
        max_receive_buffer_size: 0,
        max_message_size: 0,
        name: name.to_owned(),
    }
}

async fn transport_pair(
    client_pipe: Arc<PipeTransport>,
    server_pipe: Arc<PipeTransport>,
) -> (Arc<DataChannelTransport>, Arc<DataChannelTransport>) {
    let (client, server) = tokio::join!(
        Association::client(association_config(client_pipe, "client")),
        Association::server(association_config(server_pipe, "server")),
    );

    (
        DataChannelTransport::new(Arc::new(client.unwrap()), DtlsRole::Client),
        DataChannelTransport::new(Arc::new(server.unwrap()), DtlsRole::Server),
    )
}

#[tokio::test(start_paused = true)]
async fn test_open_channel_and_deliver_in_order_after_loss() {
    let (client_pipe, server_pipe) = pipe();
    {
        let mut drop_filter = client_pipe.drop_filter.lock().unwrap();
        *drop_filter = Some(drop_once_containing(b"msg-B"));
    }

    let (client, server) = transport_pair(client_pipe, server_pipe).await;

    // the server surfaces the remote channel and collects its messages
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<DataChannelMessage>();
    let (chan_tx, mut chan_rx) = mpsc::unbounded_channel::<Arc<DataChannel>>();
    server.on_data_channel(Box::new(move |dc: Arc<DataChannel>| {
        let msg_tx = msg_tx.clone();
        let chan_tx = chan_tx.clone();
        Box::pin(async move {
            let msg_tx = msg_tx.clone();
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let msg_tx = msg_tx.clone();
                Box::pin(async move {
                    let _ = msg_tx.send(msg);
                })
            }));
            let _ = chan_tx.send(dc);
        })
    }));

    // the client observes the open event once the ACK arrives
    let (open_tx, mut open_rx) = mpsc::unbounded_channel::<()>();
    let dc = client
        .create_data_channel(ChannelConfig {
            label: "chat".to_owned(),
            ..Default::default()
        })
        .await
        .unwrap();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = open_tx.send(());
        })
    }));

    assert_eq!(dc.stream_identifier() % 2, 0, "client parity is even");

    timeout(Duration::from_secs(30), open_rx.recv())
        .await
        .expect("open timeout")
        .expect("open event");
    assert_eq!(dc.ready_state(), DataChannelState::Open);

    let remote = timeout(Duration::from_secs(30), chan_rx.recv())
        .await
        .expect("channel timeout")
        .expect("remote channel");
    assert_eq!(remote.config.label, "chat");
    assert_eq!(remote.ready_state(), DataChannelState::Open);

    for msg in [&b"msg-A"[..], b"msg-B", b"msg-C"] {
        dc.write(&Bytes::copy_from_slice(msg)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // "msg-B"'s first transmission is dropped; ordering must survive
    for expected in [&b"msg-A"[..], b"msg-B", b"msg-C"] {
        let msg = timeout(Duration::from_secs(30), msg_rx.recv())
            .await
            .expect("message timeout")
            .expect("message");
        assert!(!msg.is_string);
        assert_eq!(&msg.data[..], expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_negotiated_channel_is_open_immediately() {
    let (client_pipe, server_pipe) = pipe();
    let (client, server) = transport_pair(client_pipe, server_pipe).await;

    let client_dc = client
        .create_data_channel(ChannelConfig {
            label: "pre".to_owned(),
            negotiated: Some(7),
            ..Default::default()
        })
        .await
        .unwrap();
    let server_dc = server
        .create_data_channel(ChannelConfig {
            label: "pre".to_owned(),
            negotiated: Some(7),
            ..Default::default()
        })
        .await
        .unwrap();

    // no DCEP exchange: both ends are usable at once
    assert_eq!(client_dc.ready_state(), DataChannelState::Open);
    assert_eq!(server_dc.ready_state(), DataChannelState::Open);

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<DataChannelMessage>();
    server_dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let msg_tx = msg_tx.clone();
        Box::pin(async move {
            let _ = msg_tx.send(msg);
        })
    }));

    client_dc
        .write_data_channel(&Bytes::from_static(b"negotiated-hello"), true)
        .await
        .unwrap();

    let msg = timeout(Duration::from_secs(30), msg_rx.recv())
        .await
        .expect("message timeout")
        .expect("message");
    assert!(msg.is_string);
    assert_eq!(&msg.data[..], b"negotiated-hello");
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_reliability_params_rejected() {
    let (client_pipe, server_pipe) = pipe();
    let (client, _server) = transport_pair(client_pipe, server_pipe).await;

    let result = client
        .create_data_channel(ChannelConfig {
            label: "broken".to_owned(),
            max_retransmits: Some(0),
            max_packet_life_time: Some(1000),
            ..Default::default()
        })
        .await;
    assert_eq!(result.err(), Some(Error::ErrInvalidReliabilityParams));
}

#[tokio::test(start_paused = true)]
async fn test_negotiated_id_collision_rejected() {
    let (client_pipe, server_pipe) = pipe();
    let (client, _server) = transport_pair(client_pipe, server_pipe).await;

    client
        .create_data_channel(ChannelConfig {
            label: "first".to_owned(),
            negotiated: Some(4),
            ..Default::default()
        })
        .await
        .unwrap();

    let result = client
        .create_data_channel(ChannelConfig {
            label: "second".to_owned(),
            negotiated: Some(4),
            ..Default::default()
        })
        .await;
    assert_eq!(result.err(), Some(Error::ErrChannelIdInUse));
}

#[tokio::test(start_paused = true)]
async fn test_send_on_connecting_channel_fails() {
    let (client_pipe, server_pipe) = pipe();
    let (client, _server) = transport_pair(client_pipe, Arc::clone(&server_pipe)).await;

    // sink all later server traffic so the ACK never comes back
    {
        let mut drop_filter = server_pipe.drop_filter.lock().unwrap();
        *drop_filter = Some(Box::new(|_raw: &[u8]| true));
    }

    let dc = client
        .create_data_channel(ChannelConfig {
            label: "stuck".to_owned(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(dc.ready_state(), DataChannelState::Connecting);
    let result = dc.write(&Bytes::from_static(b"too early")).await;
    assert_eq!(result.err(), Some(Error::ErrChannelNotOpened));
}

#[tokio::test(start_paused = true)]
async fn test_close_fires_close_event_on_both_sides() {
    let (client_pipe, server_pipe) = pipe();
    let (client, server) = transport_pair(client_pipe, server_pipe).await;

    let (chan_tx, mut chan_rx) = mpsc::unbounded_channel::<Arc<DataChannel>>();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();
    server.on_data_channel(Box::new(move |dc: Arc<DataChannel>| {
        let chan_tx = chan_tx.clone();
        let close_tx = close_tx.clone();
        Box::pin(async move {
            let close_tx = close_tx.clone();
            dc.on_close(Box::new(move || {
                let close_tx = close_tx.clone();
                Box::pin(async move {
                    let _ = close_tx.send(());
                })
            }));
            let _ = chan_tx.send(dc);
        })
    }));

    let (open_tx, mut open_rx) = mpsc::unbounded_channel::<()>();
    let dc = client
        .create_data_channel(ChannelConfig {
            label: "short-lived".to_owned(),
            ..Default::default()
        })
        .await
        .unwrap();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = open_tx.send(());
        })
    }));

    timeout(Duration::from_secs(30), open_rx.recv())
        .await
        .expect("open timeout")
        .expect("open event");
    let remote = timeout(Duration::from_secs(30), chan_rx.recv())
        .await
        .expect("channel timeout")
        .expect("remote channel");

    dc.close().await.unwrap();

    timeout(Duration::from_secs(30), close_rx.recv())
        .await
        .expect("close timeout")
        .expect("close event");
    assert_eq!(remote.ready_state(), DataChannelState::Closed);

    // further sends on the closed local channel fail
    let result = dc.write(&Bytes::from_static(b"late")).await;
    assert_eq!(result.err(), Some(Error::ErrChannelNotOpened));
}

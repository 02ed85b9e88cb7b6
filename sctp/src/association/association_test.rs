use std::io;
use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc as tokio_mpsc;
use tokio::time::timeout;

use super::*;
use crate::chunk::chunk_payload_data::ChunkPayloadData;
use crate::packet::Packet;
use crate::stream::ReliabilityType;

/// return true to drop the outbound datagram
type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// An in-memory datagram pipe standing in for the DTLS transport: lossless
/// and ordered by default, with a programmable drop filter per direction.
struct PipeTransport {
    tx: tokio_mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<tokio_mpsc::UnboundedReceiver<Vec<u8>>>,
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
                    // swallowed by the simulated network
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
    let (a_tx, b_rx) = tokio_mpsc::unbounded_channel();
    let (b_tx, a_rx) = tokio_mpsc::unbounded_channel();
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

/// drops the first outbound packet whose bytes contain `needle`
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

fn config(transport: Arc<PipeTransport>, name: &str) -> Config {
    Config {
        transport,
        local_port: 5000,
        remote_port: 5000,
        max_receive_buffer_size: 0,
        max_message_size: 0,
        name: name.to_owned(),
    }
}

async fn establish_pair() -> (Arc<Association>, Arc<Association>) {
    let (side_a, side_b) = pipe();

    let (client, server) = tokio::join!(
        Association::client(config(side_a, "client")),
        Association::server(config(side_b, "server")),
    );

    (
        Arc::new(client.expect("client handshake")),
        Arc::new(server.expect("server handshake")),
    )
}

#[tokio::test(start_paused = true)]
async fn test_handshake_reaches_established() {
    let (client, server) = establish_pair().await;

    let ai = client.association_internal.lock().await;
    assert_eq!(ai.get_state(), AssociationState::Established);
    drop(ai);

    let ai = server.association_internal.lock().await;
    assert_eq!(ai.get_state(), AssociationState::Established);
}

#[tokio::test(start_paused = true)]
async fn test_ordered_delivery_with_lost_middle_message() {
    let (side_a, side_b) = pipe();
    {
        let mut drop_filter = side_a.drop_filter.lock().unwrap();
        *drop_filter = Some(drop_once_containing(b"msg-B"));
    }

    let (client, server) = tokio::join!(
        Association::client(config(side_a, "client")),
        Association::server(config(side_b, "server")),
    );
    let client = Arc::new(client.unwrap());
    let server = Arc::new(server.unwrap());

    let out = client
        .open_stream(0, PayloadProtocolIdentifier::Binary)
        .await
        .unwrap();

    // spread the sends so each message travels in its own packet
    for msg in [&b"msg-A"[..], b"msg-B", b"msg-C"] {
        out.write(&Bytes::copy_from_slice(msg)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let inbound = timeout(Duration::from_secs(30), server.accept_stream())
        .await
        .expect("accept timeout")
        .expect("accepted stream");

    let mut buf = vec![0u8; 1500];
    for expected in [&b"msg-A"[..], b"msg-B", b"msg-C"] {
        let n = timeout(Duration::from_secs(30), inbound.read(&mut buf))
            .await
            .expect("read timeout")
            .expect("read");
        assert_eq!(&buf[..n], expected, "messages must arrive in send order");
    }

    // the congestion window respects the peer's advertised window
    let ai = client.association_internal.lock().await;
    assert!(ai.cwnd <= ai.max_peer_rwnd);
}

#[tokio::test(start_paused = true)]
async fn test_max_retransmits_zero_abandons_lost_message() {
    let (side_a, side_b) = pipe();
    {
        let mut drop_filter = side_a.drop_filter.lock().unwrap();
        *drop_filter = Some(drop_once_containing(b"lost-message"));
    }

    let (client, server) = tokio::join!(
        Association::client(config(side_a, "client")),
        Association::server(config(side_b, "server")),
    );
    let client = Arc::new(client.unwrap());
    let server = Arc::new(server.unwrap());

    let out = client
        .open_stream(0, PayloadProtocolIdentifier::Binary)
        .await
        .unwrap();
    out.set_reliability_params(false, ReliabilityType::Rexmit, 0);

    out.write(&Bytes::from_static(b"lost-message")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    out.write(&Bytes::from_static(b"second-message")).await.unwrap();

    let inbound = timeout(Duration::from_secs(30), server.accept_stream())
        .await
        .expect("accept timeout")
        .expect("accepted stream");

    // the lost message is never retransmitted; its successor still arrives
    // once the FORWARD-TSN moves the cumulative point past the gap
    let mut buf = vec![0u8; 1500];
    let n = timeout(Duration::from_secs(30), inbound.read(&mut buf))
        .await
        .expect("read timeout")
        .expect("read");
    assert_eq!(&buf[..n], b"second-message");

    // the abandoned chunk was transmitted exactly once and the peer's
    // cumulative point covers both TSNs
    let client_next_tsn = {
        let ai = client.association_internal.lock().await;
        ai.my_next_tsn
    };
    let ai = server.association_internal.lock().await;
    assert_eq!(ai.peer_last_tsn, client_next_tsn.wrapping_sub(1));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_completes_after_outstanding_data_is_acked() {
    let (client, server) = establish_pair().await;

    let out = client
        .open_stream(0, PayloadProtocolIdentifier::Binary)
        .await
        .unwrap();
    out.write(&Bytes::from_static(b"ping")).await.unwrap();

    let inbound = timeout(Duration::from_secs(30), server.accept_stream())
        .await
        .expect("accept timeout")
        .expect("accepted stream");

    let mut buf = vec![0u8; 1500];
    let n = inbound.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    // server answers on its own direction, then the client shuts down;
    // the server must not complete the shutdown before that chunk is acked
    inbound.write(&Bytes::from_static(b"pong")).await.unwrap();

    let n = timeout(Duration::from_secs(30), out.read(&mut buf))
        .await
        .expect("read timeout")
        .expect("read");
    assert_eq!(&buf[..n], b"pong");

    timeout(Duration::from_secs(30), client.shutdown())
        .await
        .expect("shutdown timeout")
        .expect("shutdown");

    let ai = client.association_internal.lock().await;
    assert_eq!(ai.get_state(), AssociationState::Closed);
}

fn dummy_internal(name: &str) -> AssociationInternal {
    let (transport, _other) = pipe();
    let (close_tx, _close_rx) = broadcast::channel(1);
    let (accept_tx, _accept_rx) = mpsc::channel(ACCEPT_CH_SIZE);
    let (handshake_tx, _handshake_rx) = mpsc::channel(1);
    let (awake_tx, _awake_rx) = mpsc::channel(1);

    AssociationInternal::new(
        config(transport, name),
        close_tx,
        accept_tx,
        handshake_tx,
        Arc::new(awake_tx),
    )
}

#[tokio::test]
async fn test_corrupted_checksum_does_not_mutate_state() {
    let mut ai = dummy_internal("checksum-test");
    ai.set_state(AssociationState::Established);

    let peer_last_tsn_before = ai.peer_last_tsn;

    let pkt = Packet {
        source_port: 5000,
        destination_port: 5000,
        verification_tag: ai.my_verification_tag,
        chunks: vec![Box::new(ChunkPayloadData {
            tsn: ai.peer_last_tsn.wrapping_add(1),
            beginning_fragment: true,
            ending_fragment: true,
            user_data: Bytes::from_static(b"data"),
            ..Default::default()
        })],
    };
    let mut raw = pkt.marshal().unwrap().to_vec();
    raw[8] ^= 0xff; // corrupt the checksum

    // a protocol violation is swallowed, never fatal
    ai.handle_inbound(&Bytes::from(raw)).await.unwrap();

    assert_eq!(ai.peer_last_tsn, peer_last_tsn_before);
    assert_eq!(ai.get_state(), AssociationState::Established);
    assert!(ai.payload_queue.is_empty());
}

#[tokio::test]
async fn test_bad_verification_tag_is_discarded() {
    let mut ai = dummy_internal("vtag-test");
    ai.set_state(AssociationState::Established);

    let peer_last_tsn_before = ai.peer_last_tsn;

    let pkt = Packet {
        source_port: 5000,
        destination_port: 5000,
        verification_tag: ai.my_verification_tag.wrapping_add(1),
        chunks: vec![Box::new(ChunkPayloadData {
            tsn: ai.peer_last_tsn.wrapping_add(1),
            beginning_fragment: true,
            ending_fragment: true,
            user_data: Bytes::from_static(b"data"),
            ..Default::default()
        })],
    };
    let raw = pkt.marshal().unwrap();

    ai.handle_inbound(&raw).await.unwrap();

    assert_eq!(ai.peer_last_tsn, peer_last_tsn_before);
    assert!(ai.payload_queue.is_empty());
}

#[tokio::test]
async fn test_abort_is_terminal() {
    let mut ai = dummy_internal("abort-test");
    ai.set_state(AssociationState::Established);

    let pkt = Packet {
        source_port: 5000,
        destination_port: 5000,
        verification_tag: ai.my_verification_tag,
        chunks: vec![Box::new(crate::chunk::chunk_abort::ChunkAbort::default())],
    };
    let raw = pkt.marshal().unwrap();

    let result = ai.handle_inbound(&raw).await;
    assert_eq!(result.err(), Some(Error::ErrAbortChunk));

    ai.close().await.unwrap();
    assert_eq!(ai.get_state(), AssociationState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_unordered_stream_delivery() {
    let (client, server) = establish_pair().await;

    let out = client
        .open_stream(0, PayloadProtocolIdentifier::Binary)
        .await
        .unwrap();
    out.set_reliability_params(true, ReliabilityType::Reliable, 0);

    out.write(&Bytes::from_static(b"unordered-1")).await.unwrap();
    out.write(&Bytes::from_static(b"unordered-2")).await.unwrap();

    let inbound = timeout(Duration::from_secs(30), server.accept_stream())
        .await
        .expect("accept timeout")
        .expect("accepted stream");

    let mut buf = vec![0u8; 1500];
    let mut seen = vec![];
    for _ in 0..2 {
        let n = timeout(Duration::from_secs(30), inbound.read(&mut buf))
            .await
            .expect("read timeout")
            .expect("read");
        seen.push(buf[..n].to_vec());
    }
    seen.sort();
    assert_eq!(seen, vec![b"unordered-1".to_vec(), b"unordered-2".to_vec()]);
}

use std::sync::atomic::{AtomicU32, AtomicU8};

use super::*;
use crate::association::AssociationState;
use crate::chunk::chunk_payload_data::PayloadProtocolIdentifier;

fn make_stream(state: AssociationState, max_payload_size: u32) -> (Stream, Arc<PendingQueue>) {
    let (awake_tx, _awake_rx) = mpsc::channel(1);
    let pending_queue = Arc::new(PendingQueue::new());
    let stream = Stream::new(
        "test-stream".to_owned(),
        13,
        max_payload_size,
        Arc::new(AtomicU32::new(65536)),
        Arc::new(AtomicU8::new(state as u8)),
        Arc::new(awake_tx),
        Arc::clone(&pending_queue),
    );
    (stream, pending_queue)
}

#[tokio::test]
async fn test_write_fragments_large_messages() -> Result<()> {
    let (stream, pending_queue) = make_stream(AssociationState::Established, 4);

    let n = stream
        .write_sctp(
            &Bytes::from_static(b"0123456789"),
            PayloadProtocolIdentifier::Binary,
        )
        .await?;
    assert_eq!(n, 10);

    // 10 bytes over a 4-byte fragment limit: begin, middle, end
    assert_eq!(pending_queue.len(), 3);

    let first = pending_queue.pop().unwrap();
    assert!(first.beginning_fragment);
    assert!(!first.ending_fragment);
    assert_eq!(first.user_data, Bytes::from_static(b"0123"));

    let middle = pending_queue.pop().unwrap();
    assert!(!middle.beginning_fragment);
    assert!(!middle.ending_fragment);

    let last = pending_queue.pop().unwrap();
    assert!(!last.beginning_fragment);
    assert!(last.ending_fragment);
    assert_eq!(last.user_data, Bytes::from_static(b"89"));

    assert_eq!(stream.buffered_amount(), 10);
    Ok(())
}

#[tokio::test]
async fn test_sequence_number_only_advances_for_ordered() -> Result<()> {
    let (stream, pending_queue) = make_stream(AssociationState::Established, 1200);

    stream
        .write_sctp(&Bytes::from_static(b"a"), PayloadProtocolIdentifier::Binary)
        .await?;
    assert_eq!(stream.sequence_number.load(Ordering::SeqCst), 1);

    stream.set_reliability_params(true, ReliabilityType::Reliable, 0);
    stream
        .write_sctp(&Bytes::from_static(b"b"), PayloadProtocolIdentifier::Binary)
        .await?;
    // RFC 4960 sec 6.6: no SSN increment for unordered data
    assert_eq!(stream.sequence_number.load(Ordering::SeqCst), 1);

    let first = pending_queue.pop().unwrap();
    assert!(!first.unordered);
    let second = pending_queue.pop().unwrap();
    assert!(second.unordered);
    Ok(())
}

#[tokio::test]
async fn test_dcep_is_always_ordered() -> Result<()> {
    let (stream, pending_queue) = make_stream(AssociationState::Established, 1200);

    stream.set_reliability_params(true, ReliabilityType::Rexmit, 0);
    stream
        .write_sctp(&Bytes::from_static(b"x"), PayloadProtocolIdentifier::Dcep)
        .await?;

    let chunk = pending_queue.pop().unwrap();
    assert!(!chunk.unordered, "DCEP must be sent ordered");
    Ok(())
}

#[tokio::test]
async fn test_write_requires_established_association() {
    let (stream, _pending_queue) = make_stream(AssociationState::CookieWait, 1200);

    let result = stream
        .write_sctp(&Bytes::from_static(b"a"), PayloadProtocolIdentifier::Binary)
        .await;
    assert_eq!(result.err(), Some(Error::ErrPayloadDataStateNotExist));
}

#[tokio::test]
async fn test_write_rejects_oversized_messages() {
    let (stream, _pending_queue) = make_stream(AssociationState::Established, 1200);

    let huge = Bytes::from(vec![0u8; 65537]);
    let result = stream
        .write_sctp(&huge, PayloadProtocolIdentifier::Binary)
        .await;
    assert_eq!(result.err(), Some(Error::ErrOutboundPacketTooLarge));
}

#[tokio::test]
async fn test_write_after_shutdown_fails() {
    let (stream, _pending_queue) = make_stream(AssociationState::Established, 1200);

    stream.write_shutdown.store(true, Ordering::SeqCst);
    let result = stream
        .write_sctp(&Bytes::from_static(b"a"), PayloadProtocolIdentifier::Binary)
        .await;
    assert_eq!(result.err(), Some(Error::ErrStreamClosed));
}

#[tokio::test]
async fn test_read_returns_zero_after_read_shutdown() -> Result<()> {
    let (stream, _pending_queue) = make_stream(AssociationState::Established, 1200);

    stream.read_shutdown.store(true, Ordering::SeqCst);
    let mut buf = vec![0u8; 16];
    let (n, ppi) = stream.read_sctp(&mut buf).await?;
    assert_eq!(n, 0);
    assert_eq!(ppi, PayloadProtocolIdentifier::Unknown);
    Ok(())
}

#[tokio::test]
async fn test_read_surfaces_terminal_association_error() {
    let (stream, _pending_queue) = make_stream(AssociationState::Established, 1200);

    {
        let mut read_error = stream.read_error.lock().unwrap();
        *read_error = Some(Error::ErrAbortChunk);
    }
    stream.read_shutdown.store(true, Ordering::SeqCst);

    let mut buf = vec![0u8; 16];
    let result = stream.read_sctp(&mut buf).await;
    assert_eq!(result.err(), Some(Error::ErrAbortChunk));
}

#[tokio::test]
async fn test_reset_marker_enqueued_on_full_shutdown() -> Result<()> {
    let (stream, pending_queue) = make_stream(AssociationState::Established, 1200);

    stream.shutdown(Shutdown::Both).await?;

    let marker = pending_queue.pop().unwrap();
    assert!(marker.user_data.is_empty());
    assert_eq!(marker.stream_identifier, 13);
    Ok(())
}

#[tokio::test]
async fn test_inbound_message_is_readable() -> Result<()> {
    let (stream, _pending_queue) = make_stream(AssociationState::Established, 1200);

    stream
        .handle_data(ChunkPayloadData {
            tsn: 1,
            stream_identifier: 13,
            beginning_fragment: true,
            ending_fragment: true,
            payload_type: PayloadProtocolIdentifier::Binary,
            user_data: Bytes::from_static(b"inbound"),
            ..Default::default()
        })
        .await;

    let mut buf = vec![0u8; 16];
    let (n, ppi) = stream.read_sctp(&mut buf).await?;
    assert_eq!(&buf[..n], b"inbound");
    assert_eq!(ppi, PayloadProtocolIdentifier::Binary);
    Ok(())
}

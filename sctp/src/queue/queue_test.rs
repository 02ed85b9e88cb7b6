use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use bytes::Bytes;

use super::payload_queue::PayloadQueue;
use super::pending_queue::PendingQueue;
use super::reassembly_queue::ReassemblyQueue;
use crate::chunk::chunk_payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};

fn make_data_chunk(tsn: u32, user_data: &'static [u8]) -> ChunkPayloadData {
    ChunkPayloadData {
        tsn,
        beginning_fragment: true,
        ending_fragment: true,
        user_data: Bytes::from_static(user_data),
        ..Default::default()
    }
}

fn make_fragment(
    tsn: u32,
    ssn: u16,
    unordered: bool,
    begin: bool,
    end: bool,
    user_data: &'static [u8],
) -> ChunkPayloadData {
    ChunkPayloadData {
        tsn,
        stream_sequence_number: ssn,
        unordered,
        beginning_fragment: begin,
        ending_fragment: end,
        payload_type: PayloadProtocolIdentifier::Binary,
        user_data: Bytes::from_static(user_data),
        ..Default::default()
    }
}

#[test]
fn test_payload_queue_push_and_pop_in_order() {
    let mut q = PayloadQueue::new(Arc::new(AtomicUsize::new(0)));

    for tsn in 1..=3u32 {
        q.push(make_data_chunk(tsn, b"abc"), 0);
    }
    assert_eq!(q.len(), 3);
    assert_eq!(q.get_num_bytes(), 9);

    // pop only releases the head TSN
    assert!(q.pop(2).is_none());
    assert!(q.pop(1).is_some());
    assert!(q.pop(2).is_some());
    assert!(q.pop(3).is_some());
    assert!(q.is_empty());
}

#[test]
fn test_payload_queue_records_duplicates() {
    let mut q = PayloadQueue::new(Arc::new(AtomicUsize::new(0)));

    assert!(q.push(make_data_chunk(5, b"x"), 4));
    assert!(!q.push(make_data_chunk(5, b"x"), 4), "same TSN twice");
    assert!(!q.push(make_data_chunk(3, b"x"), 4), "below cumulative");

    assert_eq!(q.pop_duplicates(), vec![5, 3]);
    assert!(q.pop_duplicates().is_empty(), "duplicates are drained");
}

#[test]
fn test_payload_queue_gap_ack_blocks() {
    let mut q = PayloadQueue::new(Arc::new(AtomicUsize::new(0)));

    // cumulative = 10; received 12,13,14 and 17
    for tsn in [12u32, 13, 14, 17] {
        q.push(make_data_chunk(tsn, b"d"), 10);
    }

    let gabs = q.get_gap_ack_blocks(10);
    assert_eq!(gabs.len(), 2);
    assert_eq!((gabs[0].start, gabs[0].end), (2, 4));
    assert_eq!((gabs[1].start, gabs[1].end), (7, 7));
}

#[test]
fn test_payload_queue_mark_as_acked_releases_bytes() {
    let mut q = PayloadQueue::new(Arc::new(AtomicUsize::new(0)));
    q.push(make_data_chunk(1, b"hello"), 0);

    let released = q.mark_as_acked(1);
    assert_eq!(released, 5);
    assert_eq!(q.get_num_bytes(), 0);
    // entry itself stays until cumulatively passed
    assert_eq!(q.len(), 1);
    assert!(q.get(1).unwrap().acked);
}

#[test]
fn test_pending_queue_append_keeps_fragments_contiguous() {
    let q = PendingQueue::new();

    q.append(vec![
        make_fragment(0, 0, false, true, false, b"frag0"),
        make_fragment(0, 0, false, false, false, b"frag1"),
        make_fragment(0, 0, false, false, true, b"frag2"),
    ]);
    assert_eq!(q.len(), 3);
    assert_eq!(q.get_num_bytes(), 15);

    assert!(q.peek().unwrap().beginning_fragment);
    assert!(q.pop().unwrap().beginning_fragment);
    assert!(!q.pop().unwrap().ending_fragment);
    assert!(q.pop().unwrap().ending_fragment);
    assert!(q.is_empty());
}

#[test]
fn test_reassembly_ordered_delivery_from_permuted_arrival() {
    let mut rq = ReassemblyQueue::new(0);
    let mut buf = vec![0u8; 32];

    // ssn 1 then ssn 0 arrive out of order
    rq.push(make_fragment(11, 1, false, true, true, b"second"));
    assert!(!rq.is_readable(), "ssn 1 must wait for ssn 0");

    rq.push(make_fragment(10, 0, false, true, true, b"first"));
    assert!(rq.is_readable());

    let (n, _) = rq.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"first");
    let (n, _) = rq.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"second");
}

#[test]
fn test_reassembly_ordered_fragmented_message() {
    let mut rq = ReassemblyQueue::new(0);
    let mut buf = vec![0u8; 32];

    rq.push(make_fragment(1, 0, false, true, false, b"ab"));
    rq.push(make_fragment(3, 0, false, false, true, b"ef"));
    assert!(!rq.is_readable(), "middle fragment still missing");

    rq.push(make_fragment(2, 0, false, false, false, b"cd"));
    assert!(rq.is_readable());

    let (n, _) = rq.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"abcdef");
}

#[test]
fn test_reassembly_unordered_incomplete_is_held() {
    let mut rq = ReassemblyQueue::new(0);
    let mut buf = vec![0u8; 32];

    rq.push(make_fragment(1, 0, true, true, false, b"ab"));
    assert!(!rq.is_readable());
    assert!(rq.read(&mut buf).is_err());

    rq.push(make_fragment(2, 0, true, false, true, b"cd"));
    assert!(rq.is_readable());
    let (n, _) = rq.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"abcd");
}

#[test]
fn test_reassembly_unordered_delivers_regardless_of_ssn() {
    let mut rq = ReassemblyQueue::new(0);
    let mut buf = vec![0u8; 32];

    // a complete unordered message with a high SSN is deliverable at once
    rq.push(make_fragment(9, 7, true, true, true, b"later"));
    assert!(rq.is_readable());
    let (n, _) = rq.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"later");
}

#[test]
fn test_reassembly_forward_tsn_for_ordered_skips_abandoned() {
    let mut rq = ReassemblyQueue::new(0);
    let mut buf = vec![0u8; 32];

    // ssn 0 is incomplete (its tail was abandoned by the sender)
    rq.push(make_fragment(1, 0, false, true, false, b"lost"));
    rq.push(make_fragment(3, 1, false, true, true, b"kept"));
    assert!(!rq.is_readable());

    rq.forward_tsn_for_ordered(0);
    assert!(rq.is_readable(), "ssn 1 becomes deliverable after skip");
    let (n, _) = rq.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"kept");
}

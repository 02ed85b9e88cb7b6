use bytes::Bytes;

use super::chunk_abort::*;
use super::chunk_cookie::*;
use super::chunk_forward_tsn::*;
use super::chunk_header::*;
use super::chunk_init::*;
use super::chunk_payload_data::*;
use super::chunk_selective_ack::*;
use super::chunk_shutdown::*;
use super::chunk_type::*;
use super::chunk_unknown::*;
use super::*;
use crate::error_cause::*;
use crate::param::param_state_cookie::ParamStateCookie;

#[test]
fn test_chunk_header_round_trip() -> Result<()> {
    let header = ChunkHeader {
        typ: CT_SACK,
        flags: 0,
        value_length: 12,
    };
    let mut raw = header.marshal()?.to_vec();
    raw.extend_from_slice(&[0u8; 12]);
    let parsed = ChunkHeader::unmarshal(&Bytes::from(raw))?;
    assert_eq!(parsed.typ, CT_SACK);
    assert_eq!(parsed.value_length(), 12);
    Ok(())
}

#[test]
fn test_chunk_header_rejects_nonzero_padding() {
    // a 1-byte value padded with a non-zero byte
    let raw = Bytes::from_static(&[0x03, 0x00, 0x00, 0x05, 0xaa, 0x01, 0x00, 0x00]);
    let result = ChunkHeader::unmarshal(&raw);
    assert_eq!(result.err(), Some(Error::ErrChunkHeaderPaddingNonZero));
}

#[test]
fn test_chunk_header_rejects_truncated_input() {
    let raw = Bytes::from_static(&[0x00, 0x00]);
    assert_eq!(
        ChunkHeader::unmarshal(&raw).err(),
        Some(Error::ErrChunkHeaderTooSmall)
    );

    // length claims more than the buffer holds
    let raw = Bytes::from_static(&[0x00, 0x00, 0x00, 0x10]);
    assert_eq!(
        ChunkHeader::unmarshal(&raw).err(),
        Some(Error::ErrChunkHeaderInvalidLength)
    );
}

#[test]
fn test_payload_data_round_trip() -> Result<()> {
    let chunk = ChunkPayloadData {
        unordered: true,
        beginning_fragment: true,
        ending_fragment: false,
        immediate_sack: true,
        tsn: 0x01020304,
        stream_identifier: 42,
        stream_sequence_number: 7,
        payload_type: PayloadProtocolIdentifier::Binary,
        user_data: Bytes::from_static(b"hello"),
        ..Default::default()
    };

    let raw = chunk.marshal()?;
    let parsed = ChunkPayloadData::unmarshal(&raw)?;

    assert!(parsed.unordered);
    assert!(parsed.beginning_fragment);
    assert!(!parsed.ending_fragment);
    assert!(parsed.immediate_sack);
    assert_eq!(parsed.tsn, 0x01020304);
    assert_eq!(parsed.stream_identifier, 42);
    assert_eq!(parsed.stream_sequence_number, 7);
    assert_eq!(parsed.payload_type, PayloadProtocolIdentifier::Binary);
    assert_eq!(parsed.user_data, Bytes::from_static(b"hello"));
    Ok(())
}

#[test]
fn test_init_round_trip_with_params() -> Result<()> {
    let mut init = ChunkInit {
        is_ack: false,
        initiate_tag: 0xdeadbeef,
        advertised_receiver_window_credit: 1024 * 1024,
        num_outbound_streams: 10,
        num_inbound_streams: 20,
        initial_tsn: 1234,
        params: vec![],
    };
    init.set_supported_extensions();

    let raw = init.marshal()?;
    let parsed = ChunkInit::unmarshal(&raw)?;

    assert!(!parsed.is_ack);
    assert_eq!(parsed.initiate_tag, 0xdeadbeef);
    assert_eq!(parsed.advertised_receiver_window_credit, 1024 * 1024);
    assert_eq!(parsed.num_outbound_streams, 10);
    assert_eq!(parsed.num_inbound_streams, 20);
    assert_eq!(parsed.initial_tsn, 1234);
    assert_eq!(parsed.params.len(), 1);
    Ok(())
}

#[test]
fn test_init_ack_round_trip_with_cookie() -> Result<()> {
    let cookie = ParamStateCookie::new(1, 2, 3);
    let init_ack = ChunkInit {
        is_ack: true,
        initiate_tag: 5,
        advertised_receiver_window_credit: 65536,
        num_outbound_streams: 1,
        num_inbound_streams: 1,
        initial_tsn: 9,
        params: vec![Box::new(cookie.clone())],
    };

    let raw = init_ack.marshal()?;
    let parsed = ChunkInit::unmarshal(&raw)?;

    assert!(parsed.is_ack);
    assert_eq!(parsed.params.len(), 1);
    let parsed_cookie = parsed.params[0]
        .as_any()
        .downcast_ref::<ParamStateCookie>()
        .expect("state cookie param");
    assert_eq!(parsed_cookie.cookie, cookie.cookie);
    Ok(())
}

#[test]
fn test_init_check_rules() {
    let init = ChunkInit {
        initiate_tag: 0,
        advertised_receiver_window_credit: 65536,
        num_outbound_streams: 1,
        num_inbound_streams: 1,
        ..Default::default()
    };
    assert_eq!(
        init.check().err(),
        Some(Error::ErrChunkTypeInitInitiateTagZero)
    );

    let init = ChunkInit {
        initiate_tag: 1,
        advertised_receiver_window_credit: 65536,
        num_outbound_streams: 0,
        num_inbound_streams: 1,
        ..Default::default()
    };
    assert_eq!(
        init.check().err(),
        Some(Error::ErrInitOutboundStreamRequestZero)
    );

    let init = ChunkInit {
        initiate_tag: 1,
        advertised_receiver_window_credit: 100,
        num_outbound_streams: 1,
        num_inbound_streams: 1,
        ..Default::default()
    };
    assert_eq!(
        init.check().err(),
        Some(Error::ErrInitAdvertisedReceiver1500)
    );
}

#[test]
fn test_selective_ack_round_trip() -> Result<()> {
    let sack = ChunkSelectiveAck {
        cumulative_tsn_ack: 1000,
        advertised_receiver_window_credit: 50000,
        gap_ack_blocks: vec![
            GapAckBlock { start: 2, end: 4 },
            GapAckBlock { start: 7, end: 7 },
        ],
        duplicate_tsn: vec![999, 1000],
    };

    let raw = sack.marshal()?;
    let parsed = ChunkSelectiveAck::unmarshal(&raw)?;

    assert_eq!(parsed.cumulative_tsn_ack, 1000);
    assert_eq!(parsed.advertised_receiver_window_credit, 50000);
    assert_eq!(parsed.gap_ack_blocks.len(), 2);
    assert_eq!(parsed.gap_ack_blocks[0], GapAckBlock { start: 2, end: 4 });
    assert_eq!(parsed.duplicate_tsn, vec![999, 1000]);
    Ok(())
}

#[test]
fn test_forward_tsn_round_trip() -> Result<()> {
    let fwd = ChunkForwardTsn {
        new_cumulative_tsn: 3,
        streams: vec![ChunkForwardTsnStream {
            identifier: 1,
            sequence: 2,
        }],
    };

    let raw = fwd.marshal()?;
    let parsed = ChunkForwardTsn::unmarshal(&raw)?;

    assert_eq!(parsed.new_cumulative_tsn, 3);
    assert_eq!(parsed.streams.len(), 1);
    assert_eq!(parsed.streams[0].identifier, 1);
    assert_eq!(parsed.streams[0].sequence, 2);
    Ok(())
}

#[test]
fn test_abort_round_trip_with_cause() -> Result<()> {
    let abort = ChunkAbort {
        error_causes: vec![ErrorCause {
            code: PROTOCOL_VIOLATION,
            raw: Bytes::from_static(b"oops"),
        }],
    };

    let raw = abort.marshal()?;
    let parsed = ChunkAbort::unmarshal(&raw)?;

    assert_eq!(parsed.error_causes.len(), 1);
    assert_eq!(parsed.error_causes[0].code, PROTOCOL_VIOLATION);
    assert_eq!(parsed.error_causes[0].raw, Bytes::from_static(b"oops"));
    Ok(())
}

#[test]
fn test_shutdown_family_round_trip() -> Result<()> {
    let shutdown = ChunkShutdown {
        cumulative_tsn_ack: 77,
    };
    let parsed = ChunkShutdown::unmarshal(&shutdown.marshal()?)?;
    assert_eq!(parsed.cumulative_tsn_ack, 77);

    ChunkShutdownAck::unmarshal(&ChunkShutdownAck {}.marshal()?)?;
    ChunkShutdownComplete::unmarshal(&ChunkShutdownComplete {}.marshal()?)?;
    Ok(())
}

#[test]
fn test_cookie_echo_round_trip() -> Result<()> {
    let echo = ChunkCookieEcho {
        cookie: Bytes::from_static(b"somecookievalue"),
    };
    let parsed = ChunkCookieEcho::unmarshal(&echo.marshal()?)?;
    assert_eq!(parsed.cookie, Bytes::from_static(b"somecookievalue"));

    ChunkCookieAck::unmarshal(&ChunkCookieAck {}.marshal()?)?;
    Ok(())
}

#[test]
fn test_unknown_chunk_preserved_as_opaque() -> Result<()> {
    // type 0x49: action bits 0b01, not implemented by this stack
    let raw = Bytes::from_static(&[0x49, 0x03, 0x00, 0x08, 0xde, 0xad, 0xbe, 0xef]);
    let parsed = ChunkUnknown::unmarshal(&raw)?;

    assert_eq!(parsed.typ, ChunkType(0x49));
    assert_eq!(parsed.flags, 0x03);
    assert_eq!(parsed.value, Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]));
    assert_eq!(parsed.typ.unrecognized_action(), 0b01);

    let remarshaled = parsed.marshal()?;
    assert_eq!(&raw[..], &remarshaled[..]);
    Ok(())
}

#[test]
fn test_unmarshal_wrong_type_rejected() {
    let sack = ChunkSelectiveAck::default();
    let raw = sack.marshal().unwrap();
    assert_eq!(
        ChunkPayloadData::unmarshal(&raw).err(),
        Some(Error::ErrChunkTypeMismatch)
    );
}

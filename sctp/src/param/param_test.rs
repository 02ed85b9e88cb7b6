use bytes::Bytes;

use super::param_header::*;
use super::param_outgoing_reset_request::*;
use super::param_reconfig_response::*;
use super::param_state_cookie::*;
use super::param_supported_extensions::*;
use super::*;
use crate::chunk::chunk_type::{CT_FORWARD_TSN, CT_RECONFIG};

#[test]
fn test_param_header_too_short() {
    assert_eq!(
        ParamHeader::unmarshal(&Bytes::from_static(&[0x00])).err(),
        Some(Error::ErrParamHeaderTooShort)
    );

    // header length smaller than the header itself
    assert_eq!(
        ParamHeader::unmarshal(&Bytes::from_static(&[0x00, 0x07, 0x00, 0x01])).err(),
        Some(Error::ErrParamHeaderTooShort)
    );
}

#[test]
fn test_state_cookie_embeds_tags_and_tsn() -> Result<()> {
    let cookie = ParamStateCookie::new(0x11111111, 0x22222222, 0x33333333);
    // 32-byte nonce followed by my tag, peer tag, initial TSN
    assert_eq!(cookie.cookie.len(), 44);
    assert_eq!(&cookie.cookie[32..36], &0x11111111u32.to_be_bytes());
    assert_eq!(&cookie.cookie[36..40], &0x22222222u32.to_be_bytes());
    assert_eq!(&cookie.cookie[40..44], &0x33333333u32.to_be_bytes());

    let raw = cookie.marshal()?;
    let parsed = ParamStateCookie::unmarshal(&raw)?;
    assert_eq!(parsed.cookie, cookie.cookie);
    Ok(())
}

#[test]
fn test_state_cookie_nonce_is_unpredictable() {
    let a = ParamStateCookie::new(1, 2, 3);
    let b = ParamStateCookie::new(1, 2, 3);
    assert_ne!(a.cookie, b.cookie, "same inputs must not repeat a cookie");
}

#[test]
fn test_supported_extensions_round_trip() -> Result<()> {
    let p = ParamSupportedExtensions {
        chunk_types: vec![CT_RECONFIG, CT_FORWARD_TSN],
    };

    let raw = p.marshal()?;
    let parsed = ParamSupportedExtensions::unmarshal(&raw)?;
    assert_eq!(parsed.chunk_types, vec![CT_RECONFIG, CT_FORWARD_TSN]);
    Ok(())
}

#[test]
fn test_outgoing_reset_request_round_trip() -> Result<()> {
    let p = ParamOutgoingResetRequest {
        reconfig_request_sequence_number: 5,
        reconfig_response_sequence_number: 6,
        sender_last_tsn: 1000,
        stream_identifiers: vec![3, 4],
    };

    let raw = p.marshal()?;
    let parsed = ParamOutgoingResetRequest::unmarshal(&raw)?;
    assert_eq!(parsed.reconfig_request_sequence_number, 5);
    assert_eq!(parsed.reconfig_response_sequence_number, 6);
    assert_eq!(parsed.sender_last_tsn, 1000);
    assert_eq!(parsed.stream_identifiers, vec![3, 4]);
    Ok(())
}

#[test]
fn test_reconfig_response_round_trip() -> Result<()> {
    let p = ParamReconfigResponse {
        reconfig_response_sequence_number: 9,
        result: ReconfigResult::SuccessPerformed,
    };

    let raw = p.marshal()?;
    let parsed = ParamReconfigResponse::unmarshal(&raw)?;
    assert_eq!(parsed.reconfig_response_sequence_number, 9);
    assert_eq!(parsed.result, ReconfigResult::SuccessPerformed);
    Ok(())
}

#[test]
fn test_build_param_dispatch() -> Result<()> {
    let cookie = ParamStateCookie::new(1, 2, 3);
    let raw = cookie.marshal()?;
    let parsed = build_param(&raw)?;
    assert!(parsed.as_any().downcast_ref::<ParamStateCookie>().is_some());
    Ok(())
}

#[test]
fn test_build_param_unknown_type_actions() {
    // type 0x0005 (upper bit clear): stop processing
    let raw = Bytes::from_static(&[0x00, 0x05, 0x00, 0x08, 0x01, 0x02, 0x03, 0x04]);
    assert_eq!(
        build_param(&raw).err(),
        Some(Error::ErrParamTypeUnhandled { typ: 5 })
    );

    // type 0xc005 (upper bit set): skip, carried opaquely
    let raw = Bytes::from_static(&[0xc0, 0x05, 0x00, 0x08, 0x01, 0x02, 0x03, 0x04]);
    let parsed = build_param(&raw).expect("skippable unknown param");
    assert_eq!(u16::from(parsed.header().typ), 0xc005);
    assert_eq!(parsed.value_length(), 4);
}

use bytes::{Bytes, BytesMut};

use super::message_channel_ack::*;
use super::message_channel_open::*;
use super::message_type::*;
use super::*;
use crate::error::Error;
use crate::marshal::*;

#[test]
fn test_message_type_unmarshal_open() -> Result<()> {
    let mut bytes = Bytes::from_static(&[0x03]);
    let msg_type = MessageType::unmarshal(&mut bytes)?;
    assert_eq!(msg_type, MessageType::DataChannelOpen);
    Ok(())
}

#[test]
fn test_message_type_unmarshal_ack() -> Result<()> {
    let mut bytes = Bytes::from_static(&[0x02]);
    let msg_type = MessageType::unmarshal(&mut bytes)?;
    assert_eq!(msg_type, MessageType::DataChannelAck);
    Ok(())
}

#[test]
fn test_message_type_unmarshal_invalid() {
    let mut bytes = Bytes::from_static(&[0x01]);
    assert_eq!(
        MessageType::unmarshal(&mut bytes),
        Err(Error::InvalidMessageType(0x01))
    );
}

#[test]
fn test_message_type_marshal_round_trip() -> Result<()> {
    for typ in [MessageType::DataChannelAck, MessageType::DataChannelOpen] {
        let raw = typ.marshal()?;
        let mut buf = raw.clone();
        assert_eq!(MessageType::unmarshal(&mut buf)?, typ);
    }
    Ok(())
}

#[test]
fn test_channel_type_unmarshal_invalid() {
    let mut bytes = Bytes::from_static(&[0x11]);
    assert_eq!(
        ChannelType::unmarshal(&mut bytes),
        Err(Error::InvalidChannelType(0x11))
    );
}

#[test]
fn test_channel_type_ordering() {
    assert!(ChannelType::Reliable.is_ordered());
    assert!(ChannelType::PartialReliableRexmit.is_ordered());
    assert!(ChannelType::PartialReliableTimed.is_ordered());
    assert!(!ChannelType::ReliableUnordered.is_ordered());
    assert!(!ChannelType::PartialReliableRexmitUnordered.is_ordered());
    assert!(!ChannelType::PartialReliableTimedUnordered.is_ordered());
}

static MARSHALED_OPEN: [u8; 24] = [
    0x00, // channel type
    0x0f, 0x35, // priority
    0x00, 0xff, 0x0f, 0x35, // reliability parameter
    0x00, 0x05, // label length
    0x00, 0x08, // protocol length
    0x6c, 0x61, 0x62, 0x65, 0x6c, // label
    0x70, 0x72, 0x6f, 0x74, 0x6f, 0x63, 0x6f, 0x6c, // protocol
];

#[test]
fn test_channel_open_unmarshal_success() -> Result<()> {
    let mut bytes = Bytes::from_static(&MARSHALED_OPEN);

    let channel_open = DataChannelOpen::unmarshal(&mut bytes)?;

    assert_eq!(channel_open.channel_type, ChannelType::Reliable);
    assert_eq!(channel_open.priority, 3893);
    assert_eq!(channel_open.reliability_parameter, 16715573);
    assert_eq!(channel_open.label, b"label");
    assert_eq!(channel_open.protocol, b"protocol");
    Ok(())
}

#[test]
fn test_channel_open_unmarshal_truncated_header() {
    let mut bytes = Bytes::from_static(&[0x00; 5]);
    assert_eq!(
        DataChannelOpen::unmarshal(&mut bytes),
        Err(Error::UnexpectedEndOfBuffer {
            expected: 11,
            actual: 5
        })
    );
}

#[test]
fn test_channel_open_unmarshal_length_mismatch() {
    let mut bytes = Bytes::from_static(&[
        0x01, // channel type
        0x00, 0x00, // priority
        0x00, 0x00, 0x00, 0x00, // reliability parameter
        0x00, 0x05, // label length
        0x00, 0x08, // protocol length
    ]);
    assert_eq!(
        DataChannelOpen::unmarshal(&mut bytes),
        Err(Error::UnexpectedEndOfBuffer {
            expected: 13,
            actual: 0
        })
    );
}

#[test]
fn test_channel_open_marshal() -> Result<()> {
    let channel_open = DataChannelOpen {
        channel_type: ChannelType::Reliable,
        priority: 3893,
        reliability_parameter: 16715573,
        label: b"label".to_vec(),
        protocol: b"protocol".to_vec(),
    };

    let mut buf = BytesMut::with_capacity(11 + 5 + 8);
    buf.resize(11 + 5 + 8, 0u8);
    let bytes_written = channel_open.marshal_to(&mut buf)?;
    assert_eq!(bytes_written, channel_open.marshal_size());
    assert_eq!(&buf.freeze()[..], &MARSHALED_OPEN);
    Ok(())
}

#[test]
fn test_message_open_round_trip() -> Result<()> {
    let msg = Message::DataChannelOpen(DataChannelOpen {
        channel_type: ChannelType::PartialReliableRexmitUnordered,
        priority: CHANNEL_PRIORITY_NORMAL,
        reliability_parameter: 3,
        label: b"chat".to_vec(),
        protocol: b"".to_vec(),
    });

    let raw = msg.marshal()?;
    assert_eq!(raw.len(), msg.marshal_size());
    assert_eq!(raw[0], MESSAGE_TYPE_OPEN);

    let mut buf = raw.clone();
    let parsed = Message::unmarshal(&mut buf)?;
    assert_eq!(parsed, msg);
    Ok(())
}

#[test]
fn test_message_ack_round_trip() -> Result<()> {
    let msg = Message::DataChannelAck(DataChannelAck {});
    let raw = msg.marshal()?;
    assert_eq!(raw, Bytes::from_static(&[MESSAGE_TYPE_ACK]));

    let mut buf = raw.clone();
    let parsed = Message::unmarshal(&mut buf)?;
    assert_eq!(parsed, msg);
    Ok(())
}

#[test]
fn test_message_unmarshal_empty() {
    let mut bytes = Bytes::new();
    assert_eq!(
        Message::unmarshal(&mut bytes),
        Err(Error::UnexpectedEndOfBuffer {
            expected: 1,
            actual: 0
        })
    );
}

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::marshal::*;

/// DCEP message types (RFC 8832 sec 8.2.1).
pub const MESSAGE_TYPE_ACK: u8 = 0x02;
pub const MESSAGE_TYPE_OPEN: u8 = 0x03;
pub const MESSAGE_TYPE_LEN: usize = 1;

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum MessageType {
    DataChannelAck,
    DataChannelOpen,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::DataChannelAck => "DataChannelAck",
            MessageType::DataChannelOpen => "DataChannelOpen",
        };
        write!(f, "{s}")
    }
}

impl MarshalSize for MessageType {
    fn marshal_size(&self) -> usize {
        MESSAGE_TYPE_LEN
    }
}

impl Marshal for MessageType {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        let b = match self {
            MessageType::DataChannelAck => MESSAGE_TYPE_ACK,
            MessageType::DataChannelOpen => MESSAGE_TYPE_OPEN,
        };

        buf.put_u8(b);

        Ok(1)
    }
}

impl Unmarshal for MessageType {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < MESSAGE_TYPE_LEN {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: MESSAGE_TYPE_LEN,
                actual: buf.remaining(),
            });
        }

        match buf.get_u8() {
            MESSAGE_TYPE_ACK => Ok(Self::DataChannelAck),
            MESSAGE_TYPE_OPEN => Ok(Self::DataChannelOpen),
            b => Err(Error::InvalidMessageType(b)),
        }
    }
}

use bytes::Buf;

use crate::error::Result;
use crate::marshal::*;

/// DATA_CHANNEL_ACK (RFC 8832 sec 5.2): message type only, no body.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Default)]
pub struct DataChannelAck;

impl MarshalSize for DataChannelAck {
    fn marshal_size(&self) -> usize {
        0
    }
}

impl Marshal for DataChannelAck {
    fn marshal_to(&self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }
}

impl Unmarshal for DataChannelAck {
    fn unmarshal<B>(_buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        Ok(Self)
    }
}

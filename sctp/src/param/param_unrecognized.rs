use std::fmt;

use bytes::{Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;

/// Unrecognized Parameter (RFC 4960 sec 3.3.3.1): wraps a parameter from a
/// received INIT that had to be reported back in the INIT ACK.
#[derive(Debug, Clone)]
pub(crate) struct ParamUnrecognized {
    raw: Bytes,
}

impl fmt::Display for ParamUnrecognized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} len={}", self.header(), self.raw.len())
    }
}

impl ParamUnrecognized {
    pub(crate) fn wrap(wrapped: Box<dyn Param + Send + Sync>) -> Result<Self> {
        Ok(ParamUnrecognized {
            raw: wrapped.marshal()?,
        })
    }
}

impl Param for ParamUnrecognized {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::Unknown { param_type: 8 },
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        let value = raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());
        Ok(ParamUnrecognized { raw: value })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf)?;
        buf.extend(self.raw.clone());
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        self.raw.len()
    }

    fn clone_to(&self) -> Box<dyn Param + Send + Sync> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

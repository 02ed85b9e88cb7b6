use std::fmt;

use bytes::{Bytes, BytesMut};

use super::{chunk_header::*, chunk_type::*, *};
use crate::param::param_header::PARAM_HEADER_LENGTH;
use crate::param::{build_param, Param};
use crate::util::get_padding_size;

/// RE-CONFIG (RFC 6525 sec 3.1): carries one or two reconfiguration
/// parameters. Data channels use it with the outgoing-SSN-reset request to
/// close a stream, and with the reconfiguration response to answer one.
#[derive(Default, Debug)]
pub(crate) struct ChunkReconfig {
    pub(crate) param_a: Option<Box<dyn Param + Send + Sync>>,
    pub(crate) param_b: Option<Box<dyn Param + Send + Sync>>,
}

impl Clone for ChunkReconfig {
    fn clone(&self) -> Self {
        ChunkReconfig {
            param_a: self.param_a.clone(),
            param_b: self.param_b.clone(),
        }
    }
}

impl fmt::Display for ChunkReconfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = String::new();
        if let Some(param_a) = &self.param_a {
            res += format!("Param A: {param_a}").as_str();
        }
        if let Some(param_b) = &self.param_b {
            res += format!(" Param B: {param_b}").as_str();
        }
        write!(f, "{} {}", self.header(), res)
    }
}

impl Chunk for ChunkReconfig {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_RECONFIG,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_RECONFIG {
            return Err(Error::ErrChunkTypeMismatch);
        }

        let param_a = build_param(&raw.slice(CHUNK_HEADER_SIZE..))?;

        let offset = {
            let len = PARAM_HEADER_LENGTH + param_a.value_length();
            CHUNK_HEADER_SIZE + len + get_padding_size(len)
        };
        let param_b = if CHUNK_HEADER_SIZE + header.value_length() > offset {
            Some(build_param(&raw.slice(offset..))?)
        } else {
            None
        };

        Ok(ChunkReconfig {
            param_a: Some(param_a),
            param_b,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        if let Some(param_a) = &self.param_a {
            let raw = param_a.marshal()?;
            let len = raw.len();
            writer.extend(raw);
            if self.param_b.is_some() {
                writer.extend(vec![0u8; get_padding_size(len)]);
            }
        }
        if let Some(param_b) = &self.param_b {
            writer.extend(param_b.marshal()?);
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        let mut l = 0;
        if let Some(param_a) = &self.param_a {
            l += PARAM_HEADER_LENGTH + param_a.value_length();
        }
        if let Some(param_b) = &self.param_b {
            l += get_padding_size(l) + PARAM_HEADER_LENGTH + param_b.value_length();
        }
        l
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

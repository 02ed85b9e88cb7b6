use std::fmt;

use bytes::{Bytes, BytesMut};

use super::{chunk_header::*, chunk_type::*, *};
use crate::param::param_header::PARAM_HEADER_LENGTH;
use crate::param::param_heartbeat_info::ParamHeartbeatInfo;
use crate::param::{build_param, Param};

/// HEARTBEAT (RFC 4960 sec 3.3.5): probes path reachability. Carries exactly
/// one Heartbeat Info parameter which the peer must echo back unchanged.
#[derive(Default, Debug)]
pub(crate) struct ChunkHeartbeat {
    pub(crate) params: Vec<Box<dyn Param + Send + Sync>>,
}

impl fmt::Display for ChunkHeartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())
    }
}

impl Chunk for ChunkHeartbeat {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_HEARTBEAT,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_HEARTBEAT {
            return Err(Error::ErrChunkTypeMismatch);
        }
        if header.value_length() < PARAM_HEADER_LENGTH {
            return Err(Error::ErrHeartbeatParam);
        }

        let info = build_param(&raw.slice(CHUNK_HEADER_SIZE..))?;
        if info.as_any().downcast_ref::<ParamHeartbeatInfo>().is_none() {
            return Err(Error::ErrHeartbeatParam);
        }

        Ok(ChunkHeartbeat { params: vec![info] })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        for p in &self.params {
            writer.extend(p.marshal()?);
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        self.params
            .iter()
            .fold(0, |acc, p| acc + PARAM_HEADER_LENGTH + p.value_length())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// HEARTBEAT ACK (RFC 4960 sec 3.3.6): echoes the received Heartbeat Info.
#[derive(Default, Debug)]
pub(crate) struct ChunkHeartbeatAck {
    pub(crate) params: Vec<Box<dyn Param + Send + Sync>>,
}

impl fmt::Display for ChunkHeartbeatAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())
    }
}

impl Chunk for ChunkHeartbeatAck {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_HEARTBEAT_ACK,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_HEARTBEAT_ACK {
            return Err(Error::ErrChunkTypeMismatch);
        }
        if header.value_length() < PARAM_HEADER_LENGTH {
            return Err(Error::ErrHeartbeatParam);
        }

        let info = build_param(&raw.slice(CHUNK_HEADER_SIZE..))?;
        Ok(ChunkHeartbeatAck { params: vec![info] })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        for p in &self.params {
            writer.extend(p.marshal()?);
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        self.params
            .iter()
            .fold(0, |acc, p| acc + PARAM_HEADER_LENGTH + p.value_length())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

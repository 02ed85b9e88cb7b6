use std::fmt;

use bytes::{Bytes, BytesMut};

use super::{chunk_header::*, chunk_type::*, *};
use crate::error_cause::*;
use crate::util::get_padding_size;

/// ABORT (RFC 4960 sec 3.3.7): terminates the association immediately.
/// Carries zero or more cause TLVs explaining the teardown.
#[derive(Default, Debug)]
pub(crate) struct ChunkAbort {
    pub(crate) error_causes: Vec<ErrorCause>,
}

impl fmt::Display for ChunkAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = self.header().to_string();
        for cause in &self.error_causes {
            res += format!("\n cause: {cause}").as_str();
        }
        write!(f, "{res}")
    }
}

fn unmarshal_causes(raw: &Bytes, header: &ChunkHeader) -> Result<Vec<ErrorCause>> {
    let mut error_causes = vec![];
    let mut offset = CHUNK_HEADER_SIZE;
    while offset + ERROR_CAUSE_HEADER_LENGTH <= CHUNK_HEADER_SIZE + header.value_length() {
        let e = ErrorCause::unmarshal(&raw.slice(offset..))?;
        offset += e.length() + get_padding_size(e.length());
        error_causes.push(e);
    }
    Ok(error_causes)
}

fn marshal_causes(causes: &[ErrorCause], writer: &mut BytesMut) {
    for cause in causes {
        cause.marshal_to(writer);
        let padding = get_padding_size(cause.length());
        writer.extend(vec![0u8; padding]);
    }
}

fn causes_length(causes: &[ErrorCause]) -> usize {
    causes
        .iter()
        .fold(0, |acc, c| acc + c.length() + get_padding_size(c.length()))
}

impl Chunk for ChunkAbort {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_ABORT,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_ABORT {
            return Err(Error::ErrChunkTypeMismatch);
        }
        Ok(ChunkAbort {
            error_causes: unmarshal_causes(raw, &header)?,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        marshal_causes(&self.error_causes, writer);
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        causes_length(&self.error_causes)
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// ERROR (RFC 4960 sec 3.3.10): like ABORT but non-fatal; reports conditions
/// such as unrecognized chunks without tearing the association down.
#[derive(Default, Debug)]
pub(crate) struct ChunkError {
    pub(crate) error_causes: Vec<ErrorCause>,
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = self.header().to_string();
        for cause in &self.error_causes {
            res += format!("\n cause: {cause}").as_str();
        }
        write!(f, "{res}")
    }
}

impl Chunk for ChunkError {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_ERROR,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_ERROR {
            return Err(Error::ErrChunkTypeMismatch);
        }
        Ok(ChunkError {
            error_causes: unmarshal_causes(raw, &header)?,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        marshal_causes(&self.error_causes, writer);
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        causes_length(&self.error_causes)
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

use std::fmt;

use bytes::{Bytes, BytesMut};

use super::{chunk_header::*, chunk_type::ChunkType, *};

/// A chunk whose type this stack does not implement. The raw value is kept so
/// the RFC 4960 sec 3 "unrecognized chunk" action encoded in the type's upper
/// bits can be applied, including echoing the chunk back in an ERROR report.
#[derive(Default, Debug, Clone)]
pub(crate) struct ChunkUnknown {
    pub(crate) typ: ChunkType,
    pub(crate) flags: u8,
    pub(crate) value: Bytes,
}

impl fmt::Display for ChunkUnknown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} len={}", self.header(), self.value.len())
    }
}

impl Chunk for ChunkUnknown {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: self.typ,
            flags: self.flags,
            value_length: self.value.len() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        Ok(ChunkUnknown {
            typ: header.typ,
            flags: header.flags,
            value: raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length()),
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        writer.extend_from_slice(&self.value);
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        self.value.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

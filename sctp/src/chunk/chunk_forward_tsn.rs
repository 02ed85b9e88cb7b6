use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{chunk_header::*, chunk_type::*, *};

/// FORWARD TSN (RFC 3758 sec 3.2): tells the receiver to move its cumulative
/// ack point past abandoned chunks, listing the largest skipped stream
/// sequence number per ordered stream so reassembly state can be pruned.
///
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|   Type = 192  |  Flags = 0x00 |        Length = Variable      |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                      New Cumulative TSN                       |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|         Stream-1              |       Stream Sequence-1       |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                               ...                             |
#[derive(Default, Debug, Clone)]
pub(crate) struct ChunkForwardTsn {
    pub(crate) new_cumulative_tsn: u32,
    pub(crate) streams: Vec<ChunkForwardTsnStream>,
}

pub(crate) const NEW_CUMULATIVE_TSN_LENGTH: usize = 4;
pub(crate) const FORWARD_TSN_STREAM_LENGTH: usize = 4;

impl fmt::Display for ChunkForwardTsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = format!("{} newCumulativeTSN={}", self.header(), self.new_cumulative_tsn);
        for s in &self.streams {
            res += format!(" (si={} ssn={})", s.identifier, s.sequence).as_str();
        }
        write!(f, "{res}")
    }
}

impl Chunk for ChunkForwardTsn {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_FORWARD_TSN,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        if header.typ != CT_FORWARD_TSN {
            return Err(Error::ErrChunkTypeMismatch);
        }
        if header.value_length() < NEW_CUMULATIVE_TSN_LENGTH {
            return Err(Error::ErrChunkValueNotLongEnough);
        }

        let reader = &mut raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length());
        let new_cumulative_tsn = reader.get_u32();

        let mut streams = vec![];
        let mut remaining = header.value_length() - NEW_CUMULATIVE_TSN_LENGTH;
        while remaining >= FORWARD_TSN_STREAM_LENGTH {
            streams.push(ChunkForwardTsnStream {
                identifier: reader.get_u16(),
                sequence: reader.get_u16(),
            });
            remaining -= FORWARD_TSN_STREAM_LENGTH;
        }

        Ok(ChunkForwardTsn {
            new_cumulative_tsn,
            streams,
        })
    }

    fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(writer)?;
        writer.put_u32(self.new_cumulative_tsn);
        for s in &self.streams {
            writer.put_u16(s.identifier);
            writer.put_u16(s.sequence);
        }
        Ok(writer.len())
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn value_length(&self) -> usize {
        NEW_CUMULATIVE_TSN_LENGTH + self.streams.len() * FORWARD_TSN_STREAM_LENGTH
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[derive(Default, Debug, Copy, Clone)]
pub(crate) struct ChunkForwardTsnStream {
    pub(crate) identifier: u16,
    pub(crate) sequence: u16,
}

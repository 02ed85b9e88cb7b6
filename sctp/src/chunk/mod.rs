#[cfg(test)]
mod chunk_test;

pub(crate) mod chunk_abort;
pub(crate) mod chunk_cookie;
pub(crate) mod chunk_forward_tsn;
pub(crate) mod chunk_header;
pub(crate) mod chunk_heartbeat;
pub(crate) mod chunk_init;
pub mod chunk_payload_data;
pub(crate) mod chunk_reconfig;
pub(crate) mod chunk_selective_ack;
pub(crate) mod chunk_shutdown;
pub(crate) mod chunk_type;
pub(crate) mod chunk_unknown;

use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};
use chunk_header::*;

use crate::error::{Error, Result};

/// A typed unit within an SCTP packet. Implementations are the closed set of
/// chunk types this stack understands plus `ChunkUnknown` for everything else.
pub(crate) trait Chunk: fmt::Display + fmt::Debug {
    fn header(&self) -> ChunkHeader;
    fn unmarshal(raw: &Bytes) -> Result<Self>
    where
        Self: Sized;
    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize>;
    fn check(&self) -> Result<()>;
    fn value_length(&self) -> usize;
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + self.value_length());
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

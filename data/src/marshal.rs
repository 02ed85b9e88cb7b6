use bytes::{Buf, Bytes, BytesMut};

use crate::error::Result;

/// Exact encoded size of a value, known ahead of marshalling.
pub trait MarshalSize {
    fn marshal_size(&self) -> usize;
}

/// Serialization into a caller-provided buffer.
pub trait Marshal: MarshalSize {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize>;

    fn marshal(&self) -> Result<Bytes> {
        let size = self.marshal_size();
        let mut buf = BytesMut::with_capacity(size);
        buf.resize(size, 0);
        let n = self.marshal_to(&mut buf)?;
        buf.truncate(n);
        Ok(buf.freeze())
    }
}

/// Deserialization from any `Buf`.
pub trait Unmarshal {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf;
}

use std::io;

use async_trait::async_trait;

/// The secured, connected datagram path an association runs over.
///
/// In production this is a DTLS connection: each datagram is delivered
/// authenticated, possibly duplicated, possibly lost. SCTP's own sequencing
/// handles reordering and loss, so the transport makes no ordering promise.
///
/// `recv` resolves with the next inbound datagram; `send` transmits one
/// outbound datagram. Both ends of the association must be driven by the
/// same transport instance for its whole lifetime.
#[async_trait]
pub trait SecuredTransport {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;
    async fn close(&self) -> io::Result<()>;
}

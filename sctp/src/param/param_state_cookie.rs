use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

use super::param_header::*;
use super::param_type::*;
use super::*;

/// The opaque state cookie the passive side places in INIT ACK and expects
/// back in COOKIE ECHO. It embeds both verification tags and the initial TSN
/// after a 32-byte random nonce; the issuer validates the echo by bytewise
/// comparison against the cookie it handed out, so no per-INIT state has to
/// survive an unanswered handshake attempt.
#[derive(Default, Debug, Clone, PartialEq)]
pub(crate) struct ParamStateCookie {
    pub(crate) cookie: Bytes,
}

const COOKIE_NONCE_LENGTH: usize = 32;

impl fmt::Display for ParamStateCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.header(), self.cookie)
    }
}

impl Param for ParamStateCookie {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::StateCookie,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;
        let cookie = raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());
        Ok(ParamStateCookie { cookie })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf)?;
        buf.extend(self.cookie.clone());
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        self.cookie.len()
    }

    fn clone_to(&self) -> Box<dyn Param + Send + Sync> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

impl ParamStateCookie {
    pub(crate) fn new(my_tag: u32, peer_tag: u32, initial_tsn: u32) -> Self {
        let mut nonce = [0u8; COOKIE_NONCE_LENGTH];
        rand::thread_rng().fill(&mut nonce);

        let mut cookie = BytesMut::with_capacity(COOKIE_NONCE_LENGTH + 12);
        cookie.extend_from_slice(&nonce);
        cookie.put_u32(my_tag);
        cookie.put_u32(peer_tag);
        cookie.put_u32(initial_tsn);

        ParamStateCookie {
            cookie: cookie.freeze(),
        }
    }
}

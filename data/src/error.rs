use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("unexpected end of buffer: (expected: {expected}, actual: {actual})")]
    UnexpectedEndOfBuffer { expected: usize, actual: usize },
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),
    #[error("invalid channel type {0}")]
    InvalidChannelType(u8),
    #[error("invalid payload protocol identifier {0}")]
    InvalidPayloadProtocolIdentifier(u32),
    #[error("data channel is not open")]
    ErrChannelNotOpened,
    #[error("stream id already claimed by another data channel")]
    ErrChannelIdInUse,
    #[error("cannot set both max retransmits and max packet lifetime")]
    ErrInvalidReliabilityParams,
    #[error("no stream id left for a new data channel")]
    ErrMaxDataChannelId,
    #[error("the association was closed")]
    ErrAssociationClosed,

    #[error("utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("sctp: {0}")]
    Sctp(#[from] sctp::Error),
}

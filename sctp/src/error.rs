use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("raw is too small for a SCTP packet")]
    ErrPacketRawTooSmall,
    #[error("packet checksum mismatch")]
    ErrChecksumMismatch,
    #[error("not enough data left in SCTP packet for another chunk")]
    ErrPacketChunkNotEnoughData,
    #[error("packet source port must not be 0")]
    ErrPacketSourcePortZero,
    #[error("packet destination port must not be 0")]
    ErrPacketDestinationPortZero,
    #[error("INIT chunk must not be bundled with any other chunk")]
    ErrInitChunkBundled,
    #[error("INIT chunk must carry a zero verification tag")]
    ErrInitChunkVerifyTagNotZero,

    #[error("raw is too small for a SCTP chunk")]
    ErrChunkHeaderTooSmall,
    #[error("chunk has invalid length")]
    ErrChunkHeaderInvalidLength,
    #[error("chunk padding is non-zero at offset")]
    ErrChunkHeaderPaddingNonZero,
    #[error("chunk value is shorter than its mandatory fields")]
    ErrChunkValueNotLongEnough,
    #[error("chunk type does not match the type being unmarshalled")]
    ErrChunkTypeMismatch,
    #[error("INIT chunk flags must be zero")]
    ErrChunkTypeInitFlagZero,
    #[error("INIT initiate tag must not be 0")]
    ErrChunkTypeInitInitiateTagZero,
    #[error("INIT inbound stream request must not be 0")]
    ErrInitInboundStreamRequestZero,
    #[error("INIT outbound stream request must not be 0")]
    ErrInitOutboundStreamRequestZero,
    #[error("INIT advertised receiver window must be at least 1500")]
    ErrInitAdvertisedReceiver1500,
    #[error("SACK is too short to contain its mandatory fields")]
    ErrSackSizeNotLargeEnoughInfo,
    #[error("HEARTBEAT must carry exactly one heartbeat info param")]
    ErrHeartbeatParam,
    #[error("stop processing: unrecognized chunk type")]
    ErrChunkTypeUnhandled,

    #[error("raw is too small for a SCTP param")]
    ErrParamHeaderTooShort,
    #[error("stop processing: unrecognized param type {typ}")]
    ErrParamTypeUnhandled { typ: u16 },
    #[error("unexpected param type in this context")]
    ErrParamTypeUnexpected,
    #[error("error cause is too small")]
    ErrErrorCauseTooSmall,

    #[error("INIT received in wrong state")]
    ErrHandleInitState,
    #[error("INIT ACK carried no state cookie")]
    ErrInitAckNoCookie,
    #[error("no INIT stored to retransmit")]
    ErrInitNotStoredToSend,
    #[error("no COOKIE-ECHO stored to retransmit")]
    ErrCookieEchoNotStoredToSend,
    #[error("association handshake failed: no INIT ACK")]
    ErrHandshakeInitAck,
    #[error("association handshake failed: no COOKIE-ACK")]
    ErrHandshakeCookieEcho,
    #[error("association handshake channel closed")]
    ErrAssociationHandshakeClosed,
    #[error("association aborted by peer")]
    ErrAbortChunk,
    #[error("association closed before connection was established")]
    ErrAssociationClosed,
    #[error("shutdown called on a non-established association")]
    ErrShutdownNonEstablished,
    #[error("shutdown retransmissions exhausted")]
    ErrShutdownRetransmissionFailure,
    #[error("cumulative TSN ack fell inside an unknown inflight range")]
    ErrInflightQueueTsnPop,
    #[error("gap ack block referenced a TSN that was never sent")]
    ErrTsnRequestNotExist,

    #[error("stream already exists")]
    ErrStreamAlreadyExist,
    #[error("failed to create a stream")]
    ErrStreamCreateFailed,
    #[error("stream is closed")]
    ErrStreamClosed,
    #[error("outbound message larger than the maximum message size")]
    ErrOutboundPacketTooLarge,
    #[error("sending is only allowed on an established association")]
    ErrPayloadDataStateNotExist,
    #[error("stream reset is only allowed on an established association")]
    ErrResetPacketInStateNotExist,
    #[error("short buffer")]
    ErrShortBuffer,
    #[error("try again")]
    ErrTryAgain,
    #[error("end of stream")]
    ErrEof,
}

//! WebRTC data channels over the `dctp` SCTP engine.
//!
//! Implements the Data Channel Establishment Protocol (RFC 8832) and the
//! data-channel semantics of RFC 8831: logical channels mapped onto SCTP
//! stream pairs, negotiated in-band with DATA_CHANNEL_OPEN / ACK or
//! pre-agreed out-of-band, each with its own ordering and reliability
//! configuration.

#![warn(rust_2018_idioms)]

pub mod data_channel;
pub mod error;
pub mod marshal;
pub mod message;
pub mod transport;

pub use crate::data_channel::{DataChannel, DataChannelMessage, DataChannelState};
pub use crate::error::{Error, Result};
pub use crate::transport::{ChannelConfig, DataChannelTransport, DtlsRole};

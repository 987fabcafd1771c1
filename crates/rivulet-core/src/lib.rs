//! rivulet-core: wire vocabulary for the rivulet streaming RPC core.
//!
//! This crate defines:
//! - Frames and their flags ([`Frame`], [`FrameFlags`], [`CallHeader`])
//! - The frame codec for byte-stream transports ([`FrameCodec`])
//! - Call shapes ([`CallShape`], [`Side`])
//! - Messages ([`Message`])
//! - Error codes and error types ([`ErrorCode`], [`RpcError`], [`WireError`])
//! - Application codecs ([`Codec`], [`Utf8Codec`], [`BytesCodec`])
//! - Connection configuration ([`Config`])
//! - The transport bound ([`Transport`](transport::Transport))

#![forbid(unsafe_code)]

mod codec;
mod config;
mod error;
mod flags;
mod frame;
mod message;
mod shape;
pub mod transport;
mod wire;

pub use codec::*;
pub use config::*;
pub use error::*;
pub use flags::*;
pub use frame::*;
pub use message::*;
pub use shape::*;
pub use wire::*;

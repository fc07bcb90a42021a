//! Server-side Static and Dynamic Virtual Channel multiplexer for one RDP peer.
//!
//! Two channel classes share the same transport: Static Virtual Channels (SVCs), negotiated at
//! connection time and identified by a transport channel id; and Dynamic Virtual Channels
//! (DVCs), opened at runtime over the `drdynvc` SVC and identified by a manager-assigned id.
//! This crate owns the multiplexer: `drdynvc` PDU framing, per-channel fragment reassembly, the
//! producer/consumer queues carrying payloads between caller threads and the transport, and the
//! channel lifecycle including the `drdynvc` open/close handshakes.
//!
//! It knows nothing about the RDP handshake, TLS/NLA, bitmap codecs, or input handling: it calls
//! a transport-sender callback ([`Peer::send_channel_data`]) to deliver a framed chunk, and is
//! called back (via [`ChannelManager::dispatch`]) when one arrives.

#[macro_use]
extern crate tracing;

mod channel;
mod codec;
mod data_item;
mod error;
mod flags;
mod manager;
mod peer;
mod wake;

pub use channel::{Channel, DvcOpenState, QueryKind, QueryValue};
pub use codec::{
    decode, encode_capabilities, encode_close_request, encode_create_request, fragment_dvc_payload, Cmd, FieldWidth,
    InboundPdu, MIN_CHUNK_SIZE,
};
pub use data_item::DataItem;
pub use error::{ChannelError, ChannelResult};
pub use flags::{ChunkFlags, OpenFlags};
pub use manager::{ChannelManager, ChannelManagerConfig};
pub use peer::{Peer, StaticChannelDescriptor, WakeFd};
pub use wake::{EventWake, WaitHandle};

//! The downward API (§6): the interface this crate consumes from the RDP peer object that
//! embeds it. Everything in this module is supplied by the caller; the crate never constructs
//! a `Peer` itself.

use std::os::unix::io::RawFd;

/// One entry of the peer's static channel table, negotiated during connection establishment
/// and immutable for the lifetime of the session. `name` is the 8-byte, NUL-padded slot name
/// from the channel definition structure; `joined` reflects whether the peer actually joined
/// the channel (unjoined slots are never matched by [`crate::ChannelManager::open`]).
#[derive(Debug, Clone, Copy)]
pub struct StaticChannelDescriptor {
    pub name: [u8; 8],
    pub transport_channel_id: u16,
    pub joined: bool,
}

/// The peer object that embeds this subsystem.
///
/// This is the only collaborator the core depends on outside its own modules (§1). It owns the
/// RDP transport, the connection handshake state, and the static channel table; this crate only
/// ever reads from it and calls `send_channel_data` to hand it a framed chunk.
pub trait Peer: Send + Sync {
    /// Whether the RDP session has completed activation. Gates the `drdynvc` handshake kickoff
    /// in [`crate::ChannelManager::pump`].
    fn activated(&self) -> bool;

    /// The peer's static channel table, indexed identically across calls for the lifetime of
    /// the connection (the index doubles as `svc_table_index`).
    fn static_channels(&self) -> &[StaticChannelDescriptor];

    /// Per-connection chunk size used to fragment DVC writes (§4.2).
    fn vc_chunk_size(&self) -> u32;

    /// Hand a fully framed chunk to the RDP transport for channel `transport_channel_id`.
    /// Returns `false` on transport failure (§7 "Transport failure").
    fn send_channel_data(&self, transport_channel_id: u16, payload: &[u8]) -> bool;
}

/// File-descriptor flavor of [`crate::wake::WaitHandle::readable_fd`], re-exported here since
/// it is what `wait_fds` collects.
pub type WakeFd = RawFd;

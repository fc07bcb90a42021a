//! Bitflags used at the crate boundary: the caller-supplied `open` flags (§6 upward API) and the
//! transport-level chunk markers the peer passes into the dispatcher (§4.4).

bitflags::bitflags! {
    /// Flags accepted by [`crate::ChannelManager::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open a Dynamic Virtual Channel over `drdynvc` instead of a pre-negotiated SVC slot.
        const DYNAMIC = 0b0000_0001;
    }
}

bitflags::bitflags! {
    /// Transport-level chunk markers on an inbound channel chunk. Distinct from the `drdynvc`
    /// wire PDUs in [`crate::codec`]: these flags belong to the outer transport framing that
    /// chunks a channel payload before it ever reaches the `drdynvc` PDU layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkFlags: u32 {
        const FIRST = 0b01;
        const LAST = 0b10;
    }
}

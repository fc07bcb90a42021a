use thiserror::Error;

/// Failures that can escape the public API of this crate.
///
/// Protocol violations are never represented here: per the error taxonomy this crate follows,
/// a malformed or out-of-sequence PDU is logged and dropped inside the dispatcher, and never
/// surfaces as an `Err` to a caller. `ChannelError` is reserved for resource exhaustion, misuse
/// of the API, and transport-level failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("static channel name exceeds 8 bytes")]
    NameTooLong,

    #[error("no static channel slot matches the requested name")]
    ChannelNotFound,

    #[error("drdynvc control channel is not ready")]
    NotReady,

    #[error("dynamic channel id space is exhausted")]
    IdSpaceExhausted,

    #[error("channel handle is invalid or has already been closed")]
    InvalidHandle,

    #[error("transport send callback reported failure")]
    TransportFailure,

    #[error("peer reported a channel failure")]
    PeerFailure,

    #[error("read buffer too small, {required} bytes required")]
    ReadBufferTooSmall { required: usize },

    #[error("vc_chunk_size too small to make forward progress on a fragmented write")]
    ChunkTooSmall,

    #[error("failed to create a wait handle")]
    WaitHandle(#[from] std::io::Error),

    /// Malformed `drdynvc` PDU: short read. Never surfaced from the public API; the dispatcher
    /// logs and drops on this variant (spec.md §7 "protocol violation").
    #[error("drdynvc pdu is shorter than its header declares")]
    ShortPdu,

    /// Malformed `drdynvc` PDU: command nibble does not match any known command. Same
    /// log-and-drop treatment as [`ChannelError::ShortPdu`].
    #[error("drdynvc pdu carries unknown command {0:#x}")]
    UnknownCommand(u8),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

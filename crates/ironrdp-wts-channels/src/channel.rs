//! Per-channel state and operations (§4.2).
//!
//! A `Channel` is reached only through a [`crate::ChannelManager`]: the manager's static-slot
//! table and dynamic-channel table hold the owning references, and callers are handed clones of
//! the same `Arc`. The back-reference to the manager is a [`Weak`] — the manager outlives every
//! channel it hands out (`destroy` drains the tables), so an owning pointer the other way would
//! be a cycle.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};

use bytes::{Bytes, BytesMut};

use crate::codec;
use crate::data_item::DataItem;
use crate::error::{ChannelError, ChannelResult};
use crate::manager::ManagerInner;
use crate::wake::{EventWake, WaitHandle};

/// DVC create/close handshake state (§3 DVC fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvcOpenState {
    None,
    Succeeded,
    Failed,
    Closed,
}

/// `query`'s selector (§6 `channel_query`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    FileHandle,
    Ready,
}

/// `query`'s result, tagged by [`QueryKind`].
#[derive(Debug, Clone, Copy)]
pub enum QueryValue {
    FileHandle(RawFd),
    Ready(bool),
}

#[derive(Debug)]
pub(crate) enum ChannelKind {
    Static {
        transport_channel_id: u16,
        svc_table_index: usize,
    },
    Dynamic {
        dvc_id: u32,
        open_state: Mutex<DvcOpenState>,
        /// Zero when no DATA_FIRST/DATA reassembly is in flight (I5).
        pending_length: Mutex<u32>,
    },
}

/// State for one logical stream (§3). Both SVC and DVC variants share the reassembly buffer,
/// receive queue, and wake handle; only the id bookkeeping and DVC handshake state differ.
pub struct Channel {
    pub(crate) manager: Weak<ManagerInner>,
    pub(crate) kind: ChannelKind,
    pub(crate) reassembly: Mutex<BytesMut>,
    receive_queue: Mutex<VecDeque<DataItem>>,
    receive_wake: Arc<dyn WaitHandle>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("kind", &self.kind).finish()
    }
}

impl Channel {
    pub(crate) fn new_static(
        manager: Weak<ManagerInner>,
        transport_channel_id: u16,
        svc_table_index: usize,
    ) -> ChannelResult<Arc<Self>> {
        Ok(Arc::new(Self {
            manager,
            kind: ChannelKind::Static {
                transport_channel_id,
                svc_table_index,
            },
            reassembly: Mutex::new(BytesMut::new()),
            receive_queue: Mutex::new(VecDeque::new()),
            receive_wake: Arc::new(EventWake::new()?),
        }))
    }

    pub(crate) fn new_dynamic(manager: Weak<ManagerInner>, dvc_id: u32) -> ChannelResult<Arc<Self>> {
        Ok(Arc::new(Self {
            manager,
            kind: ChannelKind::Dynamic {
                dvc_id,
                open_state: Mutex::new(DvcOpenState::None),
                pending_length: Mutex::new(0),
            },
            reassembly: Mutex::new(BytesMut::new()),
            receive_queue: Mutex::new(VecDeque::new()),
            receive_wake: Arc::new(EventWake::new()?),
        }))
    }

    pub fn transport_channel_id(&self) -> Option<u16> {
        match &self.kind {
            ChannelKind::Static { transport_channel_id, .. } => Some(*transport_channel_id),
            ChannelKind::Dynamic { .. } => None,
        }
    }

    pub fn dvc_id(&self) -> Option<u32> {
        match &self.kind {
            ChannelKind::Dynamic { dvc_id, .. } => Some(*dvc_id),
            ChannelKind::Static { .. } => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, ChannelKind::Dynamic { .. })
    }

    fn manager(&self) -> ChannelResult<Arc<ManagerInner>> {
        self.manager.upgrade().ok_or(ChannelError::InvalidHandle)
    }

    /// Peek-then-copy, never blocking (§4.2 `read`). `Ok(0)` means the queue was empty and the
    /// wake has been cleared; `Err(ReadBufferTooSmall)` leaves the head item queued.
    pub fn read(&self, buf: &mut [u8]) -> ChannelResult<usize> {
        let mut queue = self.receive_queue.lock().unwrap();
        let Some(head) = queue.front() else {
            drop(queue);
            self.receive_wake.clear();
            return Ok(0);
        };

        if head.len() > buf.len() {
            return Err(ChannelError::ReadBufferTooSmall { required: head.len() });
        }

        let item = queue.pop_front().expect("front() just returned Some");
        let now_empty = queue.is_empty();
        drop(queue);

        buf[..item.len()].copy_from_slice(&item.payload);
        if now_empty {
            self.receive_wake.clear();
        }
        Ok(item.len())
    }

    /// Enqueue `bytes` toward the transport. Returns the number of input bytes consumed, always
    /// `bytes.len()` on success (§9 Open Question c — the source reports the bytes *remaining*,
    /// always zero; that is fixed here).
    pub fn write(&self, bytes: &[u8]) -> ChannelResult<usize> {
        let manager = self.manager()?;
        match &self.kind {
            ChannelKind::Static { transport_channel_id, .. } => {
                manager.enqueue_send(DataItem::new(*transport_channel_id, Bytes::copy_from_slice(bytes)));
                Ok(bytes.len())
            }
            ChannelKind::Dynamic { dvc_id, .. } => {
                if !manager.is_drdynvc_ready() {
                    return Err(ChannelError::NotReady);
                }
                let drdynvc_id = manager.drdynvc_transport_id().ok_or(ChannelError::NotReady)?;
                let chunks = codec::fragment_dvc_payload(*dvc_id, bytes, manager.peer.vc_chunk_size())?;
                for chunk in chunks {
                    manager.enqueue_send(DataItem::new(drdynvc_id, chunk));
                }
                Ok(bytes.len())
            }
        }
    }

    pub fn query(&self, kind: QueryKind) -> ChannelResult<QueryValue> {
        match kind {
            QueryKind::FileHandle => Ok(QueryValue::FileHandle(self.receive_wake.readable_fd())),
            QueryKind::Ready => match &self.kind {
                ChannelKind::Static { .. } => Ok(QueryValue::Ready(true)),
                ChannelKind::Dynamic { open_state, .. } => match *open_state.lock().unwrap() {
                    DvcOpenState::None => Ok(QueryValue::Ready(false)),
                    DvcOpenState::Succeeded => Ok(QueryValue::Ready(true)),
                    DvcOpenState::Failed => Err(ChannelError::PeerFailure),
                    DvcOpenState::Closed => Err(ChannelError::InvalidHandle),
                },
            },
        }
    }

    /// Close (§4.2): detach from the static slot, or remove from the DVC table and emit a
    /// best-effort `CLOSE_REQUEST` if the peer had acknowledged the create. Always releases the
    /// reassembly buffer, drains the receive queue, and clears the wake.
    pub fn close(self: &Arc<Self>) -> ChannelResult<()> {
        let manager = self.manager()?;
        match &self.kind {
            ChannelKind::Static { svc_table_index, .. } => {
                manager.detach_static(*svc_table_index);
            }
            ChannelKind::Dynamic { dvc_id, open_state, .. } => {
                manager.remove_dvc(*dvc_id);
                let was_succeeded = matches!(*open_state.lock().unwrap(), DvcOpenState::Succeeded);
                if was_succeeded {
                    manager.emit_close_request(*dvc_id);
                }
                *open_state.lock().unwrap() = DvcOpenState::Closed;
            }
        }

        self.reassembly.lock().unwrap().clear();
        self.receive_queue.lock().unwrap().clear();
        self.receive_wake.clear();
        Ok(())
    }

    pub(crate) fn raise_receive_wake(&self) {
        self.receive_wake.set();
    }

    pub(crate) fn set_dvc_open_state(&self, state: DvcOpenState) {
        if let ChannelKind::Dynamic { open_state, .. } = &self.kind {
            *open_state.lock().unwrap() = state;
        }
    }

    /// Deliver a fully reassembled SVC payload straight to the receive queue (§4.4 "otherwise"
    /// branch — no `drdynvc`-level framing involved).
    pub(crate) fn deliver_transport_payload(&self, payload: Bytes, source_transport_id: u16) {
        self.push_payload(payload, source_transport_id);
    }

    /// `DATA_FIRST` (§4.5): start a new reassembly, recording the declared total length. An
    /// over-length first fragment is a protocol violation and is dropped without touching state.
    pub(crate) fn on_drdynvc_data_first(&self, total_length: u32, fragment: &[u8], source_transport_id: u16) {
        if fragment.len() as u64 > total_length as u64 {
            warn!(total_length, fragment_len = fragment.len(), "DATA_FIRST fragment exceeds declared total length");
            return;
        }

        let mut reassembly = self.reassembly.lock().unwrap();
        reassembly.clear();
        reassembly.extend_from_slice(fragment);
        let len = reassembly.len() as u32;
        drop(reassembly);

        if let ChannelKind::Dynamic { pending_length, .. } = &self.kind {
            *pending_length.lock().unwrap() = total_length;
        }

        if len >= total_length {
            self.complete_drdynvc_reassembly(source_transport_id);
        }
    }

    /// `DATA` (§4.5): append to an in-flight reassembly, or deliver the fragment directly as a
    /// complete single-PDU message when no reassembly is in flight.
    pub(crate) fn on_drdynvc_data(&self, fragment: &[u8], source_transport_id: u16) {
        let ChannelKind::Dynamic { pending_length, .. } = &self.kind else {
            return;
        };

        let pending = *pending_length.lock().unwrap();
        if pending == 0 {
            self.push_payload(Bytes::copy_from_slice(fragment), source_transport_id);
            return;
        }

        let mut reassembly = self.reassembly.lock().unwrap();
        reassembly.extend_from_slice(fragment);
        let running = reassembly.len() as u32;
        drop(reassembly);

        if running > pending {
            warn!(pending, running, "DATA PDU overruns DATA_FIRST declared length");
            self.reassembly.lock().unwrap().clear();
            *pending_length.lock().unwrap() = 0;
            return;
        }

        if running == pending {
            self.complete_drdynvc_reassembly(source_transport_id);
        }
    }

    fn complete_drdynvc_reassembly(&self, source_transport_id: u16) {
        let payload = self.reassembly.lock().unwrap().split().freeze();
        if let ChannelKind::Dynamic { pending_length, .. } = &self.kind {
            *pending_length.lock().unwrap() = 0;
        }
        self.push_payload(payload, source_transport_id);
    }

    fn push_payload(&self, payload: Bytes, source_transport_id: u16) {
        let mut queue = self.receive_queue.lock().unwrap();
        queue.push_back(DataItem::new(source_transport_id, payload));
        drop(queue);
        self.receive_wake.set();
    }

    /// Transport-level reassembly reset on a `FIRST` chunk (§4.4), distinct from the
    /// `drdynvc`-level reassembly above: this one accumulates raw transport fragments before
    /// any PDU parsing happens.
    pub(crate) fn reset_transport_reassembly(&self) {
        self.reassembly.lock().unwrap().clear();
    }

    pub(crate) fn append_transport_reassembly(&self, bytes: &[u8]) {
        self.reassembly.lock().unwrap().extend_from_slice(bytes);
    }

    pub(crate) fn transport_reassembly_len(&self) -> usize {
        self.reassembly.lock().unwrap().len()
    }

    pub(crate) fn take_transport_reassembly(&self) -> Bytes {
        self.reassembly.lock().unwrap().split().freeze()
    }
}

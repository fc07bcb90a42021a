//! Process-wide registry for one RDP peer (§4.3): the DVC table and id allocator, the `drdynvc`
//! handshake state, and the shared send queue drained by the transport thread.

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};

use crate::channel::{Channel, DvcOpenState, QueryKind, QueryValue};
use crate::codec::{self, InboundPdu};
use crate::data_item::DataItem;
use crate::error::{ChannelError, ChannelResult};
use crate::flags::{ChunkFlags, OpenFlags};
use crate::peer::Peer;
use crate::wake::{EventWake, WaitHandle};

/// `drdynvc` handshake state (§3, I3/I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrdynvcState {
    None,
    Initialized,
    Ready,
}

/// The one tunable the original hardcodes (§9.3 of SPEC_FULL.md): the version stamped into the
/// capabilities PDU this manager emits during the handshake kickoff.
#[derive(Debug, Clone, Copy)]
pub struct ChannelManagerConfig {
    pub capabilities_version: u16,
}

impl Default for ChannelManagerConfig {
    fn default() -> Self {
        Self {
            capabilities_version: 1,
        }
    }
}

struct ManagerState {
    drdynvc_state: DrdynvcState,
    drdynvc_channel: Option<Arc<Channel>>,
    dvc_table: HashMap<u32, Arc<Channel>>,
    dvc_id_seq: u32,
}

pub(crate) struct ManagerInner {
    self_weak: Weak<ManagerInner>,
    pub(crate) peer: Box<dyn Peer>,
    send_queue: Mutex<VecDeque<DataItem>>,
    send_wake: Arc<dyn WaitHandle>,
    state: Mutex<ManagerState>,
    static_handles: Mutex<Vec<Option<Arc<Channel>>>>,
    config: ChannelManagerConfig,
}

/// The registry itself (§4.3). Cheap to clone: every clone shares the same underlying state, so
/// the transport thread and caller threads can each hold one.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

impl ChannelManager {
    /// `manager_create` (§6): one per connected peer.
    pub fn new(peer: Box<dyn Peer>, config: ChannelManagerConfig) -> ChannelResult<Self> {
        let send_wake: Arc<dyn WaitHandle> = Arc::new(EventWake::new()?);
        let static_handles = Mutex::new(peer.static_channels().iter().map(|_| None).collect());

        let inner = Arc::new_cyclic(|weak| ManagerInner {
            self_weak: weak.clone(),
            peer,
            send_queue: Mutex::new(VecDeque::new()),
            send_wake,
            state: Mutex::new(ManagerState {
                drdynvc_state: DrdynvcState::None,
                drdynvc_channel: None,
                dvc_table: HashMap::new(),
                dvc_id_seq: 1,
            }),
            static_handles,
            config,
        });

        Ok(Self { inner })
    }

    /// `channel_open` (§6 / §4.3).
    pub fn open(&self, name: &str, flags: OpenFlags) -> ChannelResult<Arc<Channel>> {
        if flags.contains(OpenFlags::DYNAMIC) {
            self.inner.open_dynamic(name)
        } else {
            self.inner.open_static(name)
        }
    }

    /// `manager_check_fds` (§6): the transport-thread entry point.
    pub fn pump(&self) -> ChannelResult<()> {
        self.inner.pump()
    }

    /// The receive path (§4.4), invoked by the peer's transport-receive callback.
    pub fn dispatch(&self, transport_channel_id: u16, bytes: &[u8], flags: ChunkFlags, total_size: u32) {
        self.inner.dispatch(transport_channel_id, bytes, flags, total_size)
    }

    /// `manager_wait_fds` (§6): appends the send wake and, if attached, the `drdynvc` channel's
    /// receive wake (§10 of SPEC_FULL.md — two fds, not one).
    pub fn wait_fds(&self, fds: &mut Vec<RawFd>) {
        self.inner.wait_fds(fds)
    }

    /// `manager_destroy` (§6 / §4.3): drains every queue and closes every channel.
    pub fn destroy(&self) {
        self.inner.destroy()
    }
}

impl ManagerInner {
    fn open_static(&self, name: &str) -> ChannelResult<Arc<Channel>> {
        if name.len() > 8 {
            return Err(ChannelError::NameTooLong);
        }
        let name_bytes = name.as_bytes();

        let descriptors = self.peer.static_channels();
        let mut handles = self.static_handles.lock().unwrap();

        for (index, descriptor) in descriptors.iter().enumerate() {
            if !descriptor.joined {
                continue;
            }
            // Lax prefix match against the raw 8-byte slot name (spec.md §9 Open Question b):
            // the slot's actual name length is never consulted, only `name`'s.
            if descriptor.name.get(..name_bytes.len()) != Some(name_bytes) {
                continue;
            }

            if let Some(existing) = &handles[index] {
                return Ok(existing.clone());
            }

            let channel = Channel::new_static(self.self_weak.clone(), descriptor.transport_channel_id, index)?;
            handles[index] = Some(channel.clone());
            return Ok(channel);
        }

        Err(ChannelError::ChannelNotFound)
    }

    fn open_dynamic(&self, name: &str) -> ChannelResult<Arc<Channel>> {
        if !self.is_drdynvc_ready() {
            return Err(ChannelError::NotReady);
        }

        let dvc_id = {
            let mut state = self.state.lock().unwrap();
            let id = state.dvc_id_seq;
            state.dvc_id_seq = id.checked_add(1).ok_or(ChannelError::IdSpaceExhausted)?;
            id
        };

        let channel = Channel::new_dynamic(self.self_weak.clone(), dvc_id)?;
        self.state.lock().unwrap().dvc_table.insert(dvc_id, channel.clone());

        let transport_id = self.drdynvc_transport_id().ok_or(ChannelError::NotReady)?;
        self.enqueue_send(DataItem::new(transport_id, codec::encode_create_request(dvc_id, name)));

        Ok(channel)
    }

    fn pump(&self) -> ChannelResult<()> {
        self.maybe_start_drdynvc_handshake()?;
        self.drain_send_queue()
    }

    fn maybe_start_drdynvc_handshake(&self) -> ChannelResult<()> {
        let should_start = {
            let state = self.state.lock().unwrap();
            matches!(state.drdynvc_state, DrdynvcState::None)
        } && self.peer.activated();

        if !should_start {
            return Ok(());
        }

        let channel = self.open_static("drdynvc")?;
        {
            let mut state = self.state.lock().unwrap();
            state.drdynvc_state = DrdynvcState::Initialized;
            state.drdynvc_channel = Some(channel.clone());
        }

        let transport_id = channel
            .transport_channel_id()
            .expect("a channel returned by open_static is always Static");
        let caps = codec::encode_capabilities(self.config.capabilities_version);
        self.enqueue_send(DataItem::new(transport_id, caps));
        Ok(())
    }

    fn drain_send_queue(&self) -> ChannelResult<()> {
        loop {
            let item = {
                let mut queue = self.send_queue.lock().unwrap();
                match queue.pop_front() {
                    Some(item) => item,
                    None => break,
                }
            };

            if !self.peer.send_channel_data(item.channel_id, &item.payload) {
                error!(channel_id = item.channel_id, "transport send failed, aborting pump");
                return Err(ChannelError::TransportFailure);
            }
        }

        if self.send_queue.lock().unwrap().is_empty() {
            self.send_wake.clear();
        }
        Ok(())
    }

    fn dispatch(&self, transport_channel_id: u16, bytes: &[u8], flags: ChunkFlags, total_size: u32) {
        let Some(channel) = self.find_static_by_transport_id(transport_channel_id) else {
            warn!(transport_channel_id, "inbound chunk for unknown transport channel");
            return;
        };

        if flags.contains(ChunkFlags::FIRST) {
            channel.reset_transport_reassembly();
        }
        channel.append_transport_reassembly(bytes);

        if !flags.contains(ChunkFlags::LAST) {
            return;
        }

        let reassembled_len = channel.transport_reassembly_len();
        if reassembled_len as u32 != total_size {
            warn!(reassembled_len, total_size, "reassembled chunk length mismatch");
        }
        let payload = channel.take_transport_reassembly();

        let is_drdynvc = self
            .state
            .lock()
            .unwrap()
            .drdynvc_channel
            .as_ref()
            .and_then(|c| c.transport_channel_id())
            == Some(transport_channel_id);

        if is_drdynvc {
            self.handle_drdynvc_pdu(&payload);
        } else {
            channel.deliver_transport_payload(payload, transport_channel_id);
        }
    }

    fn handle_drdynvc_pdu(&self, bytes: &[u8]) {
        let pdu = match codec::decode(bytes) {
            Ok(pdu) => pdu,
            Err(err) => {
                warn!(?err, "dropping malformed drdynvc pdu");
                return;
            }
        };

        if let InboundPdu::Capabilities { version } = pdu {
            debug!(version, "drdynvc capabilities handshake complete");
            self.state.lock().unwrap().drdynvc_state = DrdynvcState::Ready;
            return;
        }

        if !self.is_drdynvc_ready() {
            warn!(?pdu, "dropping drdynvc pdu received before handshake ready");
            return;
        }

        let drdynvc_transport_id = self.drdynvc_transport_id().unwrap_or(transport_channel_id_unknown());

        match pdu {
            InboundPdu::Capabilities { .. } => unreachable!("handled above"),
            InboundPdu::CreateResponse { channel_id, creation_status } => {
                let Some(channel) = self.lookup_dvc(channel_id) else {
                    warn!(channel_id, "create response for unknown dvc");
                    return;
                };
                channel.set_dvc_open_state(if creation_status >= 0 {
                    DvcOpenState::Succeeded
                } else {
                    DvcOpenState::Failed
                });
                channel.raise_receive_wake();
            }
            InboundPdu::DataFirst {
                channel_id,
                total_length,
                fragment,
            } => {
                let Some(channel) = self.lookup_dvc(channel_id) else {
                    warn!(channel_id, "DATA_FIRST for unknown dvc");
                    return;
                };
                channel.on_drdynvc_data_first(total_length, &fragment, drdynvc_transport_id);
            }
            InboundPdu::Data { channel_id, fragment } => {
                let Some(channel) = self.lookup_dvc(channel_id) else {
                    warn!(channel_id, "DATA for unknown dvc");
                    return;
                };
                channel.on_drdynvc_data(&fragment, drdynvc_transport_id);
            }
            InboundPdu::CloseResponse { channel_id } => {
                let Some(channel) = self.lookup_dvc(channel_id) else {
                    warn!(channel_id, "CLOSE_REQUEST for unknown dvc");
                    return;
                };
                channel.set_dvc_open_state(DvcOpenState::Closed);
            }
        }
    }

    fn lookup_dvc(&self, dvc_id: u32) -> Option<Arc<Channel>> {
        self.state.lock().unwrap().dvc_table.get(&dvc_id).cloned()
    }

    fn find_static_by_transport_id(&self, transport_channel_id: u16) -> Option<Arc<Channel>> {
        self.static_handles
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .find(|channel| channel.transport_channel_id() == Some(transport_channel_id))
            .cloned()
    }

    fn wait_fds(&self, fds: &mut Vec<RawFd>) {
        fds.push(self.send_wake.readable_fd());
        let drdynvc = self.state.lock().unwrap().drdynvc_channel.clone();
        if let Some(drdynvc) = drdynvc {
            if let Ok(QueryValue::FileHandle(fd)) = drdynvc.query(QueryKind::FileHandle) {
                fds.push(fd);
            }
        }
    }

    fn destroy(&self) {
        let dvcs: Vec<Arc<Channel>> = self.state.lock().unwrap().dvc_table.values().cloned().collect();
        for dvc in dvcs {
            if let Err(err) = dvc.close() {
                warn!(?err, "failed to close dvc during manager teardown");
            }
        }

        let drdynvc = self.state.lock().unwrap().drdynvc_channel.take();
        if let Some(drdynvc) = drdynvc {
            if let Err(err) = drdynvc.close() {
                warn!(?err, "failed to close drdynvc channel during manager teardown");
            }
        }

        self.send_queue.lock().unwrap().clear();
        self.send_wake.clear();
    }

    pub(crate) fn is_drdynvc_ready(&self) -> bool {
        matches!(self.state.lock().unwrap().drdynvc_state, DrdynvcState::Ready)
    }

    pub(crate) fn drdynvc_transport_id(&self) -> Option<u16> {
        self.state.lock().unwrap().drdynvc_channel.as_ref().and_then(|c| c.transport_channel_id())
    }

    pub(crate) fn enqueue_send(&self, item: DataItem) {
        self.send_queue.lock().unwrap().push_back(item);
        self.send_wake.set();
    }

    pub(crate) fn detach_static(&self, index: usize) {
        if let Some(slot) = self.static_handles.lock().unwrap().get_mut(index) {
            *slot = None;
        }
    }

    pub(crate) fn remove_dvc(&self, dvc_id: u32) {
        self.state.lock().unwrap().dvc_table.remove(&dvc_id);
    }

    pub(crate) fn emit_close_request(&self, dvc_id: u32) {
        let Some(transport_id) = self.drdynvc_transport_id() else {
            warn!(dvc_id, "cannot emit CLOSE_REQUEST: drdynvc channel not attached");
            return;
        };
        self.enqueue_send(DataItem::new(transport_id, codec::encode_close_request(dvc_id)));
    }
}

/// Placeholder transport id used only for logging/tagging when a DVC data fragment arrives but
/// the `drdynvc` channel handle itself was, implausibly, not resolvable (manager invariant I3
/// guarantees this never happens once `Ready`; this guards against it regardless).
fn transport_channel_id_unknown() -> u16 {
    0
}

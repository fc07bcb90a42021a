//! End-to-end seed scenarios S1-S6 from spec.md §8, driven entirely through the public API
//! against a mock `Peer`. Each test plays a fixed sequence of `pump`/`dispatch` calls and checks
//! the wire bytes the manager would actually hand to the transport, or the payload a caller
//! would actually read back.

use std::sync::{Arc, Mutex};

use ironrdp_wts_channels::{
    ChannelManager, ChannelManagerConfig, ChunkFlags, OpenFlags, Peer, QueryKind, QueryValue, StaticChannelDescriptor,
};

fn name8(s: &str) -> [u8; 8] {
    let mut name = [0u8; 8];
    name[..s.len()].copy_from_slice(s.as_bytes());
    name
}

#[derive(Default)]
struct Shared {
    sent: Mutex<Vec<(u16, Vec<u8>)>>,
}

struct MockPeer {
    activated: bool,
    channels: Vec<StaticChannelDescriptor>,
    chunk_size: u32,
    shared: Arc<Shared>,
}

impl Peer for MockPeer {
    fn activated(&self) -> bool {
        self.activated
    }

    fn static_channels(&self) -> &[StaticChannelDescriptor] {
        &self.channels
    }

    fn vc_chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn send_channel_data(&self, transport_channel_id: u16, payload: &[u8]) -> bool {
        self.shared.sent.lock().unwrap().push((transport_channel_id, payload.to_vec()));
        true
    }
}

const DRDYNVC_TRANSPORT_ID: u16 = 1004;
const SVC_TRANSPORT_ID: u16 = 1007;

/// Builds a manager over a mock peer with one `drdynvc` slot and one plain `svctest` SVC slot,
/// both pre-joined. `chunk_size` is the DVC fragmentation constant (§4.2); `activated` gates the
/// `drdynvc` handshake kickoff in `pump` (§4.3) the same way session activation does.
fn new_manager(chunk_size: u32, activated: bool) -> (ChannelManager, Arc<Shared>) {
    let shared = Arc::new(Shared::default());
    let peer = MockPeer {
        activated,
        channels: vec![
            StaticChannelDescriptor {
                name: name8("drdynvc"),
                transport_channel_id: DRDYNVC_TRANSPORT_ID,
                joined: true,
            },
            StaticChannelDescriptor {
                name: name8("svctest"),
                transport_channel_id: SVC_TRANSPORT_ID,
                joined: true,
            },
        ],
        chunk_size,
        shared: shared.clone(),
    };
    let manager = ChannelManager::new(Box::new(peer), ChannelManagerConfig::default()).unwrap();
    (manager, shared)
}

/// Pumps the manager through the capabilities handshake kickoff and the peer's response,
/// leaving `drdynvc_state = Ready`. Returns the capabilities bytes the manager actually sent,
/// for callers that want to assert on S1 directly.
fn bring_up_drdynvc(manager: &ChannelManager, shared: &Shared) -> Vec<u8> {
    manager.pump().unwrap();
    let sent = shared.sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "capabilities announcement should be the only queued item");
    let (channel_id, payload) = sent[0].clone();
    drop(sent);
    assert_eq!(channel_id, DRDYNVC_TRANSPORT_ID);

    // Header byte 0x50 (Cmd=CAPABILITIES<<4), pad byte, version=1 little-endian: `50 00 01 00`,
    // matching `encode_capabilities`'s header-byte-first framing (see DESIGN.md).
    manager.dispatch(DRDYNVC_TRANSPORT_ID, &[0x50, 0x00, 0x01, 0x00], ChunkFlags::FIRST | ChunkFlags::LAST, 4);
    shared.sent.lock().unwrap().clear();

    payload
}

#[test]
fn s1_capabilities_handshake() {
    let (manager, shared) = new_manager(1600, true);
    let payload = bring_up_drdynvc(&manager, &shared);

    // Capabilities version 1, little-endian, matches the emitter's fixed 4-byte literal.
    assert_eq!(payload, vec![0x50, 0x00, 0x01, 0x00]);

    // Ready now: a DVC open no longer fails with NotReady.
    assert!(manager.open("probe", OpenFlags::DYNAMIC).is_ok());
}

#[test]
fn s2_dvc_open_success() {
    let (manager, shared) = new_manager(1600, true);
    bring_up_drdynvc(&manager, &shared);

    let handle = manager.open("echo", OpenFlags::DYNAMIC).unwrap();
    assert_eq!(handle.dvc_id(), Some(1));

    manager.pump().unwrap();
    let sent = shared.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (channel_id, payload) = &sent[0];
    assert_eq!(*channel_id, DRDYNVC_TRANSPORT_ID);
    // Header 0x10 (Cmd=CREATE_REQUEST, cbChId=0), id 0x01, then "echo\0".
    assert_eq!(payload, &[0x10, 0x01, 0x65, 0x63, 0x68, 0x6F, 0x00]);
    drop(sent);

    manager.dispatch(DRDYNVC_TRANSPORT_ID, &[0x10, 0x01, 0x00, 0x00, 0x00, 0x00], ChunkFlags::FIRST | ChunkFlags::LAST, 6);

    match handle.query(QueryKind::Ready).unwrap() {
        QueryValue::Ready(ready) => assert!(ready),
        other => panic!("unexpected query result: {other:?}"),
    }
}

#[test]
fn s3_dvc_open_failure() {
    let (manager, shared) = new_manager(1600, true);
    bring_up_drdynvc(&manager, &shared);

    let handle = manager.open("echo", OpenFlags::DYNAMIC).unwrap();
    manager.pump().unwrap();

    manager.dispatch(DRDYNVC_TRANSPORT_ID, &[0x10, 0x01, 0xFF, 0xFF, 0xFF, 0xFF], ChunkFlags::FIRST | ChunkFlags::LAST, 6);

    let err = handle.query(QueryKind::Ready).unwrap_err();
    assert!(matches!(err, ironrdp_wts_channels::ChannelError::PeerFailure));
}

#[test]
fn s4_fragmented_dvc_inbound() {
    let (manager, shared) = new_manager(1600, true);
    bring_up_drdynvc(&manager, &shared);

    // dvc_id=1 is consumed by a throwaway open so the scenario's handle lands on id=2, matching
    // the spec's worked example verbatim.
    let _warm_up = manager.open("warmup", OpenFlags::DYNAMIC).unwrap();
    let handle = manager.open("frag", OpenFlags::DYNAMIC).unwrap();
    assert_eq!(handle.dvc_id(), Some(2));

    let payload: Vec<u8> = (0u8..16).collect();
    // `24 02 10 00`: Cmd=DATA_FIRST, Sp=1 (2-byte length), cbChId=0; id=2; total_length=16, no
    // payload bytes in this PDU.
    let first = vec![0x24, 0x02, 0x10, 0x00];
    manager.dispatch(DRDYNVC_TRANSPORT_ID, &first, ChunkFlags::FIRST | ChunkFlags::LAST, first.len() as u32);

    // `34 02` + 16 bytes: Cmd=DATA, cbChId=0; id=2; the full fragment.
    let mut second = vec![0x34, 0x02];
    second.extend_from_slice(&payload);
    manager.dispatch(DRDYNVC_TRANSPORT_ID, &second, ChunkFlags::FIRST | ChunkFlags::LAST, second.len() as u32);

    let mut buf = [0u8; 32];
    let n = handle.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], &payload[..]);
}

#[test]
fn s5_dvc_outbound_fragmentation() {
    let (manager, shared) = new_manager(8, true);
    bring_up_drdynvc(&manager, &shared);

    let _warm_up_1 = manager.open("warmup1", OpenFlags::DYNAMIC).unwrap();
    let _warm_up_2 = manager.open("warmup2", OpenFlags::DYNAMIC).unwrap();
    let handle = manager.open("bulk", OpenFlags::DYNAMIC).unwrap();
    assert_eq!(handle.dvc_id(), Some(3));

    // Drain the three queued CREATE_REQUESTs before measuring the write's own fragments.
    manager.pump().unwrap();
    shared.sent.lock().unwrap().clear();

    let payload: Vec<u8> = (0u8..20).collect();
    let written = handle.write(&payload).unwrap();
    assert_eq!(written, 20);

    manager.pump().unwrap();
    let sent = shared.sent.lock().unwrap();
    // 4 PDUs, not the 3 spec.md's prose sketches: see DESIGN.md and the matching
    // `fragment_dvc_payload_reproduces_original_under_concatenation` unit test in codec.rs for
    // why the per-item size cap yields one extra DATA PDU for this id/chunk_size/length triple.
    assert_eq!(sent.len(), 4);

    let mut recovered = Vec::new();
    for (channel_id, bytes) in sent.iter() {
        assert_eq!(*channel_id, DRDYNVC_TRANSPORT_ID);
        match ironrdp_wts_channels::decode(bytes).unwrap() {
            ironrdp_wts_channels::InboundPdu::DataFirst { fragment, .. } => recovered.extend_from_slice(&fragment),
            ironrdp_wts_channels::InboundPdu::Data { fragment, .. } => recovered.extend_from_slice(&fragment),
            other => panic!("unexpected pdu in outbound fragmentation: {other:?}"),
        }
    }
    assert_eq!(recovered, payload);
}

#[test]
fn s6_svc_round_trip() {
    // Not activated: this scenario only exercises the SVC path, and keeping `drdynvc` out of the
    // handshake kickoff keeps the send queue free of anything but the write under test.
    let (manager, shared) = new_manager(1600, false);

    let handle = manager.open("svctest", OpenFlags::empty()).unwrap();
    assert_eq!(handle.transport_channel_id(), Some(SVC_TRANSPORT_ID));

    let written = handle.write(&[0xAAu8; 100]).unwrap();
    assert_eq!(written, 100);

    manager.pump().unwrap();
    let sent = shared.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], (SVC_TRANSPORT_ID, vec![0xAAu8; 100]));
    drop(sent);

    manager.dispatch(SVC_TRANSPORT_ID, &[0xBBu8; 50], ChunkFlags::FIRST, 100);
    manager.dispatch(SVC_TRANSPORT_ID, &[0xCCu8; 50], ChunkFlags::LAST, 100);

    let mut buf = [0u8; 128];
    let n = handle.read(&mut buf).unwrap();
    assert_eq!(n, 100);
    assert_eq!(&buf[..50], &[0xBBu8; 50][..]);
    assert_eq!(&buf[50..100], &[0xCCu8; 50][..]);

    match handle.query(QueryKind::Ready).unwrap() {
        QueryValue::Ready(ready) => assert!(ready),
        other => panic!("unexpected query result: {other:?}"),
    }
}

#[test]
fn property_dvc_ids_strictly_increase_and_never_repeat_across_open_close() {
    let (manager, shared) = new_manager(1600, true);
    bring_up_drdynvc(&manager, &shared);

    let mut seen = Vec::new();
    for round in 0..5 {
        let handle = manager.open(&format!("c{round}"), OpenFlags::DYNAMIC).unwrap();
        let id = handle.dvc_id().unwrap();
        assert!(seen.last().copied().map(|last: u32| id > last).unwrap_or(true));
        seen.push(id);
        if round % 2 == 0 {
            handle.close().unwrap();
        }
    }

    let mut sorted = seen.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted, seen, "ids must be strictly increasing with no repeats");
}

#[test]
fn property_read_empty_then_enqueue_then_drain_toggles_wake() {
    let (manager, shared) = new_manager(1600, false);
    let handle = manager.open("svctest", OpenFlags::empty()).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(handle.read(&mut buf).unwrap(), 0);

    manager.dispatch(SVC_TRANSPORT_ID, b"hello", ChunkFlags::FIRST | ChunkFlags::LAST, 5);
    let QueryValue::FileHandle(fd) = handle.query(QueryKind::FileHandle).unwrap() else {
        panic!("expected a file handle");
    };
    assert!(fd >= 0);

    let n = handle.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(handle.read(&mut buf).unwrap(), 0);

    drop(shared);
}

#[test]
fn wait_fds_gains_drdynvc_fd_once_the_handshake_attaches_it() {
    let (manager, shared) = new_manager(1600, false);

    let mut fds = Vec::new();
    manager.wait_fds(&mut fds);
    assert_eq!(fds.len(), 1, "only the send wake before drdynvc is ever attached");

    // Reopen with activation on and run the handshake kickoff so drdynvc_channel attaches.
    let (manager, shared) = new_manager(1600, true);
    bring_up_drdynvc(&manager, &shared);

    let mut fds = Vec::new();
    manager.wait_fds(&mut fds);
    assert_eq!(fds.len(), 2, "send wake plus the drdynvc channel's own receive wake");
}

//! # Point-to-Point Transport
//!
//! The three-step rendezvous that moves every message:
//!
//! 1. The sender resolves the destination's physical address and drops a
//!    *request-to-send* into the destination node's shared request inbox.
//! 2. The receiver, having matched the request, opens a reply mailbox and
//!    *confirms*, telling the sender which port the final ACK will come from.
//! 3. The sender streams the payload through a portal; the receiver *acks*
//!    with the outcome code and the byte count it actually consumed.
//!
//! When sender and receiver share a node the portal leg collapses into a
//! buffer-slot memcpy: the request advertises a slot id instead of a portal
//! port and the sender parks on the slot until the receiver copied out of
//! its buffer.
//!
//! Three send modes are dispatched here; only the synchronous one is
//! implemented, buffered and ready sends report an unsupported operation.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

use crate::buffer_slot::{self, SlotPool};
use crate::datatype;
use crate::error::{MpiError, MPI_SUCCESS};
use crate::process;
use crate::request::{self, RequestKey, RequestQueue};
use crate::substrate::{
    MailboxId, Port, PortSelector, PortalId, Substrate, COMM_REQ_RECV_PORT,
};
use crate::wire::{ControlMessage, FRAME_LEN};

/// Context ids live in `[0, CONTEXT_LIMIT)`.
pub const CONTEXT_LIMIT: i32 = 32_768;

/// First context id available past the predefined communicators.
const FIRST_FREE_CONTEXT: i32 = 3;

/// Send-mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommMode {
    /// Rendezvous send; completes when the receiver acknowledged.
    Sync,
    /// Buffered send; not implemented.
    Buffered,
    /// Ready send; not implemented.
    Ready,
}

static NEXT_CONTEXT: AtomicI32 = AtomicI32::new(FIRST_FREE_CONTEXT);

/// Vends the next free context id.
///
/// Dynamic communicators are not constructible yet, so these ids are minted
/// but never observed on the wire.
pub fn allocate_context() -> i32 {
    NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed)
}

/// Serializes the remote receive sequence across co-located ranks.
static NODE_RECV_LOCK: Mutex<()> = Mutex::new(());

/// Resets the context allocator.
pub(crate) fn context_init() -> Result<(), MpiError> {
    NEXT_CONTEXT.store(FIRST_FREE_CONTEXT, Ordering::Relaxed);
    Ok(())
}

pub(crate) fn context_finalize() -> Result<(), MpiError> {
    Ok(())
}

/// Everything one rank needs to run the protocol.
pub(crate) struct CommEndpoint<'a> {
    pub substrate: &'a dyn Substrate,
    pub inbox: MailboxId,
    pub inportal: PortalId,
    pub request_inbox: MailboxId,
    pub rqueue: &'a RequestQueue,
    pub slots: &'a SlotPool,
    pub recv_lock: &'a Mutex<()>,
}

/// What a receive produced: the actual peer, and the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecvOutcome {
    pub source: i32,
    pub tag: i32,
    pub received: usize,
    /// `MPI_SUCCESS`, or the protocol error the transfer ended with.
    pub code: i32,
}

/// Mode-dispatching send entry point.
#[allow(clippy::too_many_arguments)]
pub(crate) fn send(
    ep: &CommEndpoint<'_>,
    mode: CommMode,
    cid: i32,
    buf: &[u8],
    src: i32,
    dest: i32,
    dest_name: &str,
    datatype_id: i16,
    tag: i32,
) -> Result<(), MpiError> {
    if !(0..CONTEXT_LIMIT).contains(&cid) {
        return Err(MpiError::Intern);
    }

    match mode {
        CommMode::Sync => sync_send(ep, cid as u16, buf, src, dest, dest_name, datatype_id, tag),
        CommMode::Buffered | CommMode::Ready => Err(MpiError::UnsupportedOperation),
    }
}

/// Matching receive entry point.
pub(crate) fn recv(
    ep: &CommEndpoint<'_>,
    cid: i32,
    buf: &mut [u8],
    expected: RequestKey,
    datatype_id: i16,
) -> Result<RecvOutcome, MpiError> {
    if !(0..CONTEXT_LIMIT).contains(&cid) {
        return Err(MpiError::Intern);
    }

    let msg = ep
        .rqueue
        .receive(&expected, ep.substrate, ep.request_inbox)?;
    let source = msg.src as i32;
    let tag = msg.tag;

    debug!("matched request from rank {} tag {}", source, tag);

    // Datatype compatibility is checked after matching; an incompatible
    // transfer still completes the handshake so the sender is not wedged,
    // but the user buffer stays untouched.
    if !datatype::types_match(datatype_id, msg.datatype) {
        let code = MpiError::Type.code();
        if msg.slot_id() >= 0 {
            ep.slots.complete(msg.slot_id(), code)?;
        } else {
            remote_consume(ep, &msg, None)?;
        }
        return Ok(RecvOutcome {
            source,
            tag,
            received: 0,
            code,
        });
    }

    if msg.slot_id() >= 0 {
        // Same-node shortcut: memcpy straight out of the sender's buffer.
        let advertised = msg.size as usize;
        let received = advertised.min(buf.len());
        ep.slots.read(msg.slot_id(), &mut buf[..received])?;
        let code = if advertised > buf.len() {
            MpiError::Other.code()
        } else {
            MPI_SUCCESS
        };
        ep.slots.complete(msg.slot_id(), code)?;
        return Ok(RecvOutcome {
            source,
            tag,
            received,
            code,
        });
    }

    let (received, code) = remote_consume(ep, &msg, Some(buf))?;
    Ok(RecvOutcome {
        source,
        tag,
        received,
        code,
    })
}

#[allow(clippy::too_many_arguments)]
fn sync_send(
    ep: &CommEndpoint<'_>,
    cid: u16,
    buf: &[u8],
    src: i32,
    dest: i32,
    dest_name: &str,
    datatype_id: i16,
    tag: i32,
) -> Result<(), MpiError> {
    let (remote_node, remote_port) = ep
        .substrate
        .name_lookup(dest_name)
        .map_err(|_| MpiError::Intern)?;

    debug!(
        "rank {} sending to {} at {}:{}",
        src, dest_name, remote_node, remote_port
    );

    let outbox = ep
        .substrate
        .mailbox_open(remote_node, COMM_REQ_RECV_PORT)
        .map_err(|_| MpiError::Intern)?;

    let result = if remote_node == ep.substrate.node_num() {
        local_send(ep, outbox, cid, buf, src, dest, datatype_id, tag)
    } else {
        remote_send(
            ep,
            outbox,
            remote_node,
            remote_port,
            cid,
            buf,
            src,
            dest,
            datatype_id,
            tag,
        )
    };

    if ep.substrate.mailbox_close(outbox).is_err() {
        return Err(MpiError::Unknown);
    }
    result
}

/// Same-node send: park the buffer in a slot and wait for the copy.
#[allow(clippy::too_many_arguments)]
fn local_send(
    ep: &CommEndpoint<'_>,
    outbox: MailboxId,
    cid: u16,
    buf: &[u8],
    src: i32,
    dest: i32,
    datatype_id: i16,
    tag: i32,
) -> Result<(), MpiError> {
    let slot = ep.slots.reserve(buf)?;

    let mut msg = ControlMessage::request_to_send(
        cid,
        src as i16,
        dest as i16,
        tag,
        datatype_id,
        buf.len() as u64,
        Port::MAX,
        Port::MAX,
        ep.substrate.node_num(),
    );
    msg.word = slot;

    debug!("rank {} taking the local shortcut via slot {}", src, slot);

    if ep
        .substrate
        .mailbox_write(outbox, &msg.to_bytes())
        .is_err()
    {
        let _ = ep.slots.release(slot);
        return Err(MpiError::Intern);
    }

    let code = ep.slots.wait(slot)?;
    ep.slots.release(slot)?;

    match MpiError::from_code(code) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Remote send: request, confirmation, portal payload, final ACK.
#[allow(clippy::too_many_arguments)]
fn remote_send(
    ep: &CommEndpoint<'_>,
    outbox: MailboxId,
    remote_node: u8,
    remote_port: Port,
    cid: u16,
    buf: &[u8],
    src: i32,
    dest: i32,
    datatype_id: i16,
    tag: i32,
) -> Result<(), MpiError> {
    let outportal = ep
        .substrate
        .portal_open(remote_node, remote_port)
        .map_err(|_| MpiError::Intern)?;

    let result = remote_send_payload(
        ep,
        outbox,
        outportal,
        remote_node,
        cid,
        buf,
        src,
        dest,
        datatype_id,
        tag,
    );

    if ep.substrate.portal_close(outportal).is_err() {
        return Err(MpiError::Unknown);
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn remote_send_payload(
    ep: &CommEndpoint<'_>,
    outbox: MailboxId,
    outportal: PortalId,
    remote_node: u8,
    cid: u16,
    buf: &[u8],
    src: i32,
    dest: i32,
    datatype_id: i16,
    tag: i32,
) -> Result<(), MpiError> {
    let portal_port = ep
        .substrate
        .portal_port(outportal)
        .map_err(|_| MpiError::Intern)?;
    let inbox_port = ep
        .substrate
        .mailbox_port(ep.inbox)
        .map_err(|_| MpiError::Intern)?;

    let msg = ControlMessage::request_to_send(
        cid,
        src as i16,
        dest as i16,
        tag,
        datatype_id,
        buf.len() as u64,
        portal_port,
        inbox_port,
        ep.substrate.node_num(),
    );

    ep.substrate
        .mailbox_write(outbox, &msg.to_bytes())
        .map_err(|_| MpiError::Intern)?;

    // The confirmation names the port the final ACK will come from.
    ep.substrate
        .mailbox_set_remote(ep.inbox, remote_node, PortSelector::Any)
        .map_err(|_| MpiError::Intern)?;
    let confirm = read_frame(ep.substrate, ep.inbox)?;
    let remote_outbox_port = confirm.inbox_port;

    debug!(
        "rank {} streaming {} bytes through portal port {}",
        src,
        buf.len(),
        portal_port
    );

    ep.substrate
        .portal_write(outportal, buf)
        .map_err(|_| MpiError::Intern)?;

    ep.substrate
        .mailbox_set_remote(ep.inbox, remote_node, PortSelector::Port(remote_outbox_port))
        .map_err(|_| MpiError::Intern)?;
    let ack = read_frame(ep.substrate, ep.inbox)?;

    match MpiError::from_code(ack.errcode()) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Receiver half of the remote rendezvous.
///
/// With `dest` absent the payload is drained into scratch and the transfer
/// is acknowledged as a datatype mismatch. Returns the bytes delivered to
/// the user buffer and the outcome code that was acknowledged.
fn remote_consume(
    ep: &CommEndpoint<'_>,
    msg: &ControlMessage,
    dest: Option<&mut [u8]>,
) -> Result<(usize, i32), MpiError> {
    let _serialized = ep.recv_lock.lock();

    let outbox = ep
        .substrate
        .mailbox_open(msg.source_node, msg.inbox_port)
        .map_err(|_| MpiError::Intern)?;

    let result = remote_consume_payload(ep, outbox, msg, dest);

    if ep.substrate.mailbox_close(outbox).is_err() {
        return Err(MpiError::Unknown);
    }
    result
}

fn remote_consume_payload(
    ep: &CommEndpoint<'_>,
    outbox: MailboxId,
    msg: &ControlMessage,
    dest: Option<&mut [u8]>,
) -> Result<(usize, i32), MpiError> {
    let reply_port = ep
        .substrate
        .mailbox_port(outbox)
        .map_err(|_| MpiError::Intern)?;

    let confirm = ControlMessage::confirm(reply_port);
    ep.substrate
        .mailbox_write(outbox, &confirm.to_bytes())
        .map_err(|_| MpiError::Intern)?;

    ep.substrate
        .portal_allow(ep.inportal, msg.source_node, msg.portal_port)
        .map_err(|_| MpiError::Intern)?;

    let advertised = msg.size as usize;
    let (delivered, code) = match dest {
        Some(buf) => {
            let received = advertised.min(buf.len());
            ep.substrate
                .portal_read(ep.inportal, &mut buf[..received])
                .map_err(|_| MpiError::Intern)?;
            let code = if advertised > buf.len() {
                MpiError::Other.code()
            } else {
                MPI_SUCCESS
            };
            (received, code)
        }
        None => {
            // Drain the payload so the sender's portal write completes.
            let mut scratch = vec![0u8; advertised];
            ep.substrate
                .portal_read(ep.inportal, &mut scratch)
                .map_err(|_| MpiError::Intern)?;
            (0, MpiError::Type.code())
        }
    };

    let ack = ControlMessage::ack(msg.cid, ep.substrate.node_num(), delivered as u32, code);
    ep.substrate
        .mailbox_write(outbox, &ack.to_bytes())
        .map_err(|_| MpiError::Intern)?;

    Ok((delivered, code))
}

fn read_frame(substrate: &dyn Substrate, inbox: MailboxId) -> Result<ControlMessage, MpiError> {
    let mut frame = [0u8; FRAME_LEN];
    let len = substrate
        .mailbox_read(inbox, &mut frame)
        .map_err(|_| MpiError::Intern)?;
    ControlMessage::from_bytes(&frame[..len]).ok_or(MpiError::Intern)
}

/// Runs `send` against the node's live runtime state.
#[allow(clippy::too_many_arguments)]
pub(crate) fn comm_send(
    mode: CommMode,
    cid: i32,
    buf: &[u8],
    src: i32,
    dest: i32,
    dest_name: &str,
    datatype_id: i16,
    tag: i32,
) -> Result<(), MpiError> {
    let substrate = process::substrate()?;
    let proc = process::current_process()?;
    let ep = CommEndpoint {
        substrate: substrate.as_ref(),
        inbox: proc.inbox()?,
        inportal: proc.inportal()?,
        request_inbox: process::request_inbox()?,
        rqueue: request::node_queue(),
        slots: buffer_slot::node_slots(),
        recv_lock: &NODE_RECV_LOCK,
    };
    send(&ep, mode, cid, buf, src, dest, dest_name, datatype_id, tag)
}

/// Runs `recv` against the node's live runtime state.
pub(crate) fn comm_recv(
    cid: i32,
    buf: &mut [u8],
    expected: RequestKey,
    datatype_id: i16,
) -> Result<RecvOutcome, MpiError> {
    let substrate = process::substrate()?;
    let proc = process::current_process()?;
    let ep = CommEndpoint {
        substrate: substrate.as_ref(),
        inbox: proc.inbox()?,
        inportal: proc.inportal()?,
        request_inbox: process::request_inbox()?,
        rqueue: request::node_queue(),
        slots: buffer_slot::node_slots(),
        recv_lock: &NODE_RECV_LOCK,
    };
    recv(&ep, cid, buf, expected, datatype_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{FLOAT, INT};
    use crate::substrate::{MemoryFabric, MemoryNode};
    use std::sync::Arc;
    use std::thread;

    /// One hand-built rank endpoint over a memory fabric node.
    struct Peer {
        node: Arc<MemoryNode>,
        inbox: MailboxId,
        inportal: PortalId,
        request_inbox: MailboxId,
        rqueue: Arc<RequestQueue>,
        slots: Arc<SlotPool>,
        recv_lock: Arc<Mutex<()>>,
    }

    impl Peer {
        fn endpoint(&self) -> CommEndpoint<'_> {
            CommEndpoint {
                substrate: self.node.as_ref(),
                inbox: self.inbox,
                inportal: self.inportal,
                request_inbox: self.request_inbox,
                rqueue: &self.rqueue,
                slots: &self.slots,
                recv_lock: &self.recv_lock,
            }
        }
    }

    /// Builds one rank on `node`, sharing the node-level pieces with an
    /// already-built co-located peer when given one.
    fn peer_on(node: Arc<MemoryNode>, name: &str, shared: Option<&Peer>) -> Peer {
        let inbox = node.mailbox_create(name).unwrap();
        let port = node.mailbox_port(inbox).unwrap();
        let inportal = node.portal_bind(port).unwrap();
        node.name_register(name, port).unwrap();

        let (request_inbox, rqueue, slots, recv_lock) = match shared {
            Some(peer) => (
                peer.request_inbox,
                Arc::clone(&peer.rqueue),
                Arc::clone(&peer.slots),
                Arc::clone(&peer.recv_lock),
            ),
            None => (
                node.mailbox_bind(COMM_REQ_RECV_PORT).unwrap(),
                Arc::new(RequestQueue::new()),
                Arc::new(SlotPool::new()),
                Arc::new(Mutex::new(())),
            ),
        };

        Peer {
            node,
            inbox,
            inportal,
            request_inbox,
            rqueue,
            slots,
            recv_lock,
        }
    }

    #[test]
    fn test_remote_round_trip() {
        let fabric = MemoryFabric::new();
        let sender = peer_on(fabric.node(0), "mpi-process-0", None);
        let receiver = peer_on(fabric.node(1), "mpi-process-1", None);

        let payload: Vec<u8> = (0u8..16).collect();
        let expected = payload.clone();

        let receiver_thread = thread::spawn(move || {
            let mut buf = vec![0u8; 16];
            let outcome = recv(
                &receiver.endpoint(),
                0,
                &mut buf,
                RequestKey::new(0, 0, 1, 7),
                INT.id(),
            )
            .unwrap();
            (outcome, buf)
        });

        send(
            &sender.endpoint(),
            CommMode::Sync,
            0,
            &payload,
            0,
            1,
            "mpi-process-1",
            INT.id(),
            7,
        )
        .unwrap();

        let (outcome, buf) = receiver_thread.join().unwrap();
        assert_eq!(outcome.code, MPI_SUCCESS);
        assert_eq!(outcome.received, 16);
        assert_eq!(outcome.source, 0);
        assert_eq!(outcome.tag, 7);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_remote_truncation_reports_on_both_sides() {
        let fabric = MemoryFabric::new();
        let sender = peer_on(fabric.node(0), "mpi-process-0", None);
        let receiver = peer_on(fabric.node(1), "mpi-process-1", None);

        let receiver_thread = thread::spawn(move || {
            let mut buf = vec![0u8; 4];
            let outcome = recv(
                &receiver.endpoint(),
                0,
                &mut buf,
                RequestKey::new(0, 0, 1, 3),
                INT.id(),
            )
            .unwrap();
            (outcome, buf)
        });

        let payload = [5u8; 8];
        let send_result = send(
            &sender.endpoint(),
            CommMode::Sync,
            0,
            &payload,
            0,
            1,
            "mpi-process-1",
            INT.id(),
            3,
        );

        let (outcome, buf) = receiver_thread.join().unwrap();
        assert_eq!(send_result, Err(MpiError::Other));
        assert_eq!(outcome.code, MpiError::Other.code());
        assert_eq!(outcome.received, 4);
        assert_eq!(buf, vec![5u8; 4]);
    }

    #[test]
    fn test_remote_datatype_mismatch_leaves_buffer_untouched() {
        let fabric = MemoryFabric::new();
        let sender = peer_on(fabric.node(0), "mpi-process-0", None);
        let receiver = peer_on(fabric.node(1), "mpi-process-1", None);

        let receiver_thread = thread::spawn(move || {
            let mut buf = vec![0xAAu8; 8];
            let outcome = recv(
                &receiver.endpoint(),
                0,
                &mut buf,
                RequestKey::new(0, 0, 1, 1),
                FLOAT.id(),
            )
            .unwrap();
            (outcome, buf)
        });

        let payload = [1u8; 8];
        let send_result = send(
            &sender.endpoint(),
            CommMode::Sync,
            0,
            &payload,
            0,
            1,
            "mpi-process-1",
            INT.id(),
            1,
        );

        let (outcome, buf) = receiver_thread.join().unwrap();
        // Both sides observe the mismatch and the receiver buffer is intact.
        assert_eq!(send_result, Err(MpiError::Type));
        assert_eq!(outcome.code, MpiError::Type.code());
        assert_eq!(outcome.received, 0);
        assert_eq!(buf, vec![0xAAu8; 8]);
    }

    #[test]
    fn test_local_shortcut_round_trip_and_truncation() {
        let fabric = MemoryFabric::new();
        let node = fabric.node(0);
        let rank0 = peer_on(Arc::clone(&node), "mpi-process-0", None);
        let rank1 = peer_on(node, "mpi-process-1", Some(&rank0));

        // Round trip through a slot.
        let receiver_thread = thread::spawn({
            move || {
                let mut buf = vec![0u8; 8];
                let outcome = recv(
                    &rank1.endpoint(),
                    0,
                    &mut buf,
                    RequestKey::new(0, 0, 1, 9),
                    INT.id(),
                )
                .unwrap();
                let mut small = vec![0u8; 2];
                let truncated = recv(
                    &rank1.endpoint(),
                    0,
                    &mut small,
                    RequestKey::new(0, 0, 1, 10),
                    INT.id(),
                )
                .unwrap();
                (outcome, buf, truncated, small)
            }
        });

        let payload: Vec<u8> = (10u8..18).collect();
        send(
            &rank0.endpoint(),
            CommMode::Sync,
            0,
            &payload,
            0,
            1,
            "mpi-process-1",
            INT.id(),
            9,
        )
        .unwrap();

        let second = [3u8, 4, 5, 6];
        let second_result = send(
            &rank0.endpoint(),
            CommMode::Sync,
            0,
            &second,
            0,
            1,
            "mpi-process-1",
            INT.id(),
            10,
        );

        let (outcome, buf, truncated, small) = receiver_thread.join().unwrap();
        assert_eq!(outcome.code, MPI_SUCCESS);
        assert_eq!(outcome.received, 8);
        assert_eq!(buf, (10u8..18).collect::<Vec<_>>());

        assert_eq!(second_result, Err(MpiError::Other));
        assert_eq!(truncated.code, MpiError::Other.code());
        assert_eq!(truncated.received, 2);
        assert_eq!(small, vec![3u8, 4]);
    }

    #[test]
    fn test_unsupported_modes() {
        let fabric = MemoryFabric::new();
        let sender = peer_on(fabric.node(0), "mpi-process-0", None);

        for mode in [CommMode::Buffered, CommMode::Ready] {
            let result = send(
                &sender.endpoint(),
                mode,
                0,
                &[1, 2, 3],
                0,
                1,
                "mpi-process-1",
                INT.id(),
                0,
            );
            assert_eq!(result, Err(MpiError::UnsupportedOperation));
        }
    }

    #[test]
    fn test_bad_context_is_internal_error() {
        let fabric = MemoryFabric::new();
        let sender = peer_on(fabric.node(0), "mpi-process-0", None);

        let result = send(
            &sender.endpoint(),
            CommMode::Sync,
            CONTEXT_LIMIT,
            &[],
            0,
            1,
            "mpi-process-1",
            INT.id(),
            0,
        );
        assert_eq!(result, Err(MpiError::Intern));

        let mut buf = [0u8; 4];
        let result = recv(
            &sender.endpoint(),
            -1,
            &mut buf,
            RequestKey::new(0, 0, 0, 0),
            INT.id(),
        );
        assert_eq!(result.err(), Some(MpiError::Intern));
    }

    #[test]
    fn test_context_allocator_is_monotone_from_three() {
        context_init().unwrap();
        let a = allocate_context();
        let b = allocate_context();
        assert_eq!(a, 3);
        assert_eq!(b, 4);
        context_finalize().unwrap();
    }
}

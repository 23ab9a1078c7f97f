//! # Request Matching Queue
//!
//! All request-to-send control messages addressed to a node arrive through
//! one shared well-known inbox. Whichever rank is currently receiving drains
//! that inbox; arrivals meant for a different receiver (or a later receive)
//! are parked in a bounded FIFO and re-offered to every subsequent matching
//! attempt. Because the queue is scanned head to tail and arrivals append,
//! messages from the same `(source, tag, context)` are always delivered in
//! arrival order, which is what gives receives their deterministic MPI
//! semantics.
//!
//! Inbox ownership is cooperative: exactly one thread blocks on the shared
//! inbox at a time, and contenders park on a condvar that is pulsed whenever
//! the owner enqueues a non-matching arrival or releases the inbox.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

use crate::error::MpiError;
use crate::substrate::{MailboxId, Substrate};
use crate::wire::{ControlMessage, FRAME_LEN};
use crate::ANY_SOURCE;
use crate::ANY_TAG;

/// Maximum number of parked, unmatched requests per node.
pub const RQUEUE_MAX_SIZE: usize = 32;

/// The fields a receive matches an incoming request against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestKey {
    pub cid: u16,
    pub src: i32,
    pub target: i32,
    pub tag: i32,
}

impl RequestKey {
    /// Builds a new matching key.
    pub fn new(cid: u16, src: i32, target: i32, tag: i32) -> Self {
        RequestKey {
            cid,
            src,
            target,
            tag,
        }
    }

    /// Key carried by an incoming control message.
    pub fn of_message(msg: &ControlMessage) -> Self {
        RequestKey {
            cid: msg.cid,
            src: msg.src as i32,
            target: msg.target as i32,
            tag: msg.tag,
        }
    }

    /// The matching predicate.
    ///
    /// Context and target must agree exactly; source and tag each match on
    /// equality or when either side holds the wildcard. Datatype
    /// compatibility is deliberately absent: it is checked after matching
    /// and surfaces as an error, not as a non-match.
    pub fn matches(&self, other: &RequestKey) -> bool {
        if self.cid != other.cid {
            return false;
        }
        if self.target != other.target {
            return false;
        }
        if self.src != ANY_SOURCE && other.src != ANY_SOURCE && self.src != other.src {
            return false;
        }
        if self.tag != ANY_TAG && other.tag != ANY_TAG && self.tag != other.tag {
            return false;
        }
        true
    }
}

struct QueueInner {
    entries: VecDeque<ControlMessage>,
    /// True while some thread is blocked reading the shared inbox.
    reader_active: bool,
}

/// FIFO of unmatched incoming requests plus the shared-inbox arbitration.
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    changed: Condvar,
}

/// The node-wide queue used by the runtime's ranks.
static NODE_QUEUE: RequestQueue = RequestQueue::new();

/// Returns the node-wide request queue.
pub(crate) fn node_queue() -> &'static RequestQueue {
    &NODE_QUEUE
}

impl RequestQueue {
    pub const fn new() -> Self {
        RequestQueue {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                reader_active: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Blocks until a request matching `expected` is available, either from
    /// the parked FIFO or freshly read off the shared inbox.
    pub fn receive(
        &self,
        expected: &RequestKey,
        substrate: &dyn Substrate,
        request_inbox: MailboxId,
    ) -> Result<ControlMessage, MpiError> {
        let mut inner = self.inner.lock();
        loop {
            // Head-to-tail scan keeps per-(src, tag, cid) arrival order.
            if let Some(pos) = inner
                .entries
                .iter()
                .position(|msg| expected.matches(&RequestKey::of_message(msg)))
            {
                return Ok(inner.entries.remove(pos).expect("scanned position"));
            }

            if inner.reader_active {
                // Someone else owns the inbox; wait for the queue to change.
                self.changed.wait(&mut inner);
                continue;
            }

            inner.reader_active = true;
            drop(inner);

            let arrival = read_request_frame(substrate, request_inbox);

            inner = self.inner.lock();
            inner.reader_active = false;
            self.changed.notify_all();

            let msg = arrival?;
            if expected.matches(&RequestKey::of_message(&msg)) {
                return Ok(msg);
            }
            if inner.entries.len() >= RQUEUE_MAX_SIZE {
                return Err(MpiError::Intern);
            }
            inner.entries.push_back(msg);
        }
    }

    /// Number of parked, unmatched requests.
    pub fn pending(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Prepares the queue for a fresh run.
    pub(crate) fn init(&self) -> Result<(), MpiError> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.reader_active = false;
        Ok(())
    }

    /// Tears the queue down; leftover unmatched requests are a protocol
    /// error surfaced as [`MpiError::Pending`].
    pub(crate) fn finalize(&self) -> Result<(), MpiError> {
        let inner = self.inner.lock();
        if inner.entries.is_empty() {
            Ok(())
        } else {
            Err(MpiError::Pending)
        }
    }
}

fn read_request_frame(
    substrate: &dyn Substrate,
    request_inbox: MailboxId,
) -> Result<ControlMessage, MpiError> {
    let mut frame = [0u8; FRAME_LEN];
    let len = substrate
        .mailbox_read(request_inbox, &mut frame)
        .map_err(|_| MpiError::Intern)?;
    ControlMessage::from_bytes(&frame[..len]).ok_or(MpiError::Intern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{MemoryFabric, COMM_REQ_RECV_PORT};
    use crate::wire::NO_SLOT;
    use std::sync::Arc;
    use std::thread;

    fn request(cid: u16, src: i16, target: i16, tag: i32, size: u64) -> ControlMessage {
        let mut msg = ControlMessage::request_to_send(cid, src, target, tag, 2, size, 0, 0, 1);
        msg.word = NO_SLOT;
        msg
    }

    #[test]
    fn test_matching_predicate() {
        let incoming = RequestKey::new(0, 2, 0, 7);

        assert!(RequestKey::new(0, 2, 0, 7).matches(&incoming));
        assert!(RequestKey::new(0, ANY_SOURCE, 0, 7).matches(&incoming));
        assert!(RequestKey::new(0, 2, 0, ANY_TAG).matches(&incoming));
        assert!(RequestKey::new(0, ANY_SOURCE, 0, ANY_TAG).matches(&incoming));

        // Context and target never match wildcards.
        assert!(!RequestKey::new(1, 2, 0, 7).matches(&incoming));
        assert!(!RequestKey::new(0, 2, 1, 7).matches(&incoming));
        assert!(!RequestKey::new(0, 3, 0, 7).matches(&incoming));
        assert!(!RequestKey::new(0, 2, 0, 8).matches(&incoming));
    }

    #[test]
    fn test_out_of_order_arrivals_are_parked_and_reoffered() {
        let fabric = MemoryFabric::new();
        let receiver_node = fabric.node(0);
        let sender_node = fabric.node(1);

        let inbox = receiver_node.mailbox_bind(COMM_REQ_RECV_PORT).unwrap();
        let outbox = sender_node.mailbox_open(0, COMM_REQ_RECV_PORT).unwrap();

        // Arrivals: first a request the receiver is not expecting yet.
        sender_node
            .mailbox_write(outbox, &request(0, 2, 0, 9, 100).to_bytes())
            .unwrap();
        sender_node
            .mailbox_write(outbox, &request(0, 1, 0, 7, 200).to_bytes())
            .unwrap();

        let queue = RequestQueue::new();

        let first = queue
            .receive(
                &RequestKey::new(0, 1, 0, 7),
                receiver_node.as_ref(),
                inbox,
            )
            .unwrap();
        assert_eq!(first.size, 200);
        assert_eq!(queue.pending(), 1);

        let second = queue
            .receive(
                &RequestKey::new(0, 2, 0, 9),
                receiver_node.as_ref(),
                inbox,
            )
            .unwrap();
        assert_eq!(second.size, 100);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_same_source_same_tag_preserves_arrival_order() {
        let fabric = MemoryFabric::new();
        let receiver_node = fabric.node(0);
        let sender_node = fabric.node(1);

        let inbox = receiver_node.mailbox_bind(COMM_REQ_RECV_PORT).unwrap();
        let outbox = sender_node.mailbox_open(0, COMM_REQ_RECV_PORT).unwrap();

        for size in [10u64, 20, 30] {
            sender_node
                .mailbox_write(outbox, &request(0, 1, 0, 5, size).to_bytes())
                .unwrap();
        }

        let queue = RequestQueue::new();
        let expected = RequestKey::new(0, ANY_SOURCE, 0, 5);
        for size in [10u64, 20, 30] {
            let msg = queue
                .receive(&expected, receiver_node.as_ref(), inbox)
                .unwrap();
            assert_eq!(msg.size, size);
        }
    }

    #[test]
    fn test_overflow_is_an_internal_error() {
        let fabric = MemoryFabric::new();
        let receiver_node = fabric.node(0);
        let sender_node = fabric.node(1);

        let inbox = receiver_node.mailbox_bind(COMM_REQ_RECV_PORT).unwrap();
        let outbox = sender_node.mailbox_open(0, COMM_REQ_RECV_PORT).unwrap();

        // One more unmatched arrival than the queue can park.
        for _ in 0..=RQUEUE_MAX_SIZE {
            sender_node
                .mailbox_write(outbox, &request(0, 2, 0, 9, 1).to_bytes())
                .unwrap();
        }

        let queue = RequestQueue::new();
        let never_matches = RequestKey::new(0, 1, 0, 7);
        let result = queue.receive(&never_matches, receiver_node.as_ref(), inbox);
        assert_eq!(result, Err(MpiError::Intern));
        assert_eq!(queue.pending(), RQUEUE_MAX_SIZE);
        assert!(queue.finalize().is_err());
    }

    #[test]
    fn test_concurrent_receivers_share_the_inbox() {
        let fabric = MemoryFabric::new();
        let receiver_node = fabric.node(0);
        let sender_node = fabric.node(1);

        let inbox = receiver_node.mailbox_bind(COMM_REQ_RECV_PORT).unwrap();
        let outbox = sender_node.mailbox_open(0, COMM_REQ_RECV_PORT).unwrap();

        let queue = Arc::new(RequestQueue::new());

        let mut receivers = Vec::new();
        for target in 0..4i16 {
            let queue = Arc::clone(&queue);
            let node = Arc::clone(&receiver_node);
            receivers.push(thread::spawn(move || {
                let expected = RequestKey::new(0, 1, target as i32, 3);
                queue.receive(&expected, node.as_ref(), inbox).unwrap()
            }));
        }

        // Interleave the requests in reverse target order.
        for target in (0..4i16).rev() {
            sender_node
                .mailbox_write(outbox, &request(0, 1, target, 3, target as u64).to_bytes())
                .unwrap();
        }

        for (target, receiver) in receivers.into_iter().enumerate() {
            let msg = receiver.join().unwrap();
            assert_eq!(msg.target as usize, target);
        }
    }
}

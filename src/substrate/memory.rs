//! # In-Process Reference Substrate
//!
//! `MemoryFabric` emulates a multi-node interconnect inside one OS process:
//! each node is a bus of mailbox and portal ports backed by channels, the
//! name service is a shared table, and the inter-node barrier is a shared
//! generation counter. The fabric exists so the runtime, its transport tests
//! and the integration suite can run without a real interconnect underneath.
//!
//! Mailbox envelopes carry their `(source node, source port)` so inbox
//! re-aiming (`mailbox_set_remote`) can filter; envelopes that do not pass
//! the current filter are stashed and re-offered on later reads. Portal
//! writes rendezvous with the reader: the writer parks until the allowed
//! reader has consumed the transfer.

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::{BarrierId, MailboxId, NodeNum, Port, PortSelector, PortalId, Substrate};
use super::COMM_REQ_RECV_PORT;

/// One control message in flight between two mailbox ports.
struct MailEnvelope {
    src_node: NodeNum,
    src_port: Port,
    data: Vec<u8>,
}

/// One bulk transfer in flight between two portal ports.
///
/// `done` is signalled by the reader after the copy, which is what blocks the
/// writer until consumption.
struct PortalEnvelope {
    src_node: NodeNum,
    src_port: Port,
    data: Vec<u8>,
    done: Sender<()>,
}

/// Dynamic port allocator for one node.
struct PortSpace {
    next: Port,
    in_use: BTreeSet<Port>,
}

impl PortSpace {
    fn new() -> Self {
        PortSpace {
            next: 1,
            in_use: BTreeSet::new(),
        }
    }

    fn alloc(&mut self) -> Result<Port> {
        for _ in 0..=Port::MAX as usize {
            let port = self.next;
            self.next = self.next.wrapping_add(1);
            // The request-receive port and the top port are never vended.
            if port == COMM_REQ_RECV_PORT || port == Port::MAX {
                continue;
            }
            if self.in_use.insert(port) {
                return Ok(port);
            }
        }
        Err(anyhow!("node port space exhausted"))
    }

    fn reserve(&mut self, port: Port) -> Result<()> {
        if self.in_use.insert(port) {
            Ok(())
        } else {
            Err(anyhow!("port {} already bound", port))
        }
    }

    fn release(&mut self, port: Port) {
        self.in_use.remove(&port);
    }
}

/// Per-node routing state: bound mailbox and portal ports.
///
/// Mailbox and portal ports are independent spaces, so a rank can expose its
/// inbox and inportal under one advertised port number.
struct NodeBus {
    node: NodeNum,
    mailbox_ports: Mutex<PortSpace>,
    portal_ports: Mutex<PortSpace>,
    mailbox_sinks: Mutex<HashMap<Port, Sender<MailEnvelope>>>,
    portal_sinks: Mutex<HashMap<Port, Sender<PortalEnvelope>>>,
}

impl NodeBus {
    fn new(node: NodeNum) -> Self {
        NodeBus {
            node,
            mailbox_ports: Mutex::new(PortSpace::new()),
            portal_ports: Mutex::new(PortSpace::new()),
            mailbox_sinks: Mutex::new(HashMap::new()),
            portal_sinks: Mutex::new(HashMap::new()),
        }
    }
}

/// Inter-node barrier cell shared by every participant.
struct BarrierCell {
    expected: usize,
    state: Mutex<(usize, u64)>,
    cond: Condvar,
}

impl BarrierCell {
    fn wait(&self) {
        let mut state = self.state.lock();
        let generation = state.1;
        state.0 += 1;
        if state.0 == self.expected {
            state.0 = 0;
            state.1 += 1;
            self.cond.notify_all();
        } else {
            while state.1 == generation {
                self.cond.wait(&mut state);
            }
        }
    }
}

/// Fabric-wide shared state.
struct FabricInner {
    buses: Mutex<HashMap<NodeNum, Arc<NodeBus>>>,
    names: Mutex<HashMap<String, (NodeNum, Port)>>,
    barriers: Mutex<HashMap<Vec<NodeNum>, Arc<BarrierCell>>>,
}

impl FabricInner {
    fn bus(&self, node: NodeNum) -> Arc<NodeBus> {
        let mut buses = self.buses.lock();
        Arc::clone(
            buses
                .entry(node)
                .or_insert_with(|| Arc::new(NodeBus::new(node))),
        )
    }
}

/// An in-process interconnect emulating any number of nodes.
#[derive(Clone)]
pub struct MemoryFabric {
    inner: Arc<FabricInner>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        MemoryFabric {
            inner: Arc::new(FabricInner {
                buses: Mutex::new(HashMap::new()),
                names: Mutex::new(HashMap::new()),
                barriers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the substrate instance for `node`, attaching it to the fabric.
    pub fn node(&self, node: NodeNum) -> Arc<MemoryNode> {
        Arc::new(MemoryNode {
            fabric: Arc::clone(&self.inner),
            bus: self.inner.bus(node),
            mailboxes: Mutex::new(HashMap::new()),
            portals: Mutex::new(HashMap::new()),
            barriers: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        })
    }
}

impl Default for MemoryFabric {
    fn default() -> Self {
        MemoryFabric::new()
    }
}

struct InboxEp {
    port: Port,
    rx: Receiver<MailEnvelope>,
    filter: Mutex<Option<(NodeNum, PortSelector)>>,
    stash: Mutex<VecDeque<MailEnvelope>>,
}

struct OutboxEp {
    dest_node: NodeNum,
    dest_port: Port,
    local_port: Port,
}

enum MailboxEp {
    In(InboxEp),
    Out(OutboxEp),
}

struct InPortalEp {
    port: Port,
    rx: Receiver<PortalEnvelope>,
    allow: Mutex<Option<(NodeNum, Port)>>,
    stash: Mutex<VecDeque<PortalEnvelope>>,
}

struct OutPortalEp {
    dest_node: NodeNum,
    dest_port: Port,
    local_port: Port,
}

enum PortalEp {
    In(InPortalEp),
    Out(OutPortalEp),
}

/// Per-node [`Substrate`] implementation over a [`MemoryFabric`].
pub struct MemoryNode {
    fabric: Arc<FabricInner>,
    bus: Arc<NodeBus>,
    mailboxes: Mutex<HashMap<u32, Arc<MailboxEp>>>,
    portals: Mutex<HashMap<u32, Arc<PortalEp>>>,
    barriers: Mutex<HashMap<u32, Arc<BarrierCell>>>,
    next_id: AtomicU32,
}

impl MemoryNode {
    fn fresh_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn mailbox_ep(&self, id: MailboxId) -> Result<Arc<MailboxEp>> {
        self.mailboxes
            .lock()
            .get(&id.0)
            .map(Arc::clone)
            .ok_or_else(|| anyhow!("unknown mailbox {:?}", id))
    }

    fn portal_ep(&self, id: PortalId) -> Result<Arc<PortalEp>> {
        self.portals
            .lock()
            .get(&id.0)
            .map(Arc::clone)
            .ok_or_else(|| anyhow!("unknown portal {:?}", id))
    }

    fn bind_inbox(&self, port: Port) -> MailboxId {
        let (tx, rx) = unbounded();
        self.bus.mailbox_sinks.lock().insert(port, tx);
        let id = self.fresh_id();
        self.mailboxes.lock().insert(
            id,
            Arc::new(MailboxEp::In(InboxEp {
                port,
                rx,
                filter: Mutex::new(None),
                stash: Mutex::new(VecDeque::new()),
            })),
        );
        MailboxId(id)
    }

    fn bind_inportal(&self, port: Port) -> PortalId {
        let (tx, rx) = unbounded();
        self.bus.portal_sinks.lock().insert(port, tx);
        let id = self.fresh_id();
        self.portals.lock().insert(
            id,
            Arc::new(PortalEp::In(InPortalEp {
                port,
                rx,
                allow: Mutex::new(None),
                stash: Mutex::new(VecDeque::new()),
            })),
        );
        PortalId(id)
    }
}

fn passes_filter(filter: &Option<(NodeNum, PortSelector)>, env: &MailEnvelope) -> bool {
    match filter {
        None => true,
        Some((node, selector)) => {
            env.src_node == *node
                && match selector {
                    PortSelector::Any => true,
                    PortSelector::Port(port) => env.src_port == *port,
                }
        }
    }
}

impl Substrate for MemoryNode {
    fn node_num(&self) -> NodeNum {
        self.bus.node
    }

    fn mailbox_create(&self, _name: &str) -> Result<MailboxId> {
        let port = self.bus.mailbox_ports.lock().alloc()?;
        Ok(self.bind_inbox(port))
    }

    fn mailbox_bind(&self, port: Port) -> Result<MailboxId> {
        self.bus.mailbox_ports.lock().reserve(port)?;
        Ok(self.bind_inbox(port))
    }

    fn mailbox_open(&self, node: NodeNum, port: Port) -> Result<MailboxId> {
        let local_port = self.bus.mailbox_ports.lock().alloc()?;
        let id = self.fresh_id();
        self.mailboxes.lock().insert(
            id,
            Arc::new(MailboxEp::Out(OutboxEp {
                dest_node: node,
                dest_port: port,
                local_port,
            })),
        );
        Ok(MailboxId(id))
    }

    fn mailbox_port(&self, mailbox: MailboxId) -> Result<Port> {
        match &*self.mailbox_ep(mailbox)? {
            MailboxEp::In(inbox) => Ok(inbox.port),
            MailboxEp::Out(outbox) => Ok(outbox.local_port),
        }
    }

    fn mailbox_set_remote(
        &self,
        mailbox: MailboxId,
        node: NodeNum,
        selector: PortSelector,
    ) -> Result<()> {
        match &*self.mailbox_ep(mailbox)? {
            MailboxEp::In(inbox) => {
                *inbox.filter.lock() = Some((node, selector));
                Ok(())
            }
            MailboxEp::Out(_) => Err(anyhow!("cannot re-aim an outbound mailbox")),
        }
    }

    fn mailbox_write(&self, mailbox: MailboxId, data: &[u8]) -> Result<()> {
        let ep = self.mailbox_ep(mailbox)?;
        let outbox = match &*ep {
            MailboxEp::Out(outbox) => outbox,
            MailboxEp::In(_) => return Err(anyhow!("cannot write through an inbox")),
        };

        let dest_bus = self.fabric.bus(outbox.dest_node);
        let sink = dest_bus
            .mailbox_sinks
            .lock()
            .get(&outbox.dest_port)
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "no mailbox bound at {}:{}",
                    outbox.dest_node,
                    outbox.dest_port
                )
            })?;

        sink.send(MailEnvelope {
            src_node: self.bus.node,
            src_port: outbox.local_port,
            data: data.to_vec(),
        })
        .map_err(|_| anyhow!("mailbox at {}:{} is gone", outbox.dest_node, outbox.dest_port))
    }

    fn mailbox_read(&self, mailbox: MailboxId, data: &mut [u8]) -> Result<usize> {
        let ep = self.mailbox_ep(mailbox)?;
        let inbox = match &*ep {
            MailboxEp::In(inbox) => inbox,
            MailboxEp::Out(_) => return Err(anyhow!("cannot read from an outbound mailbox")),
        };

        loop {
            let filter = *inbox.filter.lock();

            // Earlier arrivals that were filtered out get first refusal.
            let stashed = {
                let mut stash = inbox.stash.lock();
                let pos = stash.iter().position(|env| passes_filter(&filter, env));
                pos.and_then(|p| stash.remove(p))
            };
            if let Some(env) = stashed {
                let len = env.data.len().min(data.len());
                data[..len].copy_from_slice(&env.data[..len]);
                return Ok(len);
            }

            let env = inbox
                .rx
                .recv()
                .map_err(|_| anyhow!("inbox channel closed"))?;
            if passes_filter(&filter, &env) {
                let len = env.data.len().min(data.len());
                data[..len].copy_from_slice(&env.data[..len]);
                return Ok(len);
            }
            inbox.stash.lock().push_back(env);
        }
    }

    fn mailbox_close(&self, mailbox: MailboxId) -> Result<()> {
        let ep = self
            .mailboxes
            .lock()
            .remove(&mailbox.0)
            .ok_or_else(|| anyhow!("unknown mailbox {:?}", mailbox))?;
        if let MailboxEp::Out(outbox) = &*ep {
            self.bus.mailbox_ports.lock().release(outbox.local_port);
        }
        Ok(())
    }

    fn mailbox_unlink(&self, mailbox: MailboxId) -> Result<()> {
        let ep = self
            .mailboxes
            .lock()
            .remove(&mailbox.0)
            .ok_or_else(|| anyhow!("unknown mailbox {:?}", mailbox))?;
        if let MailboxEp::In(inbox) = &*ep {
            self.bus.mailbox_sinks.lock().remove(&inbox.port);
            self.bus.mailbox_ports.lock().release(inbox.port);
        }
        Ok(())
    }

    fn portal_create(&self, _name: &str) -> Result<PortalId> {
        let port = self.bus.portal_ports.lock().alloc()?;
        Ok(self.bind_inportal(port))
    }

    fn portal_bind(&self, port: Port) -> Result<PortalId> {
        self.bus.portal_ports.lock().reserve(port)?;
        Ok(self.bind_inportal(port))
    }

    fn portal_open(&self, node: NodeNum, port: Port) -> Result<PortalId> {
        let local_port = self.bus.portal_ports.lock().alloc()?;
        let id = self.fresh_id();
        self.portals.lock().insert(
            id,
            Arc::new(PortalEp::Out(OutPortalEp {
                dest_node: node,
                dest_port: port,
                local_port,
            })),
        );
        Ok(PortalId(id))
    }

    fn portal_port(&self, portal: PortalId) -> Result<Port> {
        match &*self.portal_ep(portal)? {
            PortalEp::In(inportal) => Ok(inportal.port),
            PortalEp::Out(outportal) => Ok(outportal.local_port),
        }
    }

    fn portal_allow(&self, portal: PortalId, node: NodeNum, port: Port) -> Result<()> {
        match &*self.portal_ep(portal)? {
            PortalEp::In(inportal) => {
                *inportal.allow.lock() = Some((node, port));
                Ok(())
            }
            PortalEp::Out(_) => Err(anyhow!("cannot allow on an outbound portal")),
        }
    }

    fn portal_write(&self, portal: PortalId, data: &[u8]) -> Result<()> {
        let ep = self.portal_ep(portal)?;
        let outportal = match &*ep {
            PortalEp::Out(outportal) => outportal,
            PortalEp::In(_) => return Err(anyhow!("cannot write through an inportal")),
        };

        let dest_bus = self.fabric.bus(outportal.dest_node);
        let sink = dest_bus
            .portal_sinks
            .lock()
            .get(&outportal.dest_port)
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "no portal bound at {}:{}",
                    outportal.dest_node,
                    outportal.dest_port
                )
            })?;

        let (done_tx, done_rx) = bounded(1);
        sink.send(PortalEnvelope {
            src_node: self.bus.node,
            src_port: outportal.local_port,
            data: data.to_vec(),
            done: done_tx,
        })
        .map_err(|_| anyhow!("portal at {}:{} is gone", outportal.dest_node, outportal.dest_port))?;

        // Rendezvous: hold the writer until the reader consumed the transfer.
        done_rx
            .recv()
            .map_err(|_| anyhow!("portal transfer abandoned by receiver"))
    }

    fn portal_read(&self, portal: PortalId, data: &mut [u8]) -> Result<usize> {
        let ep = self.portal_ep(portal)?;
        let inportal = match &*ep {
            PortalEp::In(inportal) => inportal,
            PortalEp::Out(_) => return Err(anyhow!("cannot read from an outbound portal")),
        };

        let allowed = (*inportal.allow.lock())
            .ok_or_else(|| anyhow!("portal read without a prior allow"))?;

        let env = loop {
            let matched = {
                let mut stash = inportal.stash.lock();
                let pos = stash
                    .iter()
                    .position(|env| (env.src_node, env.src_port) == allowed);
                pos.and_then(|p| stash.remove(p))
            };
            if let Some(env) = matched {
                break env;
            }

            let env = inportal
                .rx
                .recv()
                .map_err(|_| anyhow!("inportal channel closed"))?;
            if (env.src_node, env.src_port) == allowed {
                break env;
            }
            inportal.stash.lock().push_back(env);
        };

        let len = env.data.len().min(data.len());
        data[..len].copy_from_slice(&env.data[..len]);
        let _ = env.done.send(());
        *inportal.allow.lock() = None;
        Ok(len)
    }

    fn portal_close(&self, portal: PortalId) -> Result<()> {
        let ep = self
            .portals
            .lock()
            .remove(&portal.0)
            .ok_or_else(|| anyhow!("unknown portal {:?}", portal))?;
        if let PortalEp::Out(outportal) = &*ep {
            self.bus.portal_ports.lock().release(outportal.local_port);
        }
        Ok(())
    }

    fn portal_unlink(&self, portal: PortalId) -> Result<()> {
        let ep = self
            .portals
            .lock()
            .remove(&portal.0)
            .ok_or_else(|| anyhow!("unknown portal {:?}", portal))?;
        if let PortalEp::In(inportal) = &*ep {
            self.bus.portal_sinks.lock().remove(&inportal.port);
            self.bus.portal_ports.lock().release(inportal.port);
        }
        Ok(())
    }

    fn name_register(&self, name: &str, port: Port) -> Result<()> {
        let mut names = self.fabric.names.lock();
        if names.contains_key(name) {
            return Err(anyhow!("name {:?} already registered", name));
        }
        names.insert(name.to_string(), (self.bus.node, port));
        Ok(())
    }

    fn name_lookup(&self, name: &str) -> Result<(NodeNum, Port)> {
        self.fabric
            .names
            .lock()
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("name {:?} not registered", name))
    }

    fn name_unregister(&self, name: &str) -> Result<()> {
        self.fabric
            .names
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("name {:?} not registered", name))
    }

    fn barrier_create(&self, nodes: &[NodeNum]) -> Result<BarrierId> {
        if nodes.is_empty() {
            return Err(anyhow!("barrier needs at least one participant"));
        }
        let mut key: Vec<NodeNum> = nodes.to_vec();
        key.sort_unstable();
        key.dedup();

        let cell = {
            let mut barriers = self.fabric.barriers.lock();
            let expected = key.len();
            Arc::clone(barriers.entry(key).or_insert_with(|| {
                Arc::new(BarrierCell {
                    expected,
                    state: Mutex::new((0, 0)),
                    cond: Condvar::new(),
                })
            }))
        };

        let id = self.fresh_id();
        self.barriers.lock().insert(id, cell);
        Ok(BarrierId(id))
    }

    fn barrier_wait(&self, barrier: BarrierId) -> Result<()> {
        let cell = self
            .barriers
            .lock()
            .get(&barrier.0)
            .map(Arc::clone)
            .ok_or_else(|| anyhow!("unknown barrier {:?}", barrier))?;
        cell.wait();
        Ok(())
    }

    fn barrier_destroy(&self, barrier: BarrierId) -> Result<()> {
        self.barriers
            .lock()
            .remove(&barrier.0)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown barrier {:?}", barrier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_mailbox_routing_between_nodes() {
        let fabric = MemoryFabric::new();
        let node0 = fabric.node(0);
        let node1 = fabric.node(1);

        let inbox = node1.mailbox_create("peer").unwrap();
        let port = node1.mailbox_port(inbox).unwrap();
        node1.name_register("peer", port).unwrap();

        let (node, resolved) = node0.name_lookup("peer").unwrap();
        assert_eq!(node, 1);
        let outbox = node0.mailbox_open(node, resolved).unwrap();
        node0.mailbox_write(outbox, b"hello").unwrap();

        let mut buf = [0u8; 16];
        let len = node1.mailbox_read(inbox, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn test_set_remote_filters_and_stashes() {
        let fabric = MemoryFabric::new();
        let node0 = fabric.node(0);
        let node1 = fabric.node(1);
        let node2 = fabric.node(2);

        let inbox = node0.mailbox_bind(COMM_REQ_RECV_PORT).unwrap();
        let from1 = node1.mailbox_open(0, COMM_REQ_RECV_PORT).unwrap();
        let from2 = node2.mailbox_open(0, COMM_REQ_RECV_PORT).unwrap();

        node1.mailbox_write(from1, b"one").unwrap();
        node2.mailbox_write(from2, b"two").unwrap();

        // Only node 2 passes the filter; the node 1 envelope is stashed.
        node0
            .mailbox_set_remote(inbox, 2, PortSelector::Any)
            .unwrap();
        let mut buf = [0u8; 8];
        let len = node0.mailbox_read(inbox, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"two");

        // Widening the filter re-offers the stashed envelope.
        node0
            .mailbox_set_remote(inbox, 1, PortSelector::Any)
            .unwrap();
        let len = node0.mailbox_read(inbox, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"one");
    }

    #[test]
    fn test_portal_rendezvous_round_trip() {
        let fabric = MemoryFabric::new();
        let node0 = fabric.node(0);
        let node1 = fabric.node(1);

        let inportal = node1.portal_create("sink").unwrap();
        let dest_port = node1.portal_port(inportal).unwrap();
        let portal = node0.portal_open(1, dest_port).unwrap();
        let src_port = node0.portal_port(portal).unwrap();

        // Reads without an allowance are rejected outright.
        let mut buf = [0u8; 64];
        assert!(node1.portal_read(inportal, &mut buf).is_err());

        let writer = thread::spawn({
            let node0 = Arc::clone(&node0);
            move || {
                node0.portal_write(portal, &[7u8; 64]).unwrap();
                node0.portal_close(portal).unwrap();
            }
        });

        node1.portal_allow(inportal, 0, src_port).unwrap();
        let len = node1.portal_read(inportal, &mut buf).unwrap();
        writer.join().unwrap();
        assert_eq!(len, 64);
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_portal_read_truncates_to_buffer() {
        let fabric = MemoryFabric::new();
        let node0 = fabric.node(0);
        let node1 = fabric.node(1);

        let inportal = node1.portal_create("sink").unwrap();
        let dest_port = node1.portal_port(inportal).unwrap();
        let portal = node0.portal_open(1, dest_port).unwrap();
        let src_port = node0.portal_port(portal).unwrap();

        let writer = thread::spawn({
            let node0 = Arc::clone(&node0);
            move || node0.portal_write(portal, &[9u8; 8]).unwrap()
        });

        node1.portal_allow(inportal, 0, src_port).unwrap();
        let mut small = [0u8; 4];
        let len = node1.portal_read(inportal, &mut small).unwrap();
        writer.join().unwrap();
        assert_eq!(len, 4);
        assert_eq!(small, [9u8; 4]);
    }

    #[test]
    fn test_barrier_synchronizes_all_nodes() {
        let fabric = MemoryFabric::new();
        let nodes = [0u8, 1, 2];

        let mut handles = Vec::new();
        for &n in &nodes {
            let substrate = fabric.node(n);
            handles.push(thread::spawn(move || {
                let barrier = substrate.barrier_create(&[0, 1, 2]).unwrap();
                // Two consecutive waits exercise generation turnover.
                substrate.barrier_wait(barrier).unwrap();
                substrate.barrier_wait(barrier).unwrap();
                substrate.barrier_destroy(barrier).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_name_service_lifecycle() {
        let fabric = MemoryFabric::new();
        let node0 = fabric.node(0);

        node0.name_register("mpi-process-0", 3).unwrap();
        assert!(node0.name_register("mpi-process-0", 4).is_err());
        assert_eq!(node0.name_lookup("mpi-process-0").unwrap(), (0, 3));
        node0.name_unregister("mpi-process-0").unwrap();
        assert!(node0.name_lookup("mpi-process-0").is_err());
    }

    #[test]
    fn test_well_known_port_not_vended_dynamically() {
        let fabric = MemoryFabric::new();
        let node0 = fabric.node(0);
        for _ in 0..200 {
            let inbox = node0.mailbox_create("x").unwrap();
            assert_ne!(node0.mailbox_port(inbox).unwrap(), COMM_REQ_RECV_PORT);
        }
    }
}

//! # IPC Substrate Abstraction
//!
//! The runtime is layered on a low-level distributed IPC fabric that provides
//! two primitives: *mailboxes* for small fixed-size control messages and
//! *portals* for bulk byte transfer, plus a distributed name service and an
//! inter-node barrier. This module defines the unified [`Substrate`] trait
//! that names those collaborators; the runtime never talks to an interconnect
//! except through it.
//!
//! ## Addressing model
//!
//! Every endpoint is a `(node, port)` pair. Creating an inbox or inportal
//! binds a fresh dynamic port on the local node; opening an outbound mailbox
//! or portal targets a remote `(node, port)` and allocates a local reply port
//! of its own. Port `254` (the highest port minus one) is reserved as the
//! node-wide request-receive port shared by all co-located ranks.
//!
//! ## Blocking semantics
//!
//! The runtime is strictly blocking: `mailbox_read`, `portal_read`,
//! `portal_write` and `barrier_wait` may all park the calling thread
//! indefinitely. There is no cancellation; a blocked call completes only on
//! message arrival or process death.

use anyhow::Result;

pub mod memory;

pub use memory::{MemoryFabric, MemoryNode};

/// Physical node number within the fabric.
pub type NodeNum = u8;

/// Mailbox/portal port number on a node.
pub type Port = u8;

/// Node-wide well-known port receiving request-to-send control messages.
///
/// Highest port number minus one; all other ports are allocated dynamically.
pub const COMM_REQ_RECV_PORT: Port = Port::MAX - 1;

/// Handle to a mailbox (inbox or outbound), scoped to one substrate instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(pub u32);

/// Handle to a portal (inportal or outbound), scoped to one substrate instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortalId(pub u32);

/// Handle to an inter-node barrier, scoped to one substrate instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierId(pub u32);

/// Sender-port filter applied when re-aiming an inbox at a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelector {
    /// Accept a message from any port of the selected node.
    Any,
    /// Accept only messages originating from this exact port.
    Port(Port),
}

/// Low-level IPC fabric interface, one instance per node.
///
/// All co-located ranks share the node's instance, so implementations must be
/// fully thread-safe. Failures are reported as `anyhow::Error` and mapped to
/// MPI error classes at the transport boundary.
pub trait Substrate: Send + Sync {
    /// Physical number of the local node.
    fn node_num(&self) -> NodeNum;

    // Mailboxes.

    /// Creates a named inbox on a fresh dynamic local port.
    fn mailbox_create(&self, name: &str) -> Result<MailboxId>;

    /// Creates an inbox bound to a specific well-known local port.
    fn mailbox_bind(&self, port: Port) -> Result<MailboxId>;

    /// Opens an outbound mailbox to `(node, port)`, allocating a local reply
    /// port that receivers can answer to.
    fn mailbox_open(&self, node: NodeNum, port: Port) -> Result<MailboxId>;

    /// Local port of a mailbox (the bound port of an inbox, the reply port of
    /// an outbound mailbox).
    fn mailbox_port(&self, mailbox: MailboxId) -> Result<Port>;

    /// Re-aims an inbox to accept traffic only from `node` through `selector`.
    fn mailbox_set_remote(
        &self,
        mailbox: MailboxId,
        node: NodeNum,
        selector: PortSelector,
    ) -> Result<()>;

    /// Writes one control message through an outbound mailbox.
    fn mailbox_write(&self, mailbox: MailboxId, data: &[u8]) -> Result<()>;

    /// Blocks until one control message passing the inbox filter arrives and
    /// copies it into `data`, returning its length.
    fn mailbox_read(&self, mailbox: MailboxId, data: &mut [u8]) -> Result<usize>;

    /// Closes an outbound mailbox, releasing its reply port.
    fn mailbox_close(&self, mailbox: MailboxId) -> Result<()>;

    /// Unlinks an inbox, releasing its bound port.
    fn mailbox_unlink(&self, mailbox: MailboxId) -> Result<()>;

    // Portals.

    /// Creates a named inportal on a fresh dynamic local port.
    fn portal_create(&self, name: &str) -> Result<PortalId>;

    /// Creates an inportal bound to a specific local port.
    ///
    /// Mailbox and portal ports live in separate spaces, so a process can
    /// advertise one port number for both its inbox and its inportal.
    fn portal_bind(&self, port: Port) -> Result<PortalId>;

    /// Opens an outbound portal to `(node, port)`, allocating a local port
    /// whose number travels in request-to-send messages.
    fn portal_open(&self, node: NodeNum, port: Port) -> Result<PortalId>;

    /// Local port of a portal.
    fn portal_port(&self, portal: PortalId) -> Result<Port>;

    /// Permits the next inportal read to consume a transfer from exactly
    /// `(node, port)`.
    fn portal_allow(&self, portal: PortalId, node: NodeNum, port: Port) -> Result<()>;

    /// Writes a bulk transfer through an outbound portal, blocking until the
    /// receiver has consumed it.
    fn portal_write(&self, portal: PortalId, data: &[u8]) -> Result<()>;

    /// Blocks until a transfer from the allowed peer arrives and copies at
    /// most `data.len()` bytes of it, returning the count copied. Clears the
    /// allowance.
    fn portal_read(&self, portal: PortalId, data: &mut [u8]) -> Result<usize>;

    /// Closes an outbound portal.
    fn portal_close(&self, portal: PortalId) -> Result<()>;

    /// Unlinks an inportal, releasing its bound port.
    fn portal_unlink(&self, portal: PortalId) -> Result<()>;

    // Distributed name service.

    /// Registers `name` as reachable at `(local node, port)`.
    fn name_register(&self, name: &str, port: Port) -> Result<()>;

    /// Resolves a registered name to its physical address.
    fn name_lookup(&self, name: &str) -> Result<(NodeNum, Port)>;

    /// Removes a name registration owned by the local node.
    fn name_unregister(&self, name: &str) -> Result<()>;

    // Inter-node barrier.

    /// Creates a barrier across `nodes`; every participating node must create
    /// it with the same node set.
    fn barrier_create(&self, nodes: &[NodeNum]) -> Result<BarrierId>;

    /// Blocks until every participating node has arrived.
    fn barrier_wait(&self, barrier: BarrierId) -> Result<()>;

    /// Destroys a barrier created by this node.
    fn barrier_destroy(&self, barrier: BarrierId) -> Result<()>;
}

//! # Process Registry and Node Bootstrap
//!
//! Every rank in the world is represented by a `Process` record created at
//! bootstrap: PID, symbolic name, and, for ranks living on this node, the
//! thread embodying the rank and its inbox/inportal endpoints. PIDs are
//! dense indices into a [`PointerTable`], placed round-robin across nodes,
//! so `mpi-process-7` on a two-node fabric lives on node 1.
//!
//! A node may host several ranks as cooperating threads. [`bootstrap`] is
//! the launch point that replaces the original pre-main hook: it builds the
//! registry, marks the calling thread as node master, spawns one thread per
//! additional co-located rank, runs the application entry on every one of
//! them, and joins the workers afterwards. Each thread stamps its own
//! `ThreadId` into its process record, which is how [`current_process`] maps
//! the running thread back to its rank.
//!
//! Two synchronization devices live here as well: the node-local *fence* (a
//! count-down barrier across exactly the co-located threads) and the
//! *standard barrier* (fence, then the masters' inter-node barrier, then
//! fence again).

use std::sync::{Arc, Barrier, OnceLock};
use std::thread::{self, ThreadId};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::MpiError;
use crate::object::Handle;
use crate::ptr_table::PointerTable;
use crate::runtime::{self, MpiState};
use crate::substrate::{BarrierId, MailboxId, NodeNum, PortalId, Substrate, COMM_REQ_RECV_PORT};

/// One MPI rank.
pub struct Process {
    pid: i32,
    name: String,
    tid: Mutex<Option<ThreadId>>,
    inbox: Mutex<Option<MailboxId>>,
    inportal: Mutex<Option<PortalId>>,
}

impl Process {
    fn new(pid: i32) -> Self {
        Process {
            pid,
            name: format!("mpi-process-{}", pid),
            tid: Mutex::new(None),
            inbox: Mutex::new(None),
            inportal: Mutex::new(None),
        }
    }

    /// Stable process id, dense across the world.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Symbolic name registered with the distributed name service.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn tid(&self) -> Option<ThreadId> {
        *self.tid.lock()
    }

    fn set_tid(&self, tid: ThreadId) {
        *self.tid.lock() = Some(tid);
    }

    pub(crate) fn inbox(&self) -> Result<MailboxId, MpiError> {
        (*self.inbox.lock()).ok_or(MpiError::Intern)
    }

    pub(crate) fn inportal(&self) -> Result<PortalId, MpiError> {
        (*self.inportal.lock()).ok_or(MpiError::Intern)
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .finish()
    }
}

/// Node-wide process bookkeeping, established once per OS process.
pub(crate) struct ProcSystem {
    config: RuntimeConfig,
    substrate: Arc<dyn Substrate>,
    processes: PointerTable<Process>,
    locals: Vec<Handle<Process>>,
    master_tid: ThreadId,
    fence: Barrier,
    dist_barrier: BarrierId,
    request_inbox: OnceLock<MailboxId>,
}

static PROC_SYSTEM: OnceLock<ProcSystem> = OnceLock::new();

fn sys() -> Result<&'static ProcSystem, MpiError> {
    PROC_SYSTEM.get().ok_or(MpiError::Intern)
}

/// Launches the co-located ranks of this node and runs `entry` on each.
///
/// The caller's thread becomes the node master (cohabiting rank with the
/// lowest PID); one additional OS thread is spawned per further co-located
/// rank. `entry` is the MPI application: it is expected to call
/// [`crate::api::init`] early and [`crate::api::finalize`] before returning.
/// Worker panics are propagated to the caller after all threads are joined.
///
/// One bootstrap per OS process: the registry it creates is process-global.
pub fn bootstrap<F>(config: RuntimeConfig, substrate: Arc<dyn Substrate>, entry: F) -> Result<()>
where
    F: Fn() + Send + Sync + 'static,
{
    config.validate()?;
    if config.nodes > NodeNum::MAX as usize {
        return Err(anyhow!("at most {} nodes are addressable", NodeNum::MAX));
    }

    let node = substrate.node_num() as usize;
    if node >= config.nodes {
        return Err(anyhow!(
            "substrate node {} outside configured 0..{}",
            node,
            config.nodes
        ));
    }

    let active_nodes: Vec<NodeNum> = (0..config.nodes as NodeNum).collect();
    let dist_barrier = substrate
        .barrier_create(&active_nodes)
        .context("creating the inter-node barrier")?;

    let processes = PointerTable::with_capacity(config.world_size);
    for pid in 0..config.world_size {
        let index = processes.insert(Handle::new(Process::new(pid as i32)));
        debug_assert_eq!(index, pid);
    }

    let locals: Vec<Handle<Process>> = config
        .local_pids(node)
        .into_iter()
        .filter_map(|pid| processes.get(pid))
        .collect();
    if locals.is_empty() {
        return Err(anyhow!("node {} hosts no ranks", node));
    }

    info!(
        "node {}: {} of {} ranks are local",
        node,
        locals.len(),
        config.world_size
    );

    let fence = Barrier::new(locals.len());
    let master_tid = thread::current().id();
    locals[0].set_tid(master_tid);

    let system = ProcSystem {
        config,
        substrate,
        processes,
        locals,
        master_tid,
        fence,
        dist_barrier,
        request_inbox: OnceLock::new(),
    };
    PROC_SYSTEM
        .set(system)
        .map_err(|_| anyhow!("bootstrap already ran in this process"))?;
    let system = sys().map_err(|_| anyhow!("process registry vanished"))?;

    let entry = Arc::new(entry);
    let mut workers = Vec::new();
    for local in system.locals.iter().skip(1) {
        let proc = local.retain();
        let entry = Arc::clone(&entry);
        let worker = thread::Builder::new()
            .name(proc.name().to_string())
            .spawn(move || {
                // Self-registration must precede any MPI call on the thread.
                proc.set_tid(thread::current().id());
                entry();
            })
            .context("spawning a co-located rank thread")?;
        workers.push(worker);
    }

    entry();

    let mut panicked = None;
    for worker in workers {
        if let Err(payload) = worker.join() {
            panicked = Some(payload);
        }
    }

    // Drop the registry's references; surviving handles belong to the app.
    for index in 0..system.processes.capacity() {
        system.processes.remove(index);
    }
    let _ = system.substrate.barrier_destroy(system.dist_barrier);

    if let Some(payload) = panicked {
        std::panic::resume_unwind(payload);
    }
    Ok(())
}

/// Maps the running thread to its rank's process record.
pub fn current_process() -> Result<Handle<Process>, MpiError> {
    let system = sys()?;
    if system.locals.len() == 1 {
        return Ok(system.locals[0].retain());
    }

    let tid = thread::current().id();
    system
        .locals
        .iter()
        .find(|proc| proc.tid() == Some(tid))
        .map(Handle::retain)
        .ok_or(MpiError::Intern)
}

/// True on the thread that bootstrapped this node.
pub fn is_master() -> Result<bool, MpiError> {
    let system = sys()?;
    Ok(system.locals.len() == 1 || thread::current().id() == system.master_tid)
}

/// Total number of ranks in the world.
pub fn world_size() -> Result<usize, MpiError> {
    Ok(sys()?.config.world_size)
}

/// Number of ranks cohabiting this node.
pub fn local_count() -> Result<usize, MpiError> {
    Ok(sys()?.locals.len())
}

/// The node's substrate instance.
pub(crate) fn substrate() -> Result<Arc<dyn Substrate>, MpiError> {
    Ok(Arc::clone(&sys()?.substrate))
}

/// The node-shared inbox receiving request-to-send traffic.
pub(crate) fn request_inbox() -> Result<MailboxId, MpiError> {
    sys()?.request_inbox.get().copied().ok_or(MpiError::Intern)
}

/// Every process of the world, in PID order (for `COMM_WORLD`).
pub(crate) fn world_list() -> Result<Vec<Handle<Process>>, MpiError> {
    let system = sys()?;
    let mut procs = Vec::with_capacity(system.config.world_size);
    for index in 0..system.processes.capacity() {
        if let Some(proc) = system.processes.get(index) {
            procs.push(proc);
        }
    }
    if procs.len() == system.config.world_size {
        Ok(procs)
    } else {
        Err(MpiError::Intern)
    }
}

/// Just the calling rank's process (for `COMM_SELF`).
pub(crate) fn self_list() -> Result<Vec<Handle<Process>>, MpiError> {
    Ok(vec![current_process()?])
}

/// Node-local count-down barrier across the co-located rank threads.
pub fn fence() -> Result<(), MpiError> {
    let system = sys()?;
    if system.locals.len() > 1 {
        system.fence.wait();
    }
    Ok(())
}

/// The standard two-level barrier: local fence, masters' inter-node
/// rendezvous, local fence.
pub fn std_barrier() -> Result<(), MpiError> {
    if runtime::current_state() < MpiState::InitStarted {
        return Err(MpiError::Other);
    }
    let system = sys()?;

    fence()?;
    if is_master()? {
        system
            .substrate
            .barrier_wait(system.dist_barrier)
            .map_err(|_| MpiError::Intern)?;
    }
    fence()
}

/// Brings up the calling rank's communication endpoints: inbox, inportal,
/// name registration. The master additionally binds the node-shared request
/// inbox at [`COMM_REQ_RECV_PORT`].
pub(crate) fn local_init() -> Result<(), MpiError> {
    let system = sys()?;
    let proc = current_process()?;

    debug!("{} creating inbox and inportal", proc.name());

    let inbox = system
        .substrate
        .mailbox_create(proc.name())
        .map_err(|_| MpiError::Intern)?;
    let port = system
        .substrate
        .mailbox_port(inbox)
        .map_err(|_| MpiError::Intern)?;

    // The advertised port serves both channels, as remote peers derive the
    // portal target from the same name-service entry.
    let inportal = system
        .substrate
        .portal_bind(port)
        .map_err(|_| MpiError::Intern)?;

    system
        .substrate
        .name_register(proc.name(), port)
        .map_err(|_| MpiError::Intern)?;

    *proc.inbox.lock() = Some(inbox);
    *proc.inportal.lock() = Some(inportal);

    if is_master()? && system.request_inbox.get().is_none() {
        let request_inbox = system
            .substrate
            .mailbox_bind(COMM_REQ_RECV_PORT)
            .map_err(|_| MpiError::Intern)?;
        let _ = system.request_inbox.set(request_inbox);
    }

    debug!("{} registered at port {}", proc.name(), port);
    Ok(())
}

/// Tears down the calling rank's endpoints and name registration.
pub(crate) fn local_finalize() -> Result<(), MpiError> {
    let system = sys()?;
    let proc = current_process()?;

    system
        .substrate
        .name_unregister(proc.name())
        .map_err(|_| MpiError::Intern)?;

    if let Some(inportal) = proc.inportal.lock().take() {
        system
            .substrate
            .portal_unlink(inportal)
            .map_err(|_| MpiError::Intern)?;
    }
    if let Some(inbox) = proc.inbox.lock().take() {
        system
            .substrate
            .mailbox_unlink(inbox)
            .map_err(|_| MpiError::Intern)?;
    }

    if is_master()? {
        if let Some(request_inbox) = system.request_inbox.get() {
            let _ = system.substrate.mailbox_unlink(*request_inbox);
        }
    }

    debug!("{} finalized local structures", proc.name());
    Ok(())
}

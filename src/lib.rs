//! # LWMPI
//!
//! A lightweight MPI point-to-point runtime implemented in Rust. The crate
//! provides rank and group queries, synchronous send/recv over a three-step
//! rendezvous, blocking barriers, error handling, and lifecycle management,
//! all layered on a pluggable mailbox/portal IPC substrate.
//!
//! Several ranks may cohabit one node as cooperating threads; ranks on other
//! nodes are reached through the substrate's interconnect. The in-process
//! [`substrate::MemoryFabric`] stands in for a real interconnect in tests
//! and examples:
//!
//! ```no_run
//! use lwmpi::{api, bootstrap, MemoryFabric, RuntimeConfig};
//!
//! let fabric = MemoryFabric::new();
//! bootstrap(RuntimeConfig::single_node(4), fabric.node(0), || {
//!     api::init().unwrap();
//!     let world = api::comm_world().unwrap();
//!     let rank = api::comm_rank(&world).unwrap();
//!     println!("hello from rank {}", rank);
//!     api::finalize().unwrap();
//! })
//! .unwrap();
//! ```

pub mod api;
pub mod buffer_slot;
pub mod communicator;
pub mod config;
pub mod datatype;
pub mod errhandler;
pub mod error;
pub mod group;
pub mod logging;
pub mod object;
pub mod process;
pub mod ptr_table;
pub mod request;
pub mod runtime;
pub mod substrate;
pub mod transport;
pub mod wire;

pub use api::{Comm, Status};
pub use config::RuntimeConfig;
pub use error::{MpiError, MPI_SUCCESS};
pub use object::Handle;
pub use process::bootstrap;
pub use substrate::{MemoryFabric, Substrate};

/// The current version of the runtime.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rank value turning sends and receives into no-ops.
pub const PROC_NULL: i32 = -2;

/// Receive-side wildcard matching any source rank.
pub const ANY_SOURCE: i32 = -1;

/// Receive-side wildcard matching any tag.
pub const ANY_TAG: i32 = -1;

/// Undefined rank/count sentinel.
pub const UNDEFINED: i32 = -32766;

/// Special root value reserved for inter-communicators.
pub const ROOT: i32 = -4;

/// Exclusive upper bound for message tags.
pub const TAG_UB: i32 = 32768;

/// Comparison results for group/communicator identity.
pub const IDENT: i32 = 0;
pub const CONGRUENT: i32 = 1;
pub const SIMILAR: i32 = 2;
pub const UNEQUAL: i32 = 3;

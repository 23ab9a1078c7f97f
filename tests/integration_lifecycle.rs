use anyhow::Result;
use lwmpi::datatype::INT;
use lwmpi::{api, bootstrap, MemoryFabric, RuntimeConfig, MPI_SUCCESS, PROC_NULL, UNDEFINED};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Lifecycle flags, rank/size invariants, group and errhandler surface, and
/// the PROC_NULL no-ops, across four ranks cohabiting one node.
#[test]
fn lifecycle_and_object_queries() -> Result<()> {
    lwmpi::logging::init();

    assert!(!api::initialized());
    assert!(!api::finalized());

    let seen_ranks = Arc::new(Mutex::new(HashSet::new()));
    let fabric = MemoryFabric::new();

    let ranks_for_entry = Arc::clone(&seen_ranks);
    bootstrap(RuntimeConfig::single_node(4), fabric.node(0), move || {
        api::init().unwrap();
        assert!(api::initialized());
        assert!(!api::finalized());

        let world = api::comm_world().unwrap();
        let rank = api::comm_rank(&world).unwrap();
        let size = api::comm_size(&world).unwrap();
        assert_eq!(size, 4);
        assert!((0..size).contains(&rank));
        ranks_for_entry.lock().unwrap().insert(rank);

        // The group behind COMM_WORLD agrees with the communicator.
        let mut group = api::comm_group(&world).unwrap();
        assert_eq!(api::group_size(&group).unwrap(), 4);
        assert_eq!(api::group_rank(&group).unwrap(), rank);
        api::group_free(&mut group).unwrap();

        // COMM_SELF scopes exactly one rank; only its constructing rank
        // (the node master) is a member.
        let self_comm = api::comm_self().unwrap();
        assert_eq!(api::comm_size(&self_comm).unwrap(), 1);
        let self_rank = api::comm_rank(&self_comm).unwrap();
        if rank == 0 {
            assert_eq!(self_rank, 0);
        } else {
            assert_eq!(self_rank, UNDEFINED);
        }

        if rank == 0 {
            // Errhandler binding round-trips and free resets the handle.
            let default = api::comm_get_errhandler(&world).unwrap();
            let returning = lwmpi::errhandler::errors_return().unwrap();
            api::comm_set_errhandler(&world, &returning).unwrap();
            api::comm_set_errhandler(&world, &default).unwrap();

            let mut held = api::comm_get_errhandler(&world).unwrap();
            api::errhandler_free(&mut held).unwrap();
        }

        api::barrier(&world).unwrap();

        // PROC_NULL send and recv are immediate no-ops.
        let mut status = lwmpi::Status::default();
        api::send(&[], 0, INT, PROC_NULL, 0, &world).unwrap();
        let mut buf = [0xFFu8; 4];
        api::recv(&mut buf, 1, INT, PROC_NULL, 0, &world, Some(&mut status)).unwrap();
        assert_eq!(status.source, PROC_NULL);
        assert_eq!(status.error, MPI_SUCCESS);
        assert_eq!(status.received_size(), 0);
        assert_eq!(buf, [0xFFu8; 4], "a null recv must not touch the buffer");
        assert_eq!(api::get_count(&status, INT).unwrap(), 0);

        // STATUS_IGNORE is a null status and must be tolerated.
        api::recv(&mut buf, 1, INT, PROC_NULL, 0, &world, None).unwrap();

        api::barrier(&world).unwrap();
        api::finalize().unwrap();
    })?;

    // Every rank appeared exactly once.
    let seen = seen_ranks.lock().unwrap();
    assert_eq!(*seen, (0..4).collect::<HashSet<_>>());

    assert!(api::initialized());
    assert!(api::finalized());
    Ok(())
}

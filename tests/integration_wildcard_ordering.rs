use anyhow::Result;
use lwmpi::datatype::INT;
use lwmpi::{api, bootstrap, MemoryFabric, RuntimeConfig, ANY_SOURCE};
use std::collections::HashSet;

const TAG_FIRST: i32 = 71;
const TAG_SECOND: i32 = 72;

/// Encodes (sender, sequence) so the receiver can audit who sent what.
fn encode(sender: i32, sequence: i32) -> i32 {
    sender * 100 + sequence
}

/// Wildcard receives: ranks 1 and 2 each send one message per tag to rank 0;
/// rank 0 receives each tag twice with ANY_SOURCE. The status must name the
/// actual sender, the payload must agree with it, and within one (source,
/// tag) pair the arrival order is the emission order.
#[test]
fn wildcard_receives_report_actual_sources() -> Result<()> {
    lwmpi::logging::init();

    let fabric = MemoryFabric::new();
    bootstrap(RuntimeConfig::single_node(4), fabric.node(0), || {
        api::init().unwrap();
        let world = api::comm_world().unwrap();
        let rank = api::comm_rank(&world).unwrap();

        match rank {
            1 | 2 => {
                for (sequence, tag) in [(1, TAG_FIRST), (2, TAG_SECOND)] {
                    let value = encode(rank, sequence);
                    api::send(&value.to_le_bytes(), 1, INT, 0, tag, &world).unwrap();
                }
            }
            0 => {
                for (sequence, tag) in [(1, TAG_FIRST), (2, TAG_SECOND)] {
                    let mut sources = HashSet::new();
                    for _ in 0..2 {
                        let mut status = lwmpi::Status::default();
                        let mut buf = [0u8; 4];
                        api::recv(&mut buf, 1, INT, ANY_SOURCE, tag, &world, Some(&mut status))
                            .unwrap();
                        let value = i32::from_le_bytes(buf);

                        // The status names the true sender of the matched
                        // message, not the wildcard.
                        assert_ne!(status.source, ANY_SOURCE);
                        assert_eq!(status.tag, tag);
                        assert_eq!(value, encode(status.source, sequence));
                        sources.insert(status.source);
                    }
                    assert_eq!(sources, HashSet::from([1, 2]));
                }
            }
            _ => {}
        }

        api::barrier(&world).unwrap();
        api::finalize().unwrap();
    })?;

    Ok(())
}

/*!
 * Arbitration Tests
 * Drives the coordinator table directly against real (tempdir) nodes and
 * checks every OS write transition
 */

use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use restune::applier::{Applier, SysfsApplier};
use restune::coco::CocoTable;
use restune::core::types::{ApplyScope, Policy, PriorityTier, ResourceTuple};
use restune::registry::resource::{ResourceDescriptor, ResourceRegistry};
use restune::registry::target::TargetRegistry;
use restune::request::types::Request;

const RES: u32 = 0x0002_0001;

struct Bench {
    _dir: tempfile::TempDir,
    node: std::path::PathBuf,
    table: CocoTable,
}

fn bench(policy: Policy, default: &str) -> Bench {
    let dir = tempfile::tempdir().unwrap();
    let node = dir.path().join("node");
    fs::write(&node, default).unwrap();

    let targets = Arc::new(TargetRegistry::new("bench".into(), vec![], vec![]));
    let mut registry = ResourceRegistry::new(Arc::clone(&targets));
    registry
        .register(
            ResourceDescriptor::builder(RES, "bench_res")
                .path(node.to_str().unwrap())
                .bounds(0, 10_000)
                .scope(ApplyScope::Global)
                .policy(policy)
                .build(),
        )
        .unwrap();

    let applier: Arc<dyn Applier> = Arc::new(SysfsApplier::new(targets));
    let table = CocoTable::new(Arc::new(registry), applier);
    Bench {
        _dir: dir,
        node,
        table,
    }
}

fn request(handle: u64, tier: PriorityTier, value: i32) -> Request {
    Request {
        handle,
        client_pid: 1,
        client_tid: 1,
        tier,
        duration_ms: 1000,
        deadline: Instant::now(),
        resources: vec![ResourceTuple {
            res_code: RES,
            res_info: 0,
            value,
        }],
    }
}

#[test]
fn test_higher_is_better_write_sequence() {
    let mut bench = bench(Policy::HigherIsBetter, "100");
    let read = |b: &Bench| fs::read_to_string(&b.node).unwrap();

    // A tunes 500: applied immediately
    let a = bench
        .table
        .insert_request(&request(1, PriorityTier::ThirdPartyHigh, 500))
        .unwrap();
    assert_eq!(read(&bench), "500");

    // B tunes 800: higher value takes the node
    let b = bench
        .table
        .insert_request(&request(2, PriorityTier::ThirdPartyHigh, 800))
        .unwrap();
    assert_eq!(read(&bench), "800");

    // B expires first: A's 500 is promoted back
    bench.table.remove_nodes(&b);
    assert_eq!(read(&bench), "500");

    // A expires: the startup default is restored
    bench.table.remove_nodes(&a);
    assert_eq!(read(&bench), "100");
    assert_eq!(bench.table.node_count(), 0);
}

#[test]
fn test_priority_preemption_write_sequence() {
    let mut bench = bench(Policy::Instant, "0");
    let read = |b: &Bench| fs::read_to_string(&b.node).unwrap();

    let a = bench
        .table
        .insert_request(&request(1, PriorityTier::ThirdPartyLow, 5))
        .unwrap();
    assert_eq!(read(&bench), "5");

    // A system-high request always preempts a third-party winner
    let b = bench
        .table
        .insert_request(&request(2, PriorityTier::SystemHigh, 9))
        .unwrap();
    assert_eq!(read(&bench), "9");

    bench.table.remove_nodes(&b);
    assert_eq!(read(&bench), "5");

    bench.table.remove_nodes(&a);
    assert_eq!(read(&bench), "0");
}

#[test]
fn test_round_trip_restoration_across_policies() {
    for policy in [
        Policy::Instant,
        Policy::HigherIsBetter,
        Policy::LowerIsBetter,
        Policy::LazyFifo,
    ] {
        let mut bench = bench(policy, "77");
        let mut placed = Vec::new();
        for (handle, value) in [(1u64, 10), (2, 30), (3, 20)] {
            placed.push(
                bench
                    .table
                    .insert_request(&request(handle, PriorityTier::ThirdPartyLow, value))
                    .unwrap(),
            );
        }
        for nodes in placed {
            bench.table.remove_nodes(&nodes);
        }
        assert_eq!(
            fs::read_to_string(&bench.node).unwrap(),
            "77",
            "default not restored under {:?}",
            policy
        );
    }
}

#[test]
fn test_winner_tracks_highest_priority_tier() {
    let mut bench = bench(Policy::Instant, "0");
    let read = |b: &Bench| fs::read_to_string(&b.node).unwrap();

    bench
        .table
        .insert_request(&request(1, PriorityTier::ThirdPartyLow, 1))
        .unwrap();
    bench
        .table
        .insert_request(&request(2, PriorityTier::ThirdPartyHigh, 2))
        .unwrap();
    let sys_low = bench
        .table
        .insert_request(&request(3, PriorityTier::SystemLow, 3))
        .unwrap();
    assert_eq!(read(&bench), "3");

    // Dropping the system-low winner falls back to third-party-high
    bench.table.remove_nodes(&sys_low);
    assert_eq!(read(&bench), "2");
}

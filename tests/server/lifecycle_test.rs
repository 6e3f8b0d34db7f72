/*!
 * Lifecycle Tests
 * End-to-end request flows through a running server: real dispatcher,
 * real timers, real node files in a tempdir
 */

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use restune::core::types::{ApplyScope, Policy, ResourceTuple};
use restune::core::wire::{ClientRequest, ClientResponse};
use restune::registry::resource::{ResourceDescriptor, ResourceRegistry};
use restune::registry::signal::SignalDescriptorBuilder;
use restune::registry::signal::SignalRegistry;
use restune::registry::target::{ClusterInfo, TargetRegistry};
use restune::server::{process_request, IngressShared, PeerIdentity};
use restune::{Server, Tunables};

struct Harness {
    _dir: tempfile::TempDir,
    root: PathBuf,
    server: Server,
    shared: Arc<IngressShared>,
}

impl Harness {
    fn read(&self, node: &str) -> String {
        fs::read_to_string(self.root.join(node)).unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

/// Tunables with the background daemons effectively parked
fn quiet_tunables() -> Tunables {
    Tunables {
        pulse_duration: Duration::from_secs(3600),
        gc_duration: Duration::from_secs(3600),
        ..Tunables::default()
    }
}

/// Build a server over tempdir-backed nodes. Each spec is
/// (res_code, node file, default, policy, scope).
fn harness_with(
    targets: Arc<TargetRegistry>,
    signals: SignalRegistry,
    specs: &[(u32, &str, &str, Policy, ApplyScope)],
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let mut registry = ResourceRegistry::new(Arc::clone(&targets));
    for &(code, node, default, policy, scope) in specs {
        // Create every scope instance's backing file so defaults capture
        match scope {
            ApplyScope::Global => fs::write(root.join(node), default).unwrap(),
            ApplyScope::Core => {
                for core in 0..targets.total_cores() {
                    let concrete = node.replace("%d", &core.to_string());
                    fs::write(root.join(concrete), default).unwrap();
                }
            }
            ApplyScope::Cluster => {
                for cluster in targets.clusters() {
                    let concrete = node.replace("%d", &cluster.logical_id.to_string());
                    fs::write(root.join(concrete), default).unwrap();
                }
            }
            ApplyScope::Cgroup => unimplemented!("not used by these tests"),
        }
        registry
            .register(
                ResourceDescriptor::builder(code, format!("res_{:x}", code))
                    .path(root.join(node).to_str().unwrap())
                    .bounds(0, 10_000_000)
                    .policy(policy)
                    .scope(scope)
                    .build(),
            )
            .unwrap();
    }

    let mut server = Server::builder()
        .targets(targets)
        .resources(registry)
        .signals(signals)
        .tunables(quiet_tunables())
        .build();
    server.start().unwrap();
    let shared = server.ingress().unwrap();
    Harness {
        _dir: dir,
        root,
        server,
        shared,
    }
}

fn global_harness(specs: &[(u32, &str, &str, Policy)]) -> Harness {
    let targets = Arc::new(TargetRegistry::new("test".into(), vec![], vec![]));
    let specs: Vec<_> = specs
        .iter()
        .map(|&(code, node, default, policy)| (code, node, default, policy, ApplyScope::Global))
        .collect();
    harness_with(targets, SignalRegistry::new(), &specs)
}

fn third_party() -> PeerIdentity {
    PeerIdentity {
        pid: 4_100_000,
        uid: 1000,
    }
}

fn system() -> PeerIdentity {
    PeerIdentity {
        pid: 4_100_001,
        uid: 0,
    }
}

fn tune(
    harness: &Harness,
    peer: PeerIdentity,
    code: u32,
    value: i32,
    duration_ms: i64,
    high: bool,
) -> u64 {
    let resp = process_request(
        &harness.shared,
        peer,
        ClientRequest::TuneResources {
            client_tid: peer.pid,
            resources: vec![ResourceTuple {
                res_code: code,
                res_info: 0,
                value,
            }],
            duration_ms,
            high_priority: high,
        },
    );
    match resp {
        ClientResponse::Handle(handle) => handle,
        other => panic!("tune rejected: {:?}", other),
    }
}

const R: u32 = 0x0003_0001;

#[test]
#[serial]
fn test_higher_is_better_arbitration_over_time() {
    let harness = global_harness(&[(R, "freq", "100", Policy::HigherIsBetter)]);

    tune(&harness, third_party(), R, 500, 1200, true);
    sleep(Duration::from_millis(80));
    assert_eq!(harness.read("freq"), "500");

    sleep(Duration::from_millis(120)); // t ~ 200
    tune(&harness, third_party(), R, 800, 500, true);
    sleep(Duration::from_millis(80));
    assert_eq!(harness.read("freq"), "800");

    // B expires around t=700; A's value comes back
    sleep(Duration::from_millis(600)); // t ~ 880
    assert_eq!(harness.read("freq"), "500");

    // A expires around t=1200; the default returns
    sleep(Duration::from_millis(600)); // t ~ 1480
    assert_eq!(harness.read("freq"), "100");
    assert_eq!(harness.server.requests().live_count(), 0);
    assert_eq!(harness.server.cdm().total_bound_handles(), 0);
}

#[test]
#[serial]
fn test_priority_preemption_over_time() {
    let harness = global_harness(&[(R, "mode", "0", Policy::Instant)]);

    tune(&harness, third_party(), R, 5, 2000, false);
    sleep(Duration::from_millis(80));
    assert_eq!(harness.read("mode"), "5");

    // System-high preempts at t ~ 100
    tune(&harness, system(), R, 9, 500, true);
    sleep(Duration::from_millis(80));
    assert_eq!(harness.read("mode"), "9");

    // System request expires around t=600; third-party value returns
    sleep(Duration::from_millis(700));
    assert_eq!(harness.read("mode"), "5");

    // Original request expires around t=2000
    sleep(Duration::from_millis(1400));
    assert_eq!(harness.read("mode"), "0");
}

#[test]
#[serial]
fn test_retune_extends_but_never_shortens() {
    let harness = global_harness(&[(R, "boost", "1", Policy::Instant)]);
    let peer = third_party();

    let handle = tune(&harness, peer, R, 7, 400, false);
    sleep(Duration::from_millis(150));

    let resp = process_request(
        &harness.shared,
        peer,
        ClientRequest::Retune {
            client_tid: peer.pid,
            handle,
            duration_ms: 1200,
        },
    );
    assert_eq!(resp, ClientResponse::Ok);

    // Original deadline (t=400) passes; the extension holds the value
    sleep(Duration::from_millis(500)); // t ~ 650
    assert_eq!(harness.read("boost"), "7");

    // Extended deadline (t ~ 1350) fires
    sleep(Duration::from_millis(1100));
    assert_eq!(harness.read("boost"), "1");

    // Shortening is refused and leaves the (now expired) state alone
    let handle = tune(&harness, peer, R, 8, 1000, false);
    sleep(Duration::from_millis(100));
    let resp = process_request(
        &harness.shared,
        peer,
        ClientRequest::Retune {
            client_tid: peer.pid,
            handle,
            duration_ms: 50,
        },
    );
    match resp {
        ClientResponse::Error { code, .. } => {
            assert_eq!(code, restune::WireCode::InvalidDuration)
        }
        other => panic!("unexpected: {:?}", other),
    }
    // The original timer still fires on schedule
    sleep(Duration::from_millis(1100));
    assert_eq!(harness.read("boost"), "1");
}

#[test]
#[serial]
fn test_untune_is_idempotent() {
    let harness = global_harness(&[(R, "gate", "4", Policy::Instant)]);
    let peer = third_party();

    let handle = tune(&harness, peer, R, 9, 60_000, false);
    sleep(Duration::from_millis(80));
    assert_eq!(harness.read("gate"), "9");

    let resp = process_request(
        &harness.shared,
        peer,
        ClientRequest::Untune {
            client_tid: peer.pid,
            handle,
        },
    );
    assert_eq!(resp, ClientResponse::Ok);
    sleep(Duration::from_millis(150));
    assert_eq!(harness.read("gate"), "4");
    assert_eq!(harness.server.requests().live_count(), 0);

    // A second untune of the same handle is NotFound, state unharmed
    let resp = process_request(
        &harness.shared,
        peer,
        ClientRequest::Untune {
            client_tid: peer.pid,
            handle,
        },
    );
    match resp {
        ClientResponse::Error { code, .. } => {
            assert_eq!(code, restune::WireCode::NoSuchHandle)
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(harness.read("gate"), "4");
}

#[test]
#[serial]
fn test_signal_fan_out_and_joint_expiry() {
    // Three clusters of two cores: core qualifiers 0..5, cluster ids 0..2
    let targets = Arc::new(TargetRegistry::new(
        "fanout".into(),
        vec![
            ClusterInfo {
                logical_id: 0,
                physical_id: 0,
                core_count: 2,
            },
            ClusterInfo {
                logical_id: 1,
                physical_id: 1,
                core_count: 2,
            },
            ClusterInfo {
                logical_id: 2,
                physical_id: 2,
                core_count: 2,
            },
        ],
        vec![],
    ));

    const R1: u32 = 0x0004_0001;
    const R2: u32 = 0x0004_0002;
    const R3: u32 = 0x0004_0003;

    let mut signals = SignalRegistry::new();
    signals
        .register(
            SignalDescriptorBuilder::new(0x0010, 0, "early_wakeup")
                .default_timeout_ms(500)
                .bundle(R1, vec![], vec![700])
                .bundle(R2, vec![2], vec![1_388_256])
                .bundle(R3, vec![1, 4], vec![1_344_100, 1_590_871])
                .build(),
        )
        .unwrap();

    let harness = harness_with(
        targets,
        signals,
        &[
            (R1, "lpm", "10", Policy::Instant, ApplyScope::Global),
            (R2, "cl_%d_freq", "20", Policy::Instant, ApplyScope::Cluster),
            (R3, "core_%d_freq", "30", Policy::Instant, ApplyScope::Core),
        ],
    );
    let peer = third_party();

    let resp = process_request(
        &harness.shared,
        peer,
        ClientRequest::TuneSignal {
            client_tid: peer.pid,
            sig_id: 0x0010,
            sig_type: 0,
            duration_ms: 0, // selects the signal's default timeout
            high_priority: true,
            app_name: None,
        },
    );
    assert!(matches!(resp, ClientResponse::Handle(_)));
    // One handle for the whole fan-out
    assert_eq!(harness.server.requests().live_count(), 1);

    sleep(Duration::from_millis(100));
    assert_eq!(harness.read("lpm"), "700");
    assert_eq!(harness.read("cl_2_freq"), "1388256");
    assert_eq!(harness.read("core_1_freq"), "1344100");
    assert_eq!(harness.read("core_4_freq"), "1590871");
    // Untouched siblings keep their defaults
    assert_eq!(harness.read("cl_0_freq"), "20");
    assert_eq!(harness.read("core_0_freq"), "30");

    // All scopes restore together on expiry
    sleep(Duration::from_millis(700));
    assert_eq!(harness.read("lpm"), "10");
    assert_eq!(harness.read("cl_2_freq"), "20");
    assert_eq!(harness.read("core_1_freq"), "30");
    assert_eq!(harness.read("core_4_freq"), "30");
    assert_eq!(harness.server.requests().live_count(), 0);
}

#[test]
#[serial]
fn test_shutdown_restores_everything() {
    let mut harness = global_harness(&[(R, "sticky", "55", Policy::Instant)]);
    tune(&harness, third_party(), R, 999, 600_000, false);
    sleep(Duration::from_millis(100));
    assert_eq!(harness.read("sticky"), "999");

    harness.server.shutdown();
    assert_eq!(harness.read("sticky"), "55");
    assert_eq!(harness.server.requests().live_count(), 0);
}

#[test]
#[serial]
fn test_bound_handles_match_live_requests() {
    let harness = global_harness(&[(R, "par", "0", Policy::LazyFifo)]);
    let peer = third_party();
    for value in 1..=3 {
        tune(&harness, peer, R, value, 30_000, false);
    }
    sleep(Duration::from_millis(150));
    assert_eq!(harness.server.requests().live_count(), 3);
    assert_eq!(harness.server.cdm().total_bound_handles(), 3);
}

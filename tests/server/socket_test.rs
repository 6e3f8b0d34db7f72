/*!
 * Socket Tests
 * Exercises the wire protocol over a real UNIX domain socket
 */

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::fs;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use restune::core::types::{Policy, ResourceTuple};
use restune::core::wire::{read_frame, write_frame, ClientRequest, ClientResponse};
use restune::registry::properties::PropertiesRegistry;
use restune::registry::resource::{ResourceDescriptor, ResourceRegistry};
use restune::registry::target::TargetRegistry;
use restune::{Server, Tunables};

const R: u32 = 0x0005_0001;

fn roundtrip(stream: &mut UnixStream, req: &ClientRequest) -> ClientResponse {
    write_frame(stream, req).unwrap();
    read_frame(stream).unwrap().expect("server closed early")
}

#[test]
#[serial]
fn test_wire_protocol_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let node = dir.path().join("node");
    fs::write(&node, "11").unwrap();
    let socket = dir.path().join("restune.sock");

    let targets = Arc::new(TargetRegistry::new("sock".into(), vec![], vec![]));
    let mut registry = ResourceRegistry::new(Arc::clone(&targets));
    registry
        .register(
            ResourceDescriptor::builder(R, "sock_res")
                .path(node.to_str().unwrap())
                .bounds(0, 1000)
                .policy(Policy::Instant)
                .build(),
        )
        .unwrap();

    let properties = PropertiesRegistry::new();
    properties.set("vendor.variant", "bench");

    let mut server = Server::builder()
        .targets(targets)
        .resources(registry)
        .properties(properties)
        .tunables(Tunables {
            pulse_duration: Duration::from_secs(3600),
            gc_duration: Duration::from_secs(3600),
            ..Tunables::default()
        })
        .socket_path(&socket)
        .ingress_workers(2)
        .build();
    server.start().unwrap();

    let mut stream = UnixStream::connect(&socket).unwrap();
    let tid = std::process::id();

    // Tune over the wire
    let resp = roundtrip(
        &mut stream,
        &ClientRequest::TuneResources {
            client_tid: tid,
            resources: vec![ResourceTuple {
                res_code: R,
                res_info: 0,
                value: 321,
            }],
            duration_ms: 30_000,
            high_priority: false,
        },
    );
    let handle = match resp {
        ClientResponse::Handle(handle) => handle,
        other => panic!("tune over socket failed: {:?}", other),
    };
    sleep(Duration::from_millis(120));
    assert_eq!(fs::read_to_string(&node).unwrap(), "321");

    // Property read
    let resp = roundtrip(
        &mut stream,
        &ClientRequest::GetProp {
            name: "vendor.variant".into(),
        },
    );
    assert_eq!(resp, ClientResponse::Value("bench".into()));

    // Unknown resource comes back as a typed wire error
    let resp = roundtrip(
        &mut stream,
        &ClientRequest::TuneResources {
            client_tid: tid,
            resources: vec![ResourceTuple {
                res_code: 0x00ff_00ff,
                res_info: 0,
                value: 1,
            }],
            duration_ms: 1000,
            high_priority: false,
        },
    );
    match resp {
        ClientResponse::Error { code, .. } => {
            assert_eq!(code, restune::WireCode::ResourceUnknown)
        }
        other => panic!("unexpected: {:?}", other),
    }

    // Untune and observe the restore
    let resp = roundtrip(
        &mut stream,
        &ClientRequest::Untune {
            client_tid: tid,
            handle,
        },
    );
    assert_eq!(resp, ClientResponse::Ok);
    sleep(Duration::from_millis(150));
    assert_eq!(fs::read_to_string(&node).unwrap(), "11");

    drop(stream);
    server.shutdown();
    assert!(!socket.exists());
}

#[test]
#[serial]
fn test_concurrent_connections() {
    let dir = tempfile::tempdir().unwrap();
    let node = dir.path().join("shared_node");
    fs::write(&node, "0").unwrap();
    let socket = dir.path().join("restune.sock");

    let targets = Arc::new(TargetRegistry::new("sock2".into(), vec![], vec![]));
    let mut registry = ResourceRegistry::new(Arc::clone(&targets));
    registry
        .register(
            ResourceDescriptor::builder(R, "shared_res")
                .path(node.to_str().unwrap())
                .bounds(0, 1000)
                .policy(Policy::HigherIsBetter)
                .build(),
        )
        .unwrap();

    let mut server = Server::builder()
        .targets(targets)
        .resources(registry)
        .tunables(Tunables {
            pulse_duration: Duration::from_secs(3600),
            gc_duration: Duration::from_secs(3600),
            rate_limiter_delta_ms: 1,
            ..Tunables::default()
        })
        .socket_path(&socket)
        .ingress_workers(4)
        .build();
    server.start().unwrap();

    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let socket = socket.clone();
            std::thread::spawn(move || {
                let mut stream = UnixStream::connect(&socket).unwrap();
                roundtrip(
                    &mut stream,
                    &ClientRequest::TuneResources {
                        client_tid: std::process::id(),
                        resources: vec![ResourceTuple {
                            res_code: R,
                            res_info: 0,
                            value: 100 + i as i32,
                        }],
                        duration_ms: 30_000,
                        high_priority: false,
                    },
                )
            })
        })
        .collect();

    let mut accepted = 0;
    for join in handles {
        if matches!(join.join().unwrap(), ClientResponse::Handle(_)) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 4);

    sleep(Duration::from_millis(150));
    // Highest requested value wins under higher-is-better
    assert_eq!(fs::read_to_string(&node).unwrap(), "103");

    server.shutdown();
    assert_eq!(fs::read_to_string(&node).unwrap(), "0");
}

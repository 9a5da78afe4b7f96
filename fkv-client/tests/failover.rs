use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use fkv_client::{
    discover_master, CacheClient, ClientError, DialOptions, PoolConfig, Roster, TcpDialer,
};
use fkv_testkit::{FakeCluster, NodeRole};

const A: usize = 0;
const B: usize = 1;
const C: usize = 2;

fn client_for(cluster: &FakeCluster, validation_cooldown: Duration) -> CacheClient {
    let roster = Roster::new(cluster.addrs()).expect("roster");
    let config = PoolConfig {
        validation_cooldown,
        ..PoolConfig::default()
    };
    CacheClient::with_dialer(TcpDialer::new(DialOptions::default()), roster, config)
        .expect("bootstrap")
}

#[test]
fn scans_roster_on_first_discovery() {
    let cluster = FakeCluster::start(3);
    cluster.promote(C);

    let client = client_for(&cluster, Duration::ZERO);
    assert_eq!(client.last_known_master(), Some(cluster.addr(C)));
    for node in [A, B, C] {
        assert_eq!(cluster.role_probes(node), 1);
    }
}

#[test]
fn demoted_master_hint_skips_roster_scan() {
    let cluster = FakeCluster::start(3);
    cluster.promote(C);
    let client = client_for(&cluster, Duration::ZERO);

    cluster.promote(B);
    cluster.reset_probes();
    client.is_alive().unwrap();

    assert_eq!(client.last_known_master(), Some(cluster.addr(B)));
    assert_eq!(cluster.role_probes(A), 0);
    let record = client.pool().last_known_master().unwrap();
    assert_eq!(record.hint.as_ref().map(|hint| hint.address()), Some(cluster.addr(B)));
}

#[test]
fn converges_after_promotion() {
    let cluster = FakeCluster::start(3);
    cluster.promote(C);
    let client = client_for(&cluster, Duration::ZERO);
    client.set("before", b"1", 0).unwrap();

    cluster.promote(B);
    client.set("after", b"2", 0).unwrap();

    assert_eq!(client.last_known_master(), Some(cluster.addr(B)));
    assert_eq!(client.get("before").unwrap(), Some(b"1".to_vec()));
    assert_eq!(client.get("after").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn converges_when_master_goes_down() {
    let cluster = FakeCluster::start(3);
    let client = client_for(&cluster, Duration::ZERO);
    assert_eq!(client.last_known_master(), Some(cluster.addr(A)));

    cluster.stop(A);
    cluster.promote(B);

    client.set("k", b"v", 0).unwrap();
    assert_eq!(client.last_known_master(), Some(cluster.addr(B)));
    assert_eq!(client.pool().idle_len(), 1);
}

#[test]
fn readonly_reply_forces_rediscovery() {
    let cluster = FakeCluster::start(3);
    // Long cooldown: the pooled connection to A is reused without a probe.
    let client = client_for(&cluster, Duration::from_secs(60));
    client.set("k", b"1", 0).unwrap();

    cluster.promote(C);
    assert!(matches!(client.set("k", b"2", 0), Err(ClientError::ReadOnly(_))));

    client.set("k", b"3", 0).unwrap();
    assert_eq!(client.last_known_master(), Some(cluster.addr(C)));
    assert_eq!(client.get("k").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn no_master_fails_fast() {
    let cluster = FakeCluster::start(2);
    cluster.set_role(A, NodeRole::Replica(B));
    cluster.set_role(B, NodeRole::Replica(A));

    let roster = Roster::new(cluster.addrs()).unwrap();
    let result = CacheClient::with_dialer(
        TcpDialer::new(DialOptions::default()),
        roster,
        PoolConfig::default(),
    );
    assert!(matches!(result, Err(ClientError::NoMasterAvailable)));
    // Each endpoint is probed at most once per pass.
    assert_eq!(cluster.role_probes(A), 1);
    assert_eq!(cluster.role_probes(B), 1);
}

#[test]
fn operations_fail_while_cluster_has_no_master_then_recover() {
    let cluster = FakeCluster::start(2);
    let client = client_for(&cluster, Duration::ZERO);

    cluster.set_role(A, NodeRole::Replica(B));
    assert!(matches!(client.get("k"), Err(ClientError::NoMasterAvailable)));

    cluster.promote(B);
    client.set("k", b"v", 0).unwrap();
    assert_eq!(client.last_known_master(), Some(cluster.addr(B)));
}

/// Endpoint that accepts the handshake and then answers `ROLE` with `reply`.
fn spawn_bogus_endpoint(reply: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 512];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
                let answer: &[u8] = if buf[..n].windows(4).any(|w| w == b"ROLE") {
                    reply
                } else {
                    b"+OK\r\n"
                };
                if stream.write_all(answer).is_err() {
                    break;
                }
            }
        }
    });
    addr
}

#[test]
fn oversized_role_reply_is_not_master() {
    let huge_array = spawn_bogus_endpoint(b"*4611686018427387904\r\n");
    let huge_bulk = spawn_bogus_endpoint(b"*3\r\n$4611686018427387904\r\n");
    let cluster = FakeCluster::start(1);
    let dialer = TcpDialer::new(DialOptions::default());

    assert!(discover_master(&dialer, &[huge_array.clone()], None, None).is_none());

    let roster = vec![huge_array, huge_bulk, cluster.addr(A)];
    let found = discover_master(&dialer, &roster, None, None).expect("master");
    assert_eq!(found.addr, cluster.addr(A));
}

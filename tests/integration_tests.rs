//! Integration Tests
//!
//! End-to-end tests against an in-process mock node that speaks the info
//! and message protocols: discovery, routing, command execution, retry,
//! timeout, cancellation and transaction tracking.

use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use meshkv_client::protocol::info::encode_info_response;
use meshkv_client::protocol::{
    decode_message, encode_response, read_frame, FieldType, MessageType, ResultCode, INFO_DELETE,
    INFO_WRITE,
};
use meshkv_client::{ClientError, Cluster, CommandPolicy, Config, Host, Key, Operation, Txn};

// =============================================================================
// Mock Node
// =============================================================================

/// How the mock node handles message (non-info) requests
#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    /// Serve get/put/delete from an in-memory store
    Normal,
    /// Send a header claiming a large body, then stall
    StallBody,
    /// Read requests and never respond
    NeverRespond,
}

type Store = Arc<Mutex<HashMap<Vec<u8>, (Vec<u8>, u32)>>>;

/// Spawn a mock node. Info requests are always served so discovery and
/// tending work; message behavior is configurable per test.
fn spawn_mock_node(name: &'static str, behavior: Behavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let store: Store = Arc::new(Mutex::new(HashMap::new()));

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let store = store.clone();
            thread::spawn(move || serve_connection(stream, name, behavior, store));
        }
    });

    addr
}

fn serve_connection(mut stream: TcpStream, name: &'static str, behavior: Behavior, store: Store) {
    loop {
        let Ok((proto, body)) = read_frame(&mut stream) else {
            return;
        };

        let response = match proto.msg_type {
            MessageType::Info => info_response(name, &body),
            MessageType::Message => match behavior {
                Behavior::Normal => message_response(&body, &store),
                Behavior::StallBody => {
                    // 8 bytes of a 64-byte body, then silence.
                    let mut partial = Vec::new();
                    partial.extend_from_slice(&[2, 3, 0, 0, 0, 0, 0, 64]);
                    partial.extend_from_slice(&[0u8; 8]);
                    let _ = stream.write_all(&partial);
                    thread::sleep(Duration::from_secs(5));
                    return;
                }
                Behavior::NeverRespond => {
                    thread::sleep(Duration::from_secs(5));
                    return;
                }
            },
        };

        if stream.write_all(&response).is_err() {
            return;
        }
    }
}

fn info_response(name: &str, body: &[u8]) -> Vec<u8> {
    let text = std::str::from_utf8(body).unwrap();
    let replicas: String = (0..8)
        .map(|pid| format!("test:{}", pid))
        .collect::<Vec<_>>()
        .join(";");

    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for request in text.split('\n').filter(|l| !l.is_empty()) {
        match request {
            "node" => pairs.push(("node", name)),
            "partitions" => pairs.push(("partitions", "8")),
            "partition-generation" => pairs.push(("partition-generation", "1")),
            "peers-generation" => pairs.push(("peers-generation", "1")),
            "peers" => pairs.push(("peers", "")),
            "replicas-write" => pairs.push(("replicas-write", &replicas)),
            "replicas-read" => pairs.push(("replicas-read", "")),
            _ => {}
        }
    }
    encode_info_response(&pairs).to_vec()
}

fn message_response(body: &[u8], store: &Store) -> Vec<u8> {
    let frame = decode_message(body).unwrap();
    let digest = frame
        .fields
        .iter()
        .find(|(ftype, _)| *ftype == FieldType::Digest)
        .map(|(_, data)| data.clone())
        .unwrap();

    let mut store = store.lock().unwrap();

    let response = if frame.info & INFO_DELETE != 0 {
        match store.remove(&digest) {
            Some(_) => encode_response(ResultCode::Ok, 0, 0, None),
            None => encode_response(ResultCode::NotFound, 0, 0, None),
        }
    } else if frame.info & INFO_WRITE != 0 {
        let generation = store.get(&digest).map(|(_, g)| g + 1).unwrap_or(1);
        store.insert(digest, (frame.value.clone().unwrap_or_default(), generation));
        // Writes report no record version; reads do.
        encode_response(ResultCode::Ok, generation, 0, None)
    } else {
        match store.get(&digest) {
            Some((value, generation)) => {
                encode_response(ResultCode::Ok, *generation, *generation as u64, Some(value))
            }
            None => encode_response(ResultCode::NotFound, 0, 0, None),
        }
    };

    response.to_vec()
}

// =============================================================================
// Test Setup
// =============================================================================

fn test_config(addr: SocketAddr) -> Config {
    Config {
        seed_hosts: vec![Host::new("127.0.0.1", addr.port())],
        n_partitions: 8,
        tend_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_millis(500),
        default_policy: CommandPolicy {
            timeout: Duration::from_millis(500),
            socket_timeout: Duration::from_millis(100),
            max_retries: 2,
            retry_backoff: Duration::from_millis(10),
        },
        executor_threads: 2,
        ..Config::default()
    }
}

fn connect(addr: SocketAddr) -> Cluster {
    let cluster = Cluster::connect(test_config(addr)).unwrap();
    cluster.wait_ready(Duration::from_secs(2)).unwrap();
    cluster
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[test]
fn test_connect_discovers_seed_node() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let nodes = cluster.nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name(), "alpha");
    assert!(nodes[0].is_active());
    assert!(cluster.generation() > 0);

    cluster.close();
}

#[test]
fn test_connect_with_unreachable_seed_is_not_ready() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let cluster = Cluster::connect(test_config(addr)).unwrap();
    assert!(cluster.wait_ready(Duration::from_millis(300)).is_err());
    assert!(cluster.nodes().is_empty());

    cluster.close();
}

// =============================================================================
// Command Tests
// =============================================================================

#[test]
fn test_put_get_delete_roundtrip() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let key = Key::new("test", "demo", b"record-1");

    let record = cluster.put(None, None, &key, b"hello").unwrap();
    assert_eq!(record.generation, 1);

    let fetched = cluster.get(None, None, &key).unwrap().unwrap();
    assert_eq!(fetched.value, Some(b"hello".to_vec()));
    assert_eq!(fetched.generation, 1);

    let record = cluster.put(None, None, &key, b"world").unwrap();
    assert_eq!(record.generation, 2);

    assert!(cluster.delete(None, None, &key).unwrap());
    assert!(!cluster.delete(None, None, &key).unwrap());
    assert!(cluster.get(None, None, &key).unwrap().is_none());

    cluster.close();
}

#[test]
fn test_get_missing_returns_none() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let key = Key::new("test", "demo", b"never-written");
    assert!(cluster.get(None, None, &key).unwrap().is_none());

    cluster.close();
}

#[test]
fn test_stats_reflect_command_traffic() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let key = Key::new("test", "demo", b"record-1");
    cluster.put(None, None, &key, b"x").unwrap();
    cluster.get(None, None, &key).unwrap();

    let stats = cluster.stats();
    assert_eq!(stats.nodes.len(), 1);
    let samples: HashMap<_, _> = stats.nodes[0].samples.iter().cloned().collect();
    assert!(samples["write"] >= 1);
    assert!(samples["read"] >= 1);
    assert!(samples["conn"] >= 1);

    cluster.close();
}

// =============================================================================
// Timeout and Retry Tests
// =============================================================================

#[test]
fn test_deadline_expires_during_body_read() {
    let addr = spawn_mock_node("alpha", Behavior::StallBody);
    let cluster = connect(addr);

    let key = Key::new("test", "demo", b"record-1");
    let started = Instant::now();
    let err = cluster.get(None, None, &key).unwrap_err();

    // Must report a timeout promptly, not hang on the stalled body.
    assert!(matches!(err, ClientError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));

    cluster.close();
}

#[test]
fn test_no_available_node_surfaces_as_timeout() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let cluster = Cluster::connect(test_config(addr)).unwrap();

    let key = Key::new("test", "demo", b"record-1");
    let err = cluster.get(None, None, &key).unwrap_err();

    match err {
        ClientError::Timeout {
            attempts,
            last_error,
        } => {
            assert!(attempts >= 1);
            assert!(last_error.contains("No available node"));
        }
        other => panic!("Expected Timeout, got {}", other),
    }

    cluster.close();
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[test]
fn test_cancel_in_flight_command() {
    let addr = spawn_mock_node("alpha", Behavior::NeverRespond);
    let cluster = connect(addr);

    let key = Key::new("test", "demo", b"record-1");
    let policy = CommandPolicy {
        timeout: Duration::from_secs(10),
        socket_timeout: Duration::from_millis(50),
        max_retries: 0,
        retry_backoff: Duration::from_millis(10),
    };

    let handle = cluster.submit(Some(&policy), None, key, Operation::Get);
    thread::sleep(Duration::from_millis(100));
    handle.cancel();

    let started = Instant::now();
    let err = handle.wait().unwrap_err();
    assert!(matches!(err, ClientError::Canceled));
    // Cancellation is observed within a poll interval, not at the deadline.
    assert!(started.elapsed() < Duration::from_secs(2));

    cluster.close();
}

// =============================================================================
// Background Executor Tests
// =============================================================================

#[test]
fn test_submit_background_command() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let key = Key::new("test", "demo", b"record-1");
    cluster
        .submit(None, None, key.clone(), Operation::Put(b"bg".to_vec()))
        .wait()
        .unwrap();

    let record = cluster
        .submit(None, None, key, Operation::Get)
        .wait()
        .unwrap();
    assert_eq!(record.value, Some(b"bg".to_vec()));

    cluster.close();
}

// =============================================================================
// Pipelined Batch Tests
// =============================================================================

#[test]
fn test_pipelined_batch_preserves_input_order() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let batch: Vec<_> = (0..8)
        .map(|i| {
            let key = Key::new("test", "demo", format!("bk-{}", i).as_bytes());
            (key, Operation::Put(format!("bv-{}", i).into_bytes()))
        })
        .collect();
    let results = cluster.execute_pipelined(None, &batch);
    assert_eq!(results.len(), 8);
    for result in &results {
        assert!(result.is_ok());
    }

    let reads: Vec<_> = (0..8)
        .map(|i| {
            let key = Key::new("test", "demo", format!("bk-{}", i).as_bytes());
            (key, Operation::Get)
        })
        .collect();
    let results = cluster.execute_pipelined(None, &reads);
    for (i, result) in results.iter().enumerate() {
        let record = result.as_ref().unwrap();
        assert_eq!(record.value, Some(format!("bv-{}", i).into_bytes()));
    }

    cluster.close();
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
fn test_txn_tracks_read_versions_and_writes() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let key = Key::new("test", "demo", b"txn-key");
    cluster.put(None, None, &key, b"v1").unwrap();

    let txn = Txn::new();

    // A read inside the transaction records the observed version.
    cluster.get(None, Some(&txn), &key).unwrap().unwrap();
    assert_eq!(txn.get_read_version(&key.digest), Some(1));

    // A completed write moves the key into the write set.
    cluster.put(None, Some(&txn), &key, b"v2").unwrap();
    assert!(txn.writes_contain(&key.digest));
    assert_eq!(txn.get_read_version(&key.digest), None);

    cluster.close();
}

#[test]
fn test_txn_namespace_mismatch_fails_without_io() {
    let addr = spawn_mock_node("alpha", Behavior::Normal);
    let cluster = connect(addr);

    let txn = Txn::new();
    let key = Key::new("test", "demo", b"k");
    cluster.put(None, Some(&txn), &key, b"v").unwrap();

    let foreign = Key::new("other", "demo", b"k");
    let err = cluster.get(None, Some(&txn), &foreign).unwrap_err();
    assert!(matches!(err, ClientError::Txn(_)));

    cluster.close();
}

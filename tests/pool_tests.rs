//! Connection Pool Tests
//!
//! Tests for exclusive pool checkout, limits, staleness and node drain
//! semantics.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use meshkv_client::cluster::{Host, Node, PoolContext};
use meshkv_client::net::ConnPool;
use meshkv_client::{ClientError, Config};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Plain TCP sink; the pool only needs something to connect to. Accepted
/// sockets are parked in a shared list so tests can sever them.
fn spawn_sink_server() -> (SocketAddr, Arc<Mutex<Vec<TcpStream>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));

    let parked = accepted.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            parked.lock().unwrap().push(stream);
        }
    });

    (addr, accepted)
}

// =============================================================================
// Checkout Tests
// =============================================================================

#[test]
fn test_acquire_creates_then_reuses() {
    let (addr, _accepted) = spawn_sink_server();
    let pool = ConnPool::new("n1".to_string(), vec![addr], 4);

    let (conn, fresh) = pool.acquire(CONNECT_TIMEOUT).unwrap();
    assert!(fresh);
    assert_eq!(pool.open_count(), 1);

    pool.release(conn);
    assert_eq!(pool.idle_count(), 1);

    let (conn, fresh) = pool.acquire(CONNECT_TIMEOUT).unwrap();
    assert!(!fresh);
    assert_eq!(pool.open_count(), 1);
    pool.release(conn);
}

#[test]
fn test_connection_limit_fails_fast() {
    let (addr, _accepted) = spawn_sink_server();
    let pool = ConnPool::new("n1".to_string(), vec![addr], 1);

    let (held, _) = pool.acquire(CONNECT_TIMEOUT).unwrap();

    match pool.acquire(CONNECT_TIMEOUT) {
        Err(ClientError::MaxConnectionsExceeded { node, limit }) => {
            assert_eq!(node, "n1");
            assert_eq!(limit, 1);
        }
        other => panic!("Expected MaxConnectionsExceeded, got {:?}", other.map(|_| ())),
    }

    pool.release(held);
    assert!(pool.acquire(CONNECT_TIMEOUT).is_ok());
}

#[test]
fn test_destroy_frees_a_slot() {
    let (addr, _accepted) = spawn_sink_server();
    let pool = ConnPool::new("n1".to_string(), vec![addr], 1);

    let (conn, _) = pool.acquire(CONNECT_TIMEOUT).unwrap();
    pool.destroy(conn);
    assert_eq!(pool.open_count(), 0);

    let (conn, fresh) = pool.acquire(CONNECT_TIMEOUT).unwrap();
    assert!(fresh);
    pool.release(conn);
}

#[test]
fn test_stale_pooled_connection_is_replaced() {
    let (addr, accepted) = spawn_sink_server();
    let pool = ConnPool::new("n1".to_string(), vec![addr], 4);

    let (conn, _) = pool.acquire(CONNECT_TIMEOUT).unwrap();
    pool.release(conn);

    // Server severs every parked socket; the pooled connection is now dead.
    accepted.lock().unwrap().clear();
    thread::sleep(Duration::from_millis(50));

    let (conn, fresh) = pool.acquire(CONNECT_TIMEOUT).unwrap();
    assert!(fresh);
    assert_eq!(pool.open_count(), 1);
    pool.release(conn);
}

#[test]
fn test_close_idle_evicts_unused() {
    let (addr, _accepted) = spawn_sink_server();
    let pool = ConnPool::new("n1".to_string(), vec![addr], 4);

    let (conn, _) = pool.acquire(CONNECT_TIMEOUT).unwrap();
    pool.release(conn);
    assert_eq!(pool.idle_count(), 1);

    pool.close_idle(Duration::ZERO);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.open_count(), 0);
}

#[test]
fn test_connect_failure_releases_claimed_slot() {
    // A port with nothing listening.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let pool = ConnPool::new("n1".to_string(), vec![addr], 1);
    assert!(pool.acquire(Duration::from_millis(200)).is_err());
    assert_eq!(pool.open_count(), 0);

    // The failed claim must not eat the only slot.
    assert!(matches!(
        pool.acquire(Duration::from_millis(200)),
        Err(ClientError::Connection(_)) | Err(ClientError::Io(_))
    ));
}

// =============================================================================
// Node Drain Tests
// =============================================================================

#[test]
fn test_node_drain_waits_for_checked_out_connections() {
    let (addr, _accepted) = spawn_sink_server();
    let config = Config {
        seed_hosts: vec![Host::new("127.0.0.1", addr.port())],
        ..Config::default()
    };

    let node = Arc::new(Node::new(
        "n1".to_string(),
        Host::new("127.0.0.1", addr.port()),
        vec![addr],
        &config,
    ));

    // A command holds a checked-out connection and its own node handle.
    let command_node = node.clone();
    let (held, _) = command_node.pool(PoolContext::Sync).acquire(CONNECT_TIMEOUT).unwrap();

    // The cluster removes the node: pools drain, but the checked-out
    // connection stays accounted for until its holder releases it.
    node.close();
    assert!(!node.is_active());
    assert_eq!(node.open_connections(), 1);

    drop(node);

    // The command still owns a live node handle and can clean up safely.
    assert_eq!(command_node.name(), "n1");
    command_node.pool(PoolContext::Sync).destroy(held);
    assert_eq!(command_node.open_connections(), 0);
}

// Copyright 2020 Joyent, Inc.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use slog::{o, Drain, Logger};

use bankshot::connection::Connection;
use bankshot::endpoint::Endpoint;
use bankshot::error::Error;
use bankshot::pool::{BasicPool, ConnectionPool, PoolOptions};

fn test_log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    )
}

#[derive(Debug)]
pub struct DummyConnection {
    endpoint: Endpoint,
    connected: bool,
}

impl DummyConnection {
    fn new(endpoint: &Endpoint) -> Self {
        DummyConnection {
            endpoint: endpoint.clone(),
            connected: false,
        }
    }
}

impl Connection for DummyConnection {
    type Error = Error;

    fn connect(&mut self) -> Result<(), Error> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.connected = false;
        Ok(())
    }
}

// Connection whose establishment always fails.
#[derive(Debug)]
pub struct RefusedConnection;

impl Connection for RefusedConnection {
    type Error = Error;

    fn connect(&mut self) -> Result<(), Error> {
        Err(Error::Driver(String::from("connection refused")))
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

fn dummy_pool(
    max_per_endpoint: u32,
) -> (
    BasicPool<DummyConnection, impl Fn(&Endpoint) -> DummyConnection + Send + Sync>,
    Arc<AtomicUsize>,
) {
    let created = Arc::new(AtomicUsize::new(0));
    let created_clone = created.clone();
    let options = PoolOptions {
        max_connections_per_endpoint: Some(max_per_endpoint),
        log: Some(test_log()),
    };
    let pool = BasicPool::new(options, move |endpoint: &Endpoint| {
        created_clone.fetch_add(1, Ordering::SeqCst);
        DummyConnection::new(endpoint)
    });
    (pool, created)
}

#[test]
fn acquire_establishes_lazily_and_reuses() {
    let h1 = Endpoint::new("h1", 4001);
    let (pool, created) = dummy_pool(2);

    let conn = pool.acquire(&h1, Some(1000)).unwrap();
    assert!(conn.connected);
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(u32::from(pool.stats().total_connections), 1);
    assert_eq!(u32::from(pool.stats().idle_connections), 0);

    pool.release(&h1, conn).unwrap();
    assert_eq!(u32::from(pool.stats().idle_connections), 1);

    // A second claim reuses the released connection instead of establishing
    // a new one.
    let conn = pool.acquire(&h1, Some(1000)).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(u32::from(pool.stats().total_connections), 1);
    pool.release(&h1, conn).unwrap();
}

#[test]
fn endpoints_have_separate_queues() {
    let h1 = Endpoint::new("h1", 4001);
    let h2 = Endpoint::new("h2", 4002);
    let (pool, created) = dummy_pool(1);

    let conn1 = pool.acquire(&h1, Some(1000)).unwrap();
    let conn2 = pool.acquire(&h2, Some(1000)).unwrap();
    assert_eq!(conn1.endpoint, h1);
    assert_eq!(conn2.endpoint, h2);
    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(u32::from(pool.stats().total_connections), 2);

    pool.release(&h1, conn1).unwrap();
    pool.release(&h2, conn2).unwrap();
}

#[test]
fn acquire_times_out_at_cap() {
    let h1 = Endpoint::new("h1", 4001);
    let (pool, _created) = dummy_pool(1);

    let conn = pool.acquire(&h1, Some(1000)).unwrap();

    // The endpoint is at its cap, so this claim must block and then time
    // out.
    let result = pool.acquire(&h1, Some(50));
    assert!(matches!(result, Err(Error::ClaimTimeout(_))));

    pool.release(&h1, conn).unwrap();
}

#[test]
fn release_wakes_blocked_claimant() {
    let h1 = Endpoint::new("h1", 4001);
    let (pool, _created) = dummy_pool(1);
    let pool = Arc::new(pool);

    let conn = pool.acquire(&h1, Some(1000)).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let barrier_clone = barrier.clone();
    let pool_clone = pool.clone();
    let h1_clone = h1.clone();
    let claimant = thread::spawn(move || {
        barrier_clone.wait();
        let conn = pool_clone.acquire(&h1_clone, Some(5000)).unwrap();
        pool_clone.release(&h1_clone, conn).unwrap();
    });

    barrier.wait();
    pool.release(&h1, conn).unwrap();

    claimant.join().unwrap();
    assert_eq!(u32::from(pool.stats().total_connections), 1);
    assert_eq!(u32::from(pool.stats().idle_connections), 1);
}

#[test]
fn release_wakes_claimant_for_matching_endpoint() {
    let h1 = Endpoint::new("h1", 4001);
    let h2 = Endpoint::new("h2", 4002);
    let (pool, _created) = dummy_pool(1);
    let pool = Arc::new(pool);

    let conn1 = pool.acquire(&h1, Some(1000)).unwrap();
    let conn2 = pool.acquire(&h2, Some(1000)).unwrap();

    // Park one claimant per endpoint. The idle queues are keyed, so a
    // release for one endpoint must wake the claimant waiting on that
    // endpoint even while a claimant for the other endpoint is parked on
    // the same condvar and would re-wait if woken instead.
    let barrier = Arc::new(Barrier::new(3));
    let barrier_clone = barrier.clone();
    let pool_clone = pool.clone();
    let h1_clone = h1.clone();
    let claimant1 = thread::spawn(move || {
        barrier_clone.wait();
        let conn = pool_clone.acquire(&h1_clone, Some(2000)).unwrap();
        assert_eq!(conn.endpoint, h1_clone);
        pool_clone.release(&h1_clone, conn).unwrap();
    });
    let barrier_clone = barrier.clone();
    let pool_clone = pool.clone();
    let h2_clone = h2.clone();
    let claimant2 = thread::spawn(move || {
        barrier_clone.wait();
        let conn = pool_clone.acquire(&h2_clone, Some(5000)).unwrap();
        pool_clone.release(&h2_clone, conn).unwrap();
    });

    barrier.wait();
    thread::sleep(Duration::from_millis(100));

    pool.release(&h1, conn1).unwrap();
    claimant1.join().unwrap();

    pool.release(&h2, conn2).unwrap();
    claimant2.join().unwrap();

    assert_eq!(u32::from(pool.stats().total_connections), 2);
    assert_eq!(u32::from(pool.stats().idle_connections), 2);
}

#[test]
fn close_while_claimant_is_blocked() {
    let h1 = Endpoint::new("h1", 4001);
    let h2 = Endpoint::new("h2", 4002);
    let (pool, created) = dummy_pool(1);
    let pool = Arc::new(pool);

    let conn1 = pool.acquire(&h1, Some(1000)).unwrap();
    let conn2 = pool.acquire(&h2, Some(1000)).unwrap();
    pool.release(&h2, conn2).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let barrier_clone = barrier.clone();
    let pool_clone = pool.clone();
    let h1_clone = h1.clone();
    let claimant = thread::spawn(move || {
        barrier_clone.wait();
        let conn = pool_clone.acquire(&h1_clone, Some(5000)).unwrap();
        pool_clone.release(&h1_clone, conn).unwrap();
    });

    barrier.wait();
    thread::sleep(Duration::from_millis(100));

    // Close drains the idle queues while the claimant is parked at the
    // cap. The claimant must stay live and keep waiting for its slot.
    pool.close();
    assert_eq!(u32::from(pool.stats().idle_connections), 0);
    assert_eq!(u32::from(pool.stats().total_connections), 1);

    // Freeing the claimed slot lets the parked claimant establish a
    // fresh connection rather than sleeping out its deadline.
    pool.invalidate(&h1, conn1);
    claimant.join().unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 3);
    assert_eq!(u32::from(pool.stats().total_connections), 1);
    assert_eq!(u32::from(pool.stats().idle_connections), 1);
}

#[test]
fn invalidate_frees_a_slot() {
    let h1 = Endpoint::new("h1", 4001);
    let (pool, created) = dummy_pool(1);

    let conn = pool.acquire(&h1, Some(1000)).unwrap();
    pool.invalidate(&h1, conn);
    assert_eq!(u32::from(pool.stats().total_connections), 0);

    // The slot is free again, so the next claim establishes a fresh
    // connection.
    let conn = pool.acquire(&h1, Some(1000)).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(u32::from(pool.stats().total_connections), 1);
    pool.release(&h1, conn).unwrap();
}

#[test]
fn failed_establishment_does_not_leak_a_slot() {
    let h1 = Endpoint::new("h1", 4001);
    let options = PoolOptions {
        max_connections_per_endpoint: Some(1),
        log: Some(test_log()),
    };
    let pool = BasicPool::new(options, |_endpoint: &Endpoint| RefusedConnection);

    for _ in 0..3 {
        let result = pool.acquire(&h1, Some(1000));
        assert!(matches!(result, Err(Error::ConnectFailed { .. })));
    }
    // Every failed attempt returned its reserved slot.
    assert_eq!(u32::from(pool.stats().total_connections), 0);
}

#[test]
fn close_drains_idle_connections() {
    let h1 = Endpoint::new("h1", 4001);
    let h2 = Endpoint::new("h2", 4002);
    let (pool, _created) = dummy_pool(2);

    let conn1 = pool.acquire(&h1, Some(1000)).unwrap();
    let conn2 = pool.acquire(&h2, Some(1000)).unwrap();
    pool.release(&h1, conn1).unwrap();
    pool.release(&h2, conn2).unwrap();
    assert_eq!(u32::from(pool.stats().idle_connections), 2);

    pool.close();
    assert_eq!(u32::from(pool.stats().idle_connections), 0);
    assert_eq!(u32::from(pool.stats().total_connections), 0);
}

//! Async usage examples
//!
//! Uses an in-memory provider in place of a real FTP client.
//! Run with `RUST_LOG=esox_sessionpool=debug` to see the pool's events.

use async_trait::async_trait;
use esox_sessionpool::{PoolOptions, SessionConfig, SessionError, SessionPool, SessionProvider};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

struct LoopbackSession {
    number: usize,
    connected: AtomicBool,
}

#[derive(Default)]
struct LoopbackProvider {
    opened: AtomicUsize,
}

#[async_trait]
impl SessionProvider for LoopbackProvider {
    type Session = LoopbackSession;

    async fn connect(&self, server: &str, port: u16) -> Result<LoopbackSession, SessionError> {
        let number = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        println!("   Connecting session #{} to {}:{}", number, server, port);
        sleep(Duration::from_millis(20)).await;
        Ok(LoopbackSession {
            number,
            connected: AtomicBool::new(true),
        })
    }

    async fn authenticate(&self, _: &LoopbackSession, _: &str, _: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn set_transfer_mode(&self, _: &LoopbackSession, _: bool) -> Result<(), SessionError> {
        Ok(())
    }

    async fn probe(&self, session: &LoopbackSession) -> Result<(), SessionError> {
        if session.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::Dead("connection reset".to_string()))
        }
    }

    async fn close(&self, session: &LoopbackSession, graceful: bool) -> Result<(), SessionError> {
        println!("   Closing session #{} (graceful: {})", session.number, graceful);
        session.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self, session: &LoopbackSession) -> bool {
        session.connected.load(Ordering::SeqCst)
    }
}

fn new_pool(max: usize) -> SessionPool<LoopbackProvider> {
    let config = SessionConfig::new("ftp.example.com")
        .with_credentials("deploy", "secret")
        .with_passive(true)
        .with_max_connections(max);
    let options = PoolOptions::new().with_backoff(
        Duration::from_millis(50),
        Duration::from_millis(50),
        Duration::from_millis(500),
    );
    SessionPool::with_options(LoopbackProvider::default(), config, options)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== EsoxSolutions.SessionPool - Async Examples ===\n");

    // Example 1: Acquire and reuse
    acquire_and_reuse().await;

    // Example 2: Concurrent access with a small ceiling
    concurrent_access().await;

    // Example 3: Cancelling a waiting acquire
    cancellation().await;

    // Example 4: Draining with a timeout
    drain_with_timeout().await;
}

async fn acquire_and_reuse() {
    println!("1. Acquire and Reuse:");
    let pool = new_pool(2);

    {
        let session = pool.acquire().await.unwrap();
        println!("   Got session #{}", session.number);
    }

    let session = pool.acquire().await.unwrap();
    println!("   Got session #{} again (reused)", session.number);
    drop(session);

    pool.drain_and_close(0).await;
    println!();
}

async fn concurrent_access() {
    println!("2. Concurrent Access:");
    let pool = new_pool(3);

    let mut handles = vec![];

    for i in 0..8 {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            let session = pool.acquire().await.unwrap();
            println!("   Task {} got session #{}", i, session.number);
            sleep(Duration::from_millis(50)).await;
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let metrics = pool.get_metrics();
    println!(
        "   Created {} sessions for {} acquisitions",
        metrics.sessions_created, metrics.total_acquired
    );
    pool.drain_and_close(-1).await;
    println!();
}

async fn cancellation() {
    println!("3. Cancellation:");
    let pool = new_pool(1);
    let _held = pool.acquire().await.unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    match pool.acquire_with_cancel(&token).await {
        Ok(_) => println!("   Got session"),
        Err(e) => println!("   Error: {}", e),
    }
    println!();
}

async fn drain_with_timeout() {
    println!("4. Drain with Timeout:");
    let pool = new_pool(2);
    let _held = pool.acquire().await.unwrap();
    drop(pool.acquire().await.unwrap());

    let report = pool.drain_and_close(200).await;
    println!(
        "   Clean: {}, closed: {}, forced: {}, waited: {:?}",
        report.completed_cleanly, report.closed, report.forced, report.waited
    );
    println!("   Health after drain: {:?}", pool.get_health_status().warnings);
}

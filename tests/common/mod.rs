#![allow(dead_code)]

use async_trait::async_trait;
use esox_sessionpool::{SessionError, SessionProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory stand-in for an FTP control connection
#[derive(Debug)]
pub struct MockSession {
    pub serial: usize,
    pub server: String,
    pub port: u16,
    pub passive: AtomicBool,
    connected: AtomicBool,
    alive: AtomicBool,
    graceful_closes: AtomicUsize,
    forced_closes: AtomicUsize,
}

impl MockSession {
    /// Make the next probe fail, as if the server dropped the connection
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        !self.connected.load(Ordering::SeqCst)
    }

    pub fn graceful_closes(&self) -> usize {
        self.graceful_closes.load(Ordering::SeqCst)
    }

    pub fn forced_closes(&self) -> usize {
        self.forced_closes.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockProvider {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    pub fail_connect: AtomicBool,
    pub fail_auth: AtomicBool,
    pub fail_mode: AtomicBool,
    pub fail_graceful_close: AtomicBool,
    pub fail_forced_close: AtomicBool,
    connect_delay_ms: AtomicUsize,
    close_delay_ms: AtomicUsize,
    probes: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.connect_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
        self
    }

    pub fn with_close_delay(self, delay: Duration) -> Self {
        self.close_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
        self
    }

    /// Number of sessions ever connected
    pub fn connects(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().iter().filter(|s| !s.is_closed()).count()
    }
}

#[async_trait]
impl SessionProvider for MockProvider {
    type Session = Arc<MockSession>;

    async fn connect(&self, server: &str, port: u16) -> Result<Self::Session, SessionError> {
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SessionError::Connect(format!("{server}:{port} refused")));
        }

        let mut sessions = self.sessions.lock();
        let session = Arc::new(MockSession {
            serial: sessions.len(),
            server: server.to_string(),
            port,
            passive: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            graceful_closes: AtomicUsize::new(0),
            forced_closes: AtomicUsize::new(0),
        });
        sessions.push(Arc::clone(&session));
        Ok(session)
    }

    async fn authenticate(
        &self,
        _session: &Self::Session,
        username: &str,
        _password: &str,
    ) -> Result<(), SessionError> {
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(SessionError::Auth(format!("530 login incorrect for {username}")));
        }
        Ok(())
    }

    async fn set_transfer_mode(&self, session: &Self::Session, passive: bool) -> Result<(), SessionError> {
        if self.fail_mode.load(Ordering::SeqCst) {
            return Err(SessionError::TransferMode("502 PASV not implemented".to_string()));
        }
        session.passive.store(passive, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self, session: &Self::Session) -> Result<(), SessionError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if session.alive.load(Ordering::SeqCst) && !session.is_closed() {
            Ok(())
        } else {
            Err(SessionError::Dead("421 service not available".to_string()))
        }
    }

    async fn close(&self, session: &Self::Session, graceful: bool) -> Result<(), SessionError> {
        let delay = self.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if graceful {
            if self.fail_graceful_close.load(Ordering::SeqCst) {
                return Err(SessionError::Close("QUIT timed out".to_string()));
            }
            session.graceful_closes.fetch_add(1, Ordering::SeqCst);
        } else {
            if self.fail_forced_close.load(Ordering::SeqCst) {
                return Err(SessionError::Close("socket shutdown failed".to_string()));
            }
            session.forced_closes.fetch_add(1, Ordering::SeqCst);
        }
        session.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self, session: &Self::Session) -> bool {
        !session.is_closed()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

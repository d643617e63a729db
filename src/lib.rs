//! # EsoxSolutions.SessionPool
//!
//! Bounded, thread-safe pool of reusable FTP control sessions.
//!
//! ## Features
//!
//! - Sessions created on demand up to a configurable ceiling
//! - Idle sessions reused most-recently-released first, probed before handout
//! - Automatic return of sessions via RAII (Drop trait)
//! - Waiting acquires woken on release, with a capped backoff
//! - Cancellation and timeouts for waiting acquires
//! - Orderly drain with optional timeout, then forced close
//! - Hot-swappable configuration for future sessions
//! - Health monitoring and metrics
//! - Prometheus metrics export
//!
//! Opening, probing and closing individual sessions is delegated to a
//! [`SessionProvider`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use esox_sessionpool::{SessionConfig, SessionPool};
//!
//! let config = SessionConfig::new("ftp.example.com")
//!     .with_credentials("deploy", "secret")
//!     .with_max_connections(4);
//! let pool = SessionPool::new(MyFtpProvider::default(), config);
//!
//! {
//!     let session = pool.acquire().await?;
//!     session.upload("report.csv").await?;
//!     // Session automatically returned when `session` goes out of scope
//! }
//!
//! pool.drain_and_close(5_000).await;
//! ```

mod pool;
mod config;
mod provider;
mod metrics;
mod health;
mod errors;

pub use pool::{DrainReport, DrainTimeout, PooledSession, SessionPool};
pub use config::{DEFAULT_FTP_PORT, DrainPolicy, PoolOptions, SessionConfig};
pub use provider::SessionProvider;
pub use metrics::PoolMetrics;
#[cfg(feature = "prometheus")]
pub use metrics::MetricsExporter;
pub use health::HealthStatus;
pub use errors::{PoolError, PoolResult, SessionError};

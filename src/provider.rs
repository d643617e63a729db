//! The collaborator that opens, checks and closes individual sessions

use crate::config::SessionConfig;
use crate::errors::SessionError;
use async_trait::async_trait;

/// Opens, probes and closes sessions on behalf of the pool.
///
/// Every per-session method takes a shared reference: the pool keeps its own
/// reference to a checked-out session so that a drain can close it, which
/// means sessions use interior mutability for their connection state.
/// None of these methods are called while the pool's lock is held.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    /// Open a control connection to `server:port`
    async fn connect(&self, server: &str, port: u16) -> Result<Self::Session, SessionError>;

    async fn authenticate(
        &self,
        session: &Self::Session,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError>;

    async fn set_transfer_mode(&self, session: &Self::Session, passive: bool) -> Result<(), SessionError>;

    /// Cheap side-effect-free round trip, `Err` means the session is dead
    async fn probe(&self, session: &Self::Session) -> Result<(), SessionError>;

    /// Close the session, negotiating with the server when `graceful`
    async fn close(&self, session: &Self::Session, graceful: bool) -> Result<(), SessionError>;

    fn is_connected(&self, session: &Self::Session) -> bool;
}

/// Run the full creation sequence: connect, log in, set the transfer mode.
///
/// A session that was opened but failed a later step is closed before the
/// error is returned.
pub(crate) async fn open_session<P: SessionProvider>(
    provider: &P,
    config: &SessionConfig,
) -> Result<P::Session, SessionError> {
    let session = provider.connect(&config.server, config.effective_port()).await?;

    let setup = async {
        provider
            .authenticate(&session, &config.username, &config.password)
            .await?;
        provider.set_transfer_mode(&session, config.passive).await
    };

    match setup.await {
        Ok(()) => Ok(session),
        Err(err) => {
            close_session(provider, &session).await;
            Err(err)
        }
    }
}

/// Best-effort close: graceful first, forced if that fails and the session
/// still reports connected. Returns `false` when even the forced close
/// failed; the error is logged, never propagated.
pub(crate) async fn close_session<P: SessionProvider>(provider: &P, session: &P::Session) -> bool {
    if !provider.is_connected(session) {
        return true;
    }

    match provider.close(session, true).await {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(error = %err, "Graceful close failed, forcing");
            if !provider.is_connected(session) {
                return true;
            }
            match provider.close(session, false).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "Forced close failed, abandoning session");
                    false
                }
            }
        }
    }
}

//! Listener and session registry
//!
//! Single accept loop; each accepted stream runs its own session task. The
//! registry tracks live sessions so shutdown can stop accepting and then
//! wait for them to finish naturally - sessions are never force-killed,
//! clients are expected to send Terminate or close.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pgbridge_common::config::ProxyOptions;
use pgbridge_common::Result;

use super::rewrite::QueryRewriter;
use super::session::Session;
use crate::executor::QueryExecutor;

/// Live-session bookkeeping shared between the accept loop and shutdown.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashSet<i32>>,
    drained: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: i32) {
        self.sessions.lock().insert(id);
    }

    pub fn deregister(&self, id: i32) {
        let mut sessions = self.sessions.lock();
        sessions.remove(&id);
        if sessions.is_empty() {
            self.drained.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Wait until every registered session has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// The proxy server: options, rewrite pipeline, executor handle, and the
/// accept loop state.
pub struct ProxyServer {
    options: Arc<ProxyOptions>,
    rewriter: Arc<QueryRewriter>,
    executor: Arc<dyn QueryExecutor>,
    registry: Arc<SessionRegistry>,
    next_id: AtomicI32,
    shutdown: CancellationToken,
}

impl ProxyServer {
    pub fn new(options: ProxyOptions, executor: Arc<dyn QueryExecutor>) -> Result<Self> {
        let rewriter = Arc::new(QueryRewriter::from_options(&options)?);
        Ok(Self {
            options: Arc::new(options),
            rewriter,
            executor,
            registry: Arc::new(SessionRegistry::new()),
            next_id: AtomicI32::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until shutdown, then wait for live sessions to
    /// finish.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(port = self.options.port, "server started");
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("listener stopping, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((socket, peer)) => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    debug!(conn = id, %peer, "accepted connection");
                    configure_tcp_keepalive(&socket);
                    self.spawn_session(id, socket);
                }
                Err(e) => {
                    // The accept call returning an error is the normal path
                    // when the socket is closed during shutdown.
                    info!("accept failed: {e}");
                    break;
                }
            }
        }
        drop(listener);
        if !self.registry.is_empty() {
            info!(live = self.registry.len(), "waiting for sessions to finish");
        }
        self.registry.wait_idle().await;
        info!("server stopped");
        Ok(())
    }

    fn spawn_session(&self, id: i32, socket: TcpStream) {
        let options = self.options.clone();
        let rewriter = self.rewriter.clone();
        let executor = self.executor.clone();
        let registry = self.registry.clone();
        registry.register(id);
        tokio::spawn(async move {
            let session = Session::new(socket, id, options, rewriter, executor);
            if let Err(e) = session.run().await {
                error!(conn = id, "session error: {e}");
            } else {
                debug!(conn = id, "session closed");
            }
            registry.deregister(id);
        });
    }
}

/// TCP_NODELAY plus keepalive so dead clients are noticed instead of pinning
/// a session forever.
fn configure_tcp_keepalive(stream: &TcpStream) {
    use socket2::SockRef;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {e}");
    }

    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_keepalive(true) {
        warn!("failed to enable TCP keepalive: {e}");
        return;
    }
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(16));
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("failed to configure TCP keepalive timing: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_wait_idle_returns_when_empty() {
        let registry = SessionRegistry::new();
        registry.wait_idle().await;
    }

    #[tokio::test]
    async fn test_registry_tracks_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        registry.register(1);
        registry.register(2);
        assert_eq!(registry.len(), 2);

        let waiter = registry.clone();
        let handle = tokio::spawn(async move { waiter.wait_idle().await });
        registry.deregister(1);
        assert!(!handle.is_finished());
        registry.deregister(2);
        handle.await.unwrap();
    }
}

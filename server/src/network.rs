//! Connection acceptor and supervisor
//!
//! [`Server`] binds the listener once and accepts forever, giving each socket
//! its own session task. [`run_supervised`] sits outside it: when a server
//! fails, it waits and builds a new one from nothing.

use crate::config::ServerConfig;
use crate::dispatch::DispatchTable;
use crate::error::ServerError;
use crate::handlers::HandlerContext;
use crate::registry::ServerRegistry;
use crate::session::{run_session, Session, SessionId};
use crate::store::UserStore;
use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Back-to-back accept failures of an unrecognised kind tolerated before the
/// listener is declared dead.
const MAX_ACCEPT_FAILURES: u32 = 50;

/// Decides whether a failed `accept` is retried or ends the server.
#[derive(Debug, Default)]
struct AcceptFailures {
    consecutive: u32,
}

impl AcceptFailures {
    /// Failures tied to one incoming connection leave the listener usable.
    fn is_per_connection(e: &io::Error) -> bool {
        matches!(
            e.kind(),
            io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
        )
    }

    /// Returns the error back once the listener should be given up on.
    /// Other kinds (descriptor exhaustion among them) are retried until they
    /// repeat `MAX_ACCEPT_FAILURES` times in a row.
    fn record(&mut self, e: io::Error) -> Result<(), io::Error> {
        if Self::is_per_connection(&e) {
            return Ok(());
        }
        self.consecutive += 1;
        if self.consecutive >= MAX_ACCEPT_FAILURES {
            Err(e)
        } else {
            Ok(())
        }
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<HandlerContext>,
    max_pending_updates: usize,
}

impl Server {
    /// Binds the listener and builds fresh server state.
    pub async fn bind(config: &ServerConfig, store: Arc<dyn UserStore>) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
        info!("Server listening on {}", addr);

        let ctx = HandlerContext {
            registry: Arc::new(ServerRegistry::new(config.port_range())),
            dispatch: Arc::new(DispatchTable::standard()),
            store,
            timeout: config.timeout(),
        };

        Ok(Server {
            listener,
            ctx: Arc::new(ctx),
            max_pending_updates: config.max_pending_updates,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Listener)
    }

    pub fn registry(&self) -> Arc<ServerRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    /// Accepts connections until the listener itself becomes unusable.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Waiting for clients...");
        let mut failures = AcceptFailures::default();

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => {
                    failures.reset();
                    accepted
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    failures.record(e).map_err(ServerError::Listener)?;
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Could not disable Nagle for {}: {}", addr, e);
            }

            let session = Arc::new(Session::new(SessionId::new(), addr, self.max_pending_updates));
            info!("{} is connecting (session {})", addr, session.id());
            self.ctx.registry.register(Arc::clone(&session)).await;

            tokio::spawn(run_session(session, stream, Arc::clone(&self.ctx)));
        }
    }
}

/// Runs the server forever, rebuilding it from fresh state after a delay
/// whenever it fails.
pub async fn run_supervised(config: ServerConfig, store: Arc<dyn UserStore>) {
    loop {
        let result = match Server::bind(&config, Arc::clone(&store)).await {
            Ok(server) => server.run().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => error!("Server stopped unexpectedly"),
            Err(e) => error!("Server crashed: {}", e),
        }

        tokio::time::sleep(config.restart_delay()).await;
        info!("Server is now restarting...");
    }
}

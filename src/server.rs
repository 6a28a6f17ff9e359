//! TCP server and its builder.
//!
//! The [`ServerBuilder`] collects the capability surface, the executor and
//! the timing knobs. The [`Server`] accepts connections until told to stop;
//! each connection gets its own task, tables and registry, and its failure
//! never reaches the listener.
//!
//! # Example
//!
//! ```ignore
//! use hostwire::{CapabilitySurface, Server};
//! use hostwire::config::DispatchMode;
//!
//! #[tokio::main]
//! async fn main() -> hostwire::Result<()> {
//!     let surface = CapabilitySurface::builder()
//!         .operation("Echo", |(s,): (String,)| Ok(s))
//!         .build()?;
//!
//!     Server::builder()
//!         .capabilities(surface)
//!         .mode(DispatchMode::Polling)
//!         .bind()
//!         .await?
//!         .serve()
//!         .await
//! }
//! ```

use std::future::{self, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::capability::CapabilitySurface;
use crate::config::{DispatchMode, ServerConfig};
use crate::dispatcher::{Dispatcher, PollOutcome};
use crate::error::Result;
use crate::executor::{Executor, InlineExecutor};

/// Pause after a failed accept, so a persistent failure such as running out
/// of file descriptors does not spin the listener.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Builder for configuring and binding a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    surface: Option<CapabilitySurface>,
    executor: Option<Arc<dyn Executor>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            surface: None,
            executor: None,
        }
    }

    /// Replace every setting with those from `config`.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Operations exposed to clients.
    ///
    /// Default: only the built-in session operations.
    pub fn capabilities(mut self, surface: CapabilitySurface) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Where host operations run.
    ///
    /// Default: [`InlineExecutor`]
    pub fn executor(mut self, executor: impl Executor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Share one executor between several servers.
    pub fn shared_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Default: 127.0.0.1:11000
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Default: [`DispatchMode::Blocking`]
    pub fn mode(mut self, mode: DispatchMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Quiet period that ends a resync.
    ///
    /// Default: 5 ms
    pub fn resync_idle(mut self, idle: Duration) -> Self {
        self.config.resync_idle_ms = as_millis(idle);
        self
    }

    /// Hard bound on one resync.
    ///
    /// Default: 1 second
    pub fn resync_limit(mut self, limit: Duration) -> Self {
        self.config.resync_limit_ms = as_millis(limit);
        self
    }

    /// Wait for an id in polling mode.
    ///
    /// Default: 20 ms
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout_ms = as_millis(timeout);
        self
    }

    /// Pause after an idle poll in polling mode.
    ///
    /// Default: 10 ms
    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.config.idle_backoff_ms = as_millis(backoff);
        self
    }

    /// Bind the listener.
    pub async fn bind(self) -> Result<Server> {
        let surface = match self.surface {
            Some(surface) => surface,
            None => CapabilitySurface::builder().build()?,
        };
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(InlineExecutor) as Arc<dyn Executor>);
        if ignores_batches(self.config.mode, executor.as_ref()) {
            tracing::warn!(
                "Executor has transactions but blocking dispatch never forms batches; \
                 use polling mode for them to run"
            );
        }
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        Ok(Server {
            listener,
            surface: Arc::new(surface),
            executor,
            config: self.config,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn accept_failed(e: io::Error) {
    tracing::error!("Accept failed: {}", e);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Blocking dispatch never calls the batch hooks.
fn ignores_batches(mode: DispatchMode, executor: &dyn Executor) -> bool {
    mode == DispatchMode::Blocking && executor.uses_batches()
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A bound server.
pub struct Server {
    listener: TcpListener,
    surface: Arc<CapabilitySurface>,
    executor: Arc<dyn Executor>,
    config: ServerConfig,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn surface(&self) -> &Arc<CapabilitySurface> {
        &self.surface
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections forever.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already running are not interrupted.
    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!(
            "Listening on {} ({:?} mode, {} operations)",
            self.local_addr()?,
            self.config.mode,
            self.surface.len()
        );
        tracing::debug!("Capabilities: {}", self.surface.describe());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Listener shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => accept_failed(e).await,
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        tracing::info!("Accepted connection from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let (reader, writer) = stream.into_split();
        let dispatcher = Dispatcher::new(
            reader,
            writer,
            self.surface.clone(),
            self.executor.clone(),
            self.config.dispatch(),
        );
        let mode = self.config.mode;
        let backoff = self.config.idle_backoff();

        tokio::spawn(serve_connection(dispatcher, peer, mode, backoff));
    }
}

async fn serve_connection<R, W>(
    mut dispatcher: Dispatcher<R, W>,
    peer: SocketAddr,
    mode: DispatchMode,
    backoff: Duration,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let result = match mode {
        DispatchMode::Blocking => dispatcher.run().await,
        DispatchMode::Polling => poll_until_closed(&mut dispatcher, backoff).await,
    };

    let stats = dispatcher.stats();
    match result {
        Ok(()) => tracing::info!(
            "Connection from {} closed ({} operations, {} errors, {} resyncs)",
            peer,
            stats.executed,
            stats.errors,
            stats.resyncs
        ),
        Err(e) if e.is_disconnect() => tracing::info!(
            "Connection from {} dropped after {} operations: {}",
            peer,
            stats.executed,
            e
        ),
        Err(e) => tracing::error!(
            "Connection from {} failed after {} operations: {}",
            peer,
            stats.executed,
            e
        ),
    }
}

async fn poll_until_closed<R, W>(dispatcher: &mut Dispatcher<R, W>, backoff: Duration) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        match dispatcher.poll().await? {
            PollOutcome::Closed => return Ok(()),
            PollOutcome::Executed(_) => {}
            PollOutcome::Idle if backoff.is_zero() => tokio::task::yield_now().await,
            PollOutcome::Idle => tokio::time::sleep(backoff).await,
        }
    }
}

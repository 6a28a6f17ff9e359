//! Dispatcher - the per-connection state machine.
//!
//! ```text
//!            read id                    flush
//! AwaitingId -------> Executing(id) ---------> AwaitingId
//!     |                   |
//!     | end of stream     | unknown name / id out of range
//!     v                   v
//!   Closed            Resyncing --drain--> reply -1 --> AwaitingId
//! ```
//!
//! The stream has no message framing. When the two sides disagree about
//! what the next bytes mean, the dispatcher stops interpreting input for a
//! short, bounded window and discards whatever arrives, then starts over.
//!
//! Two drive modes exist:
//!
//! - [`Dispatcher::run`] blocks on each id read until the connection ends
//! - [`Dispatcher::poll`] waits at most `poll_timeout` for an id and then
//!   keeps executing until input goes quiet, as one batch

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::capability::CapabilitySurface;
use crate::codec::{diagnostic, PolledId, LENGTH_ERROR};
use crate::connection::Connection;
use crate::error::{HostwireError, Result};
use crate::executor::Executor;
use crate::registry::{Operation, BIND_NOT_FOUND};

/// Default quiet period that ends a resync.
pub const DEFAULT_RESYNC_IDLE: Duration = Duration::from_millis(5);

/// Default upper bound on one resync.
pub const DEFAULT_RESYNC_LIMIT: Duration = Duration::from_secs(1);

/// Default wait for an id in poll mode.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Timing knobs for one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// A resync ends once no byte arrives for this long.
    pub resync_idle: Duration,
    /// A resync ends after this long even if bytes keep arriving.
    pub resync_limit: Duration,
    /// How long one poll waits for an id.
    pub poll_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            resync_idle: DEFAULT_RESYNC_IDLE,
            resync_limit: DEFAULT_RESYNC_LIMIT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Where the dispatcher is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    AwaitingId,
    Executing(i32),
    Resyncing,
    Closed,
}

/// Result of one [`Dispatcher::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No id arrived in time.
    Idle,
    /// The peer closed the connection.
    Closed,
    /// A batch of this many operations ran.
    Executed(usize),
}

/// Counters kept over a connection's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Operations run, bind included.
    pub executed: u64,
    /// Operations that answered with an error sentinel.
    pub errors: u64,
    /// Times input was drained to recover framing.
    pub resyncs: u64,
}

/// Drives one connection.
pub struct Dispatcher<R, W> {
    conn: Connection<R, W>,
    config: DispatchConfig,
    state: DispatchState,
    stats: DispatchStats,
}

impl<R, W> Dispatcher<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        reader: R,
        writer: W,
        surface: Arc<CapabilitySurface>,
        executor: Arc<dyn Executor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            conn: Connection::new(reader, writer, surface, executor),
            config,
            state: DispatchState::AwaitingId,
            stats: DispatchStats::default(),
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn connection(&self) -> &Connection<R, W> {
        &self.conn
    }

    /// Serve requests until the peer disconnects.
    ///
    /// A clean close between two requests returns `Ok`; any stream fault
    /// ends the connection with an error.
    pub async fn run(&mut self) -> Result<()> {
        while self.step().await? {}
        Ok(())
    }

    /// Wait for one id and execute it.
    ///
    /// Returns `false` once the peer has closed the connection.
    pub async fn step(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let result = self.step_once().await;
        self.settle(result)
    }

    /// Wait up to `poll_timeout` for an id and run a batch if one arrives.
    ///
    /// The batch continues while ids keep arriving within `poll_timeout` of
    /// each other. It is bracketed by the executor's batch hooks; the end
    /// hook runs even if the batch stops on a stream fault.
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        if self.state == DispatchState::Closed {
            return Ok(PollOutcome::Closed);
        }
        let result = self.poll_once().await;
        self.settle(result)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == DispatchState::Closed {
            return Err(HostwireError::ConnectionClosed);
        }
        Ok(())
    }

    async fn step_once(&mut self) -> Result<bool> {
        match self.conn.reader.read_op_id().await? {
            None => {
                self.state = DispatchState::Closed;
                Ok(false)
            }
            Some(id) => {
                self.execute(id).await?;
                Ok(true)
            }
        }
    }

    async fn poll_once(&mut self) -> Result<PollOutcome> {
        let first = match self.conn.reader.poll_op_id(self.config.poll_timeout).await? {
            PolledId::Pending => return Ok(PollOutcome::Idle),
            PolledId::Closed => {
                self.state = DispatchState::Closed;
                return Ok(PollOutcome::Closed);
            }
            PolledId::Id(id) => id,
        };

        let executor = self.conn.executor.clone();
        executor.begin_batch().await?;
        let batch = self.run_batch(first).await;
        let ended = executor.end_batch().await;

        let executed = batch?;
        ended?;
        tracing::debug!("Batch of {} operations done", executed);
        Ok(PollOutcome::Executed(executed))
    }

    /// Run `first`, then every id arriving within the poll timeout.
    async fn run_batch(&mut self, first: i32) -> Result<usize> {
        self.execute(first).await?;
        let mut executed = 1;
        loop {
            match self.conn.reader.poll_op_id(self.config.poll_timeout).await? {
                PolledId::Id(id) => self.execute(id).await?,
                PolledId::Pending => return Ok(executed),
                PolledId::Closed => {
                    self.state = DispatchState::Closed;
                    return Ok(executed);
                }
            }
            executed += 1;
        }
    }

    /// Any error leaves the connection unusable.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = DispatchState::Closed;
        }
        result
    }

    /// Run the operation with the given id and flush its reply.
    async fn execute(&mut self, id: i32) -> Result<()> {
        self.state = DispatchState::Executing(id);

        match self.conn.registry.get(id).cloned() {
            None => {
                let len = self.conn.registry.len();
                tracing::warn!("Operation id {} out of range (registry has {})", id, len);
                self.resync().await?;
                self.reply_failure(
                    LENGTH_ERROR,
                    anyhow::anyhow!("operation id {} out of range, {} bound", id, len),
                );
            }
            Some(Operation::Bind) => {
                let name = self.conn.reader.read_string().await?;
                match self.conn.registry.bind(&name) {
                    Some(bound) => {
                        tracing::debug!("Bound '{}' to id {}", name, bound);
                        self.conn.writer.put_i32(bound);
                    }
                    None => {
                        tracing::warn!("Cannot bind unknown operation '{}'", name);
                        self.resync().await?;
                        self.reply_failure(
                            BIND_NOT_FOUND,
                            anyhow::anyhow!("no operation named '{}'", name),
                        );
                    }
                }
                self.stats.executed += 1;
            }
            Some(Operation::Bound(cap)) => {
                if !self.conn.invoke(&cap).await? {
                    self.stats.errors += 1;
                }
                self.stats.executed += 1;
            }
        }

        self.conn.writer.flush().await?;
        self.state = DispatchState::AwaitingId;
        Ok(())
    }

    fn reply_failure(&mut self, sentinel: i32, err: anyhow::Error) {
        self.stats.errors += 1;
        self.conn.writer.put_i32(sentinel);
        self.conn.writer.put_string(&diagnostic(&err));
    }

    /// Discard input until the peer goes quiet, bounded by the config.
    async fn resync(&mut self) -> Result<()> {
        self.state = DispatchState::Resyncing;
        let dropped = self
            .conn
            .reader
            .drain(self.config.resync_idle, self.config.resync_limit)
            .await?;
        self.stats.resyncs += 1;
        tracing::debug!("Resync discarded {} bytes", dropped);
        Ok(())
    }
}

//! Where host operations actually run.
//!
//! Many hosts only allow their object model to be touched from one thread,
//! or want edits grouped into transactions. The dispatcher never calls host
//! code directly: it hands each invocation to an [`Executor`] as a closure
//! and waits for the result.
//!
//! - [`InlineExecutor`]: runs the closure on the connection task
//! - [`HostThread`]: runs every closure on one dedicated OS thread, with
//!   optional [`Transactions`] around batches
//!
//! # Example
//!
//! ```ignore
//! use hostwire::executor::{HostThread, Transactions};
//!
//! struct Undo;
//!
//! impl Transactions for Undo {
//!     fn begin(&mut self) -> anyhow::Result<()> { Ok(()) }
//!     fn commit(&mut self) -> anyhow::Result<()> { Ok(()) }
//! }
//!
//! let executor = HostThread::spawn("scene", Some(Box::new(Undo)))?;
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::thread;

use tokio::sync::{mpsc, oneshot};

use crate::codec::Value;
use crate::error::{HostwireError, Result};

/// Boxed future returned by executors.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One host invocation, parameters already bound.
pub type Job = Box<dyn FnOnce() -> anyhow::Result<Value> + Send>;

/// Runs host invocations on the host's required execution context.
///
/// The outer `Result` fails only when the executor itself is gone; the inner
/// one is the operation's own outcome.
pub trait Executor: Send + Sync + 'static {
    /// Run one job and wait for its result.
    fn execute(&self, job: Job) -> BoxFuture<'_, Result<anyhow::Result<Value>>>;

    /// Called before the first operation of a batch.
    fn begin_batch(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Called after the last operation of a batch.
    fn end_batch(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Whether the batch hooks do anything.
    ///
    /// Only polling dispatch forms batches, so the server warns when an
    /// executor returning `true` is paired with blocking dispatch.
    fn uses_batches(&self) -> bool {
        false
    }
}

/// Host-side transaction hooks, run on the host thread around each batch.
///
/// A batch whose operations partly failed is still committed. There is no
/// rollback.
///
/// Batches only exist in [`DispatchMode::Polling`](crate::DispatchMode).
/// Under blocking dispatch `begin` and `commit` are never called.
pub trait Transactions: Send + 'static {
    fn begin(&mut self) -> anyhow::Result<()>;
    fn commit(&mut self) -> anyhow::Result<()>;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Run a job, turning a panic into an ordinary operation failure.
fn run_job(job: Job) -> anyhow::Result<Value> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "operation panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

/// Runs jobs on the calling task.
///
/// Suitable for hosts whose operations are thread-safe and cheap.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> BoxFuture<'_, Result<anyhow::Result<Value>>> {
        Box::pin(async move { Ok(run_job(job)) })
    }
}

enum Command {
    Run(Job, oneshot::Sender<anyhow::Result<Value>>),
    Begin(oneshot::Sender<()>),
    End(oneshot::Sender<()>),
}

/// Runs every job on one dedicated OS thread.
///
/// Jobs are submitted through a single-slot channel and run strictly one at
/// a time, so any number of connections can share one `HostThread` and the
/// host still sees a single caller. Batches from different connections may
/// overlap; the transaction is opened by the first `begin_batch` and
/// committed by the matching last `end_batch`.
pub struct HostThread {
    tx: mpsc::Sender<Command>,
    transactional: bool,
}

impl HostThread {
    /// Spawn the host thread.
    ///
    /// The thread exits once the `HostThread` is dropped.
    pub fn spawn(name: &str, transactions: Option<Box<dyn Transactions>>) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        let transactional = transactions.is_some();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || host_loop(rx, transactions))?;
        Ok(Self { tx, transactional })
    }

    async fn request(&self, make: impl FnOnce(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| HostwireError::ExecutorGone)?;
        done.await.map_err(|_| HostwireError::ExecutorGone)
    }
}

impl Executor for HostThread {
    fn execute(&self, job: Job) -> BoxFuture<'_, Result<anyhow::Result<Value>>> {
        Box::pin(async move {
            let (reply, result) = oneshot::channel();
            self.tx
                .send(Command::Run(job, reply))
                .await
                .map_err(|_| HostwireError::ExecutorGone)?;
            result.await.map_err(|_| HostwireError::ExecutorGone)
        })
    }

    fn begin_batch(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.request(Command::Begin))
    }

    fn end_batch(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.request(Command::End))
    }

    fn uses_batches(&self) -> bool {
        self.transactional
    }
}

fn host_loop(mut rx: mpsc::Receiver<Command>, mut transactions: Option<Box<dyn Transactions>>) {
    let mut depth: usize = 0;

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Run(job, reply) => {
                let _ = reply.send(run_job(job));
            }
            Command::Begin(reply) => {
                depth += 1;
                if depth == 1 {
                    if let Some(tx) = transactions.as_mut() {
                        if let Err(e) = tx.begin() {
                            tracing::error!("Failed to begin transaction: {:#}", e);
                        }
                    }
                }
                let _ = reply.send(());
            }
            Command::End(reply) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(tx) = transactions.as_mut() {
                        if let Err(e) = tx.commit() {
                            tracing::error!("Failed to commit transaction: {:#}", e);
                        }
                    }
                }
                let _ = reply.send(());
            }
        }
    }
    tracing::debug!("Host thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<&'static str>>>);

    impl Journal {
        fn entries(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Transactions for Journal {
        fn begin(&mut self) -> anyhow::Result<()> {
            self.0.lock().unwrap().push("begin");
            Ok(())
        }

        fn commit(&mut self) -> anyhow::Result<()> {
            self.0.lock().unwrap().push("commit");
            Ok(())
        }
    }

    struct FailingCommit;

    impl Transactions for FailingCommit {
        fn begin(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn commit(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("document locked")
        }
    }

    #[tokio::test]
    async fn test_inline_executor() {
        let result = InlineExecutor
            .execute(Box::new(|| Ok(Value::Int32(7))))
            .await
            .unwrap();
        assert_eq!(result.unwrap(), Value::Int32(7));
    }

    #[tokio::test]
    async fn test_panic_becomes_operation_error() {
        let result = InlineExecutor
            .execute(Box::new(|| -> anyhow::Result<Value> { panic!("bad geometry") }))
            .await
            .unwrap();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("bad geometry"));
    }

    #[test]
    fn test_uses_batches_only_with_transactions() {
        assert!(!InlineExecutor.uses_batches());
        assert!(!HostThread::spawn("host-plain", None).unwrap().uses_batches());
        assert!(HostThread::spawn("host-undo", Some(Box::new(Journal::default())))
            .unwrap()
            .uses_batches());
    }

    #[tokio::test]
    async fn test_host_thread_runs_on_named_thread() {
        let executor = HostThread::spawn("host-main", None).unwrap();
        let result = executor
            .execute(Box::new(|| {
                let name = thread::current().name().unwrap_or_default().to_string();
                Ok(Value::String(name))
            }))
            .await
            .unwrap();

        assert_eq!(result.unwrap(), Value::String("host-main".to_string()));
    }

    #[tokio::test]
    async fn test_host_thread_reports_operation_errors() {
        let executor = HostThread::spawn("host-err", None).unwrap();
        let result = executor
            .execute(Box::new(|| Err(anyhow::anyhow!("no such layer"))))
            .await
            .unwrap();
        assert_eq!(result.unwrap_err().to_string(), "no such layer");

        // Still usable afterwards
        let result = executor
            .execute(Box::new(|| Ok(Value::Unit)))
            .await
            .unwrap();
        assert_eq!(result.unwrap(), Value::Unit);
    }

    #[tokio::test]
    async fn test_transactions_wrap_batches() {
        let journal = Journal::default();
        let executor = HostThread::spawn("host-tx", Some(Box::new(journal.clone()))).unwrap();

        executor.begin_batch().await.unwrap();
        let log = journal.clone();
        executor
            .execute(Box::new(move || {
                log.0.lock().unwrap().push("op");
                Ok(Value::Unit)
            }))
            .await
            .unwrap()
            .unwrap();
        executor.end_batch().await.unwrap();

        assert_eq!(journal.entries(), vec!["begin", "op", "commit"]);
    }

    #[tokio::test]
    async fn test_overlapping_batches_share_one_transaction() {
        let journal = Journal::default();
        let executor = HostThread::spawn("host-nested", Some(Box::new(journal.clone()))).unwrap();

        executor.begin_batch().await.unwrap();
        executor.begin_batch().await.unwrap();
        executor.end_batch().await.unwrap();
        assert_eq!(journal.entries(), vec!["begin"]);

        executor.end_batch().await.unwrap();
        assert_eq!(journal.entries(), vec!["begin", "commit"]);
    }

    #[tokio::test]
    async fn test_failed_commit_is_not_fatal() {
        let executor = HostThread::spawn("host-commit", Some(Box::new(FailingCommit))).unwrap();

        executor.begin_batch().await.unwrap();
        executor.end_batch().await.unwrap();

        let result = executor
            .execute(Box::new(|| Ok(Value::Boolean(true))))
            .await
            .unwrap();
        assert_eq!(result.unwrap(), Value::Boolean(true));
    }
}

//! Per-connection state and the invocation pipeline.
//!
//! A [`Connection`] owns everything one client session needs: the codec
//! halves, the handle tables, the operation registry and the session flags.
//! All of it is dropped together when the session ends.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::capability::{Callable, Capability, CapabilitySurface, SessionFlags};
use crate::codec::{WireReader, WireWriter};
use crate::error::{HostwireError, Result};
use crate::executor::Executor;
use crate::handle::HandleTables;
use crate::registry::OperationRegistry;

/// One client session.
pub struct Connection<R, W> {
    pub(crate) reader: WireReader<R>,
    pub(crate) writer: WireWriter<W>,
    pub(crate) registry: OperationRegistry,
    pub(crate) executor: Arc<dyn Executor>,
    handles: HandleTables,
    flags: SessionFlags,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        reader: R,
        writer: W,
        surface: Arc<CapabilitySurface>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            reader: WireReader::new(reader),
            writer: WireWriter::new(writer),
            handles: HandleTables::with_kinds(surface.kinds()),
            registry: OperationRegistry::new(surface),
            executor,
            flags: SessionFlags::default(),
        }
    }

    pub fn handles(&self) -> &HandleTables {
        &self.handles
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// Decode parameters, run the operation, encode its result.
    ///
    /// Returns `Ok(false)` when the operation itself failed and an error
    /// sentinel was written instead of a result. Decode failures are stream
    /// faults and propagate.
    pub(crate) async fn invoke(&mut self, cap: &Capability) -> Result<bool> {
        let signature = cap.signature();

        let mut args = Vec::with_capacity(signature.params.len());
        for ty in &signature.params {
            args.push(self.reader.decode(ty, &self.handles).await?);
        }

        let result = match cap.callable() {
            Callable::Session(f) => f(&mut self.flags, args),
            Callable::Host(f) => {
                let f = f.clone();
                self.executor.execute(Box::new(move || f(args))).await?
            }
        };

        let failure = match result {
            Ok(value) => {
                match self.writer.encode(
                    &signature.ret,
                    value,
                    &mut self.handles,
                    self.flags.fast_handles,
                ) {
                    Ok(()) => None,
                    // Checked before anything was written or interned.
                    Err(e @ HostwireError::TypeMismatch { .. }) => Some(
                        anyhow::Error::new(e)
                            .context(format!("'{}' returned an invalid value", cap.name())),
                    ),
                    Err(e) => return Err(e),
                }
            }
            Err(e) => Some(e),
        };

        match failure {
            None => Ok(true),
            Some(err) => {
                tracing::debug!("Operation '{}' failed: {:#}", cap.name(), err);
                self.writer.encode_error(&signature.ret, &err);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{HostKind, Signature};
    use crate::codec::{Value, WireType, INT32_ERROR};
    use crate::executor::InlineExecutor;

    struct Layer(String);

    impl HostKind for Layer {
        const KIND: &'static str = "layer";
    }

    fn surface() -> Arc<CapabilitySurface> {
        Arc::new(
            CapabilitySurface::builder()
                .operation("NewLayer", |(name,): (String,)| Ok(Arc::new(Layer(name))))
                .operation("LayerName", |(layer,): (Arc<Layer>,)| Ok(layer.0.clone()))
                .operation("Halve", |(n,): (i32,)| {
                    anyhow::ensure!(n % 2 == 0, "{} is odd", n);
                    Ok(n / 2)
                })
                .operation_raw(
                    "Liar",
                    Signature::new(vec![], WireType::Int32),
                    |_| Ok(Value::String("not a number".to_string())),
                )
                .build()
                .unwrap(),
        )
    }

    fn connection(input: Vec<u8>) -> Connection<std::io::Cursor<Vec<u8>>, Vec<u8>> {
        Connection::new(
            std::io::Cursor::new(input),
            Vec::new(),
            surface(),
            Arc::new(InlineExecutor),
        )
    }

    fn string_bytes(s: &str) -> Vec<u8> {
        let mut bytes = vec![s.len() as u8];
        bytes.extend_from_slice(s.as_bytes());
        bytes
    }

    #[tokio::test]
    async fn test_invoke_interns_result() {
        let mut input = string_bytes("walls");
        input.extend_from_slice(&0i32.to_le_bytes());
        let mut conn = connection(input);
        let surface = surface();

        assert!(conn.invoke(surface.lookup("NewLayer").unwrap()).await.unwrap());
        assert_eq!(conn.writer.pending(), 0i32.to_le_bytes().as_slice());
        assert_eq!(conn.handles().len_of("layer"), 1);

        assert!(conn.invoke(surface.lookup("LayerName").unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_invoke_error_writes_sentinel() {
        let mut conn = connection(3i32.to_le_bytes().to_vec());
        let cap = surface().lookup("Halve").unwrap().clone();

        assert!(!conn.invoke(&cap).await.unwrap());
        let pending = conn.writer.pending();
        assert_eq!(&pending[..4], INT32_ERROR.to_le_bytes().as_slice());
        assert!(pending.len() > 5);
    }

    #[tokio::test]
    async fn test_invoke_wrong_return_type_is_operation_error() {
        let mut conn = connection(Vec::new());
        let cap = surface().lookup("Liar").unwrap().clone();

        assert!(!conn.invoke(&cap).await.unwrap());
        assert_eq!(&conn.writer.pending()[..4], INT32_ERROR.to_le_bytes().as_slice());
    }

    #[tokio::test]
    async fn test_invoke_bad_handle_is_fatal() {
        let mut conn = connection(5i32.to_le_bytes().to_vec());
        let cap = surface().lookup("LayerName").unwrap().clone();

        assert!(matches!(
            conn.invoke(&cap).await,
            Err(HostwireError::HandleOutOfRange { handle: 5, .. })
        ));
        assert!(conn.writer.pending().is_empty());
    }

    #[tokio::test]
    async fn test_failed_call_interns_nothing() {
        let surface = Arc::new(
            CapabilitySurface::builder()
                .operation("Broken", |(): ()| -> anyhow::Result<Arc<Layer>> {
                    anyhow::bail!("layer table locked")
                })
                .build()
                .unwrap(),
        );
        let mut conn = Connection::new(
            std::io::Cursor::new(Vec::new()),
            Vec::new(),
            surface.clone(),
            Arc::new(InlineExecutor),
        );

        assert!(!conn.invoke(surface.lookup("Broken").unwrap()).await.unwrap());
        assert_eq!(conn.handles().len_of("layer"), 0);
    }

    #[tokio::test]
    async fn test_session_operation_updates_flags() {
        let mut conn = connection(vec![1]);
        let cap = surface().lookup("SetFastMode").unwrap().clone();

        assert!(conn.invoke(&cap).await.unwrap());
        assert!(conn.flags().fast_handles);
        assert_eq!(conn.writer.pending(), &[0]);
    }
}

//! # Payload Codec Contract
//!
//! A codec transforms individual serialized payload messages as they stream
//! through the rewriter. The contract is scoped: the pipeline brackets every
//! intercepted call with `init` and `finish` so that codecs can buffer
//! per-request work and perform a single batched external round-trip at the
//! call boundary. Codecs with no lifecycle needs simply keep the default
//! no-op `init`/`finish`.
//!
//! ## Deferred results
//!
//! A `transform` may not be able to produce its output until `finish` has run
//! (the batching codec's inbound direction reads the external store once, at
//! the end of the call). Such codecs return [`Transformed::Deferred`]: a
//! single-assignment future the codec fulfills from `finish`. The rewriter
//! assembles its output only after the scope has finished, so a deferred
//! result is never awaited before it is ready.

pub mod batching;
pub mod store;

use crate::BoxError;
use async_trait::async_trait;
use bytes::Bytes;
use prost_reflect::FieldDescriptor;
use std::fmt;
use thiserror::Error;
use tokio::sync::oneshot;

use batching::StoreError;

/// Which way a payload is travelling through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to upstream: payloads are transformed.
    Outbound,
    /// Upstream to client: payloads are restored.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("outbound"),
            Direction::Inbound => f.write_str("inbound"),
        }
    }
}

/// Per-payload context handed to every codec invocation.
///
/// `field_path` is a human-readable locator (`input[]`,
/// `request.input.header.fields.custom`) codecs may use for conditional
/// policy; it carries no meaning inside the core.
#[derive(Debug, Clone)]
pub struct PayloadContext {
    pub tenant: String,
    pub field_path: String,
    pub field: Option<FieldDescriptor>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec lifecycle violation: {0}")]
    Lifecycle(String),
    #[error("malformed payload message: {0}")]
    MalformedPayload(#[from] prost::DecodeError),
    #[error("externalized payload carries no identifier")]
    MissingIdentifier,
    #[error("external identifier '{0}' not found in store")]
    UnknownIdentifier(String),
    #[error("payload transform was abandoned before resolution")]
    AbandonedPayload,
    #[error("external store error: {0}")]
    Store(#[from] StoreError),
    #[error("codec failure: {0}")]
    Other(BoxError),
}

impl CodecError {
    /// Wraps an arbitrary error from a custom codec implementation.
    pub fn other(error: impl Into<BoxError>) -> Self {
        CodecError::Other(error.into())
    }
}

/// The result of one payload transformation.
#[derive(Debug)]
pub enum Transformed {
    /// The transformed bytes, available immediately.
    Ready(Bytes),
    /// Bytes that will be produced by the codec's `finish`.
    Deferred(Deferred),
}

impl Transformed {
    /// Creates a deferred result pair: the codec keeps the [`DeferredSlot`]
    /// and fulfills it during `finish`; the [`Transformed`] half goes into
    /// the rewriter's output.
    pub fn deferred() -> (DeferredSlot, Transformed) {
        let (tx, rx) = oneshot::channel();
        (DeferredSlot { tx }, Transformed::Deferred(Deferred { rx }))
    }

    /// Waits for the final bytes. Deferred results resolve instantly once the
    /// owning scope has finished; a slot dropped unfulfilled resolves to
    /// [`CodecError::AbandonedPayload`] rather than hanging.
    pub async fn resolve(self) -> Result<Bytes, CodecError> {
        match self {
            Transformed::Ready(bytes) => Ok(bytes),
            Transformed::Deferred(deferred) => match deferred.rx.await {
                Ok(result) => result,
                Err(_) => Err(CodecError::AbandonedPayload),
            },
        }
    }
}

/// The receiving half of a deferred transformation.
#[derive(Debug)]
pub struct Deferred {
    rx: oneshot::Receiver<Result<Bytes, CodecError>>,
}

/// The single-assignment slot a codec fulfills during `finish`.
#[derive(Debug)]
pub struct DeferredSlot {
    tx: oneshot::Sender<Result<Bytes, CodecError>>,
}

impl DeferredSlot {
    pub fn fulfill(self, result: Result<Bytes, CodecError>) {
        // The receiver is dropped if the rewrite already failed; nothing to do.
        let _ = self.tx.send(result);
    }
}

/// A pluggable transformer over individual serialized payload messages.
///
/// For one intercepted call and direction the core guarantees a strictly
/// sequential `init`, zero or more `transform`s in wire order, then exactly
/// one `finish`, invoked even when a `transform` or the rewrite itself
/// failed, so codecs can always release external resources. `transform` is
/// never called after `finish` for the same scope.
#[async_trait]
pub trait PayloadCodec: Send {
    /// Opens a lifecycle scope. Called once per intercepted call, before any
    /// `transform`.
    async fn init(&mut self, _direction: Direction) -> Result<(), CodecError> {
        Ok(())
    }

    /// Transforms one serialized payload message.
    async fn transform(
        &mut self,
        direction: Direction,
        ctx: &PayloadContext,
        payload: Bytes,
    ) -> Result<Transformed, CodecError>;

    /// Closes the scope, flushing any buffered work and fulfilling any
    /// deferred results.
    async fn finish(&mut self, _direction: Direction) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Produces a fresh codec for each intercepted call.
///
/// Per-call state is the critical correctness point of the lifecycle: codec
/// buffers and pending-resolution tables must never be shared across calls.
pub trait CodecFactory: Send + Sync {
    fn create(&self) -> Box<dyn PayloadCodec + Send>;
}

impl<F> CodecFactory for F
where
    F: Fn() -> Box<dyn PayloadCodec + Send> + Send + Sync,
{
    fn create(&self) -> Box<dyn PayloadCodec + Send> {
        self()
    }
}

/// The inline reference codec: payloads pass through unchanged in both
/// directions. Useful for wiring verification and as a strategy for
/// deployments that only want the proxy's screening behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

#[async_trait]
impl PayloadCodec for IdentityCodec {
    async fn transform(
        &mut self,
        _direction: Direction,
        _ctx: &PayloadContext,
        payload: Bytes,
    ) -> Result<Transformed, CodecError> {
        Ok(Transformed::Ready(payload))
    }
}

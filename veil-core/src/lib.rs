//! # Veil Core
//!
//! `veil-core` is the payload-rewriting engine behind the `veil` proxy. It sits
//! between workflow client SDKs and an upstream workflow service and rewrites
//! the payload fields of intercepted gRPC messages in flight, without either
//! side noticing and without ever deserializing the intercepted messages.
//!
//! ## Key Components
//!
//! * **[`descriptor::DescriptorRegistry`]:** loads a compiled protobuf file
//!   descriptor set and resolves `/service/method` paths to request and
//!   response message types.
//! * **[`index::PayloadFieldIndex`]:** precomputed, per message type, which
//!   field numbers carry payloads directly and which reach payloads through
//!   nested submessages. Built once at startup; shared read-only by every call.
//! * **[`rewrite::Rewriter`]:** a streaming wire-format rewriter. It walks
//!   message bytes tag by tag, copies everything uninteresting verbatim, and
//!   hands payload bodies to the installed codec.
//! * **[`codec::PayloadCodec`]:** the pluggable transformer contract, with a
//!   per-call `init`/`transform`/`finish` lifecycle that lets codecs batch
//!   external I/O at request boundaries.
//! * **[`codec::batching::BatchingCodec`]:** the reference codec. It
//!   externalizes payload data to a store behind the
//!   [`codec::batching::ExternalStore`] boundary, one batched write or read
//!   per tenant per call.
//! * **[`intercept::Interceptor`]:** the per-call pipeline: screening,
//!   gRPC frame handling, and driving the rewriter and codec lifecycle in
//!   both directions.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost` and `prost-reflect` so that consumers use
//! compatible versions of the underlying protobuf machinery.

pub mod codec;
pub mod descriptor;
pub mod framing;
pub mod index;
pub mod intercept;
pub mod payload;
pub mod rewrite;

// Re-exports
pub use prost;
pub use prost_reflect;

/// Type alias for the standard boxed error used at codec boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

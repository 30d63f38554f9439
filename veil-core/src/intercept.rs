//! # Interception Pipeline
//!
//! The per-call orchestration layer. For each proxied HTTP/2 request it
//! decides whether the call is eligible for rewriting ([`Interceptor::screen`])
//! and, when it is, drives the frame handling, the rewriter, and the codec
//! lifecycle in each direction.
//!
//! Screening is deliberately forgiving: anything the proxy does not fully
//! understand (a non-gRPC request, an unknown or streaming method, a missing
//! tenant header) passes through untouched rather than failing. Errors only
//! arise once a call has been positively identified for rewriting.

use crate::codec::{CodecError, CodecFactory, Direction, PayloadCodec};
use crate::descriptor::DescriptorRegistry;
use crate::framing::{self, FramingError};
use crate::index::PayloadFieldIndex;
use crate::rewrite::{RewriteError, Rewriter};
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::sync::Arc;
use thiserror::Error;

/// Request header naming the tenant; its absence makes a call passthrough.
pub const TENANT_HEADER: &str = "temporal-namespace";
/// Content-type prefix a request must carry to be considered for rewriting.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

#[derive(Debug, Error)]
pub enum InterceptError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Per-call context: the tenant and the message types in each direction.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub tenant: String,
    pub path: String,
    pub request_type: String,
    pub response_type: String,
}

/// The interception pipeline. One instance serves every call; all per-call
/// state lives in the [`CallContext`] and the codec created for that call.
pub struct Interceptor {
    registry: Arc<DescriptorRegistry>,
    index: Arc<PayloadFieldIndex>,
    codecs: Arc<dyn CodecFactory>,
}

impl Interceptor {
    pub fn new(
        registry: Arc<DescriptorRegistry>,
        index: Arc<PayloadFieldIndex>,
        codecs: Arc<dyn CodecFactory>,
    ) -> Self {
        Self {
            registry,
            index,
            codecs,
        }
    }

    /// Decides whether a request is eligible for rewriting, without reading
    /// its body. Returns `None` (passthrough) unless the request is a gRPC
    /// POST for a known unary method and names a tenant.
    pub fn screen(&self, method: &Method, path: &str, headers: &HeaderMap) -> Option<CallContext> {
        if method != Method::POST {
            return None;
        }
        let content_type = headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?;
        if !content_type.starts_with(GRPC_CONTENT_TYPE) {
            return None;
        }
        let info = self.registry.method_info(path)?;
        if !info.unary {
            tracing::debug!(path, "streaming method, passing through");
            return None;
        }
        let tenant = headers.get(TENANT_HEADER)?.to_str().ok()?;

        Some(CallContext {
            tenant: tenant.to_string(),
            path: path.to_string(),
            request_type: info.request_type,
            response_type: info.response_type,
        })
    }

    /// Rewrites a fully-buffered request body in the outbound direction.
    /// Bodies of request types without payload fields are returned untouched
    /// and the codec is never invoked.
    pub async fn process_request(
        &self,
        call: &CallContext,
        body: Bytes,
    ) -> Result<Bytes, InterceptError> {
        self.process(Direction::Outbound, &call.request_type, call, body)
            .await
    }

    /// Rewrites a fully-buffered response body in the inbound direction.
    pub async fn process_response(
        &self,
        call: &CallContext,
        body: Bytes,
    ) -> Result<Bytes, InterceptError> {
        self.process(Direction::Inbound, &call.response_type, call, body)
            .await
    }

    async fn process(
        &self,
        direction: Direction,
        type_name: &str,
        call: &CallContext,
        body: Bytes,
    ) -> Result<Bytes, InterceptError> {
        if !self.index.message_has_payloads(type_name) {
            return Ok(body);
        }

        let message = framing::decode_frame(body)?;
        let mut codec = self.codecs.create();
        let rewritten = self
            .run_scope(direction, type_name, call, message, codec.as_mut())
            .await?;
        let message = rewritten.into_bytes().await?;
        Ok(framing::encode_frame(&message))
    }

    /// One codec lifecycle scope: `init`, rewrite, `finish`. `finish` runs on
    /// every scope that was opened, including when the rewrite failed; the
    /// rewrite error then takes precedence.
    async fn run_scope(
        &self,
        direction: Direction,
        type_name: &str,
        call: &CallContext,
        message: Bytes,
        codec: &mut (dyn PayloadCodec + Send),
    ) -> Result<crate::rewrite::Rewritten, InterceptError> {
        codec.init(direction).await?;

        let rewriter = Rewriter::new(&self.registry, &self.index);
        let result = rewriter
            .rewrite(direction, type_name, message, &call.tenant, codec)
            .await;
        let finished = codec.finish(direction).await;

        let rewritten = result?;
        finished?;
        Ok(rewritten)
    }
}

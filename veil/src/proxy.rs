//! # Proxy Fabric
//!
//! The HTTP/2 plumbing around the core: a TCP accept loop serving one
//! connection task per client, and a shared upstream client. Calls accepted
//! by the interceptor's screening are buffered and rewritten in both
//! directions; every other request streams through untouched.
//!
//! A failed intercepted call is answered with a trailers-only gRPC error
//! response; it never disturbs other in-flight calls or the process.

use crate::cli::CodecStrategy;
use crate::config::ProxyConfig;
use bytes::Bytes;
use futures_util::stream;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderMap, HeaderValue, Request, Response, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use veil_core::codec::batching::BatchingCodec;
use veil_core::codec::store::MemoryStore;
use veil_core::codec::{CodecFactory, IdentityCodec, PayloadCodec};
use veil_core::descriptor::DescriptorRegistry;
use veil_core::index::PayloadFieldIndex;
use veil_core::intercept::{CallContext, InterceptError, Interceptor};
use veil_core::BoxError;

type ProxyBody = BoxBody<Bytes, BoxError>;

const GRPC_STATUS_INTERNAL: u32 = 13;
const GRPC_STATUS_UNAVAILABLE: u32 = 14;

struct ProxyState {
    interceptor: Interceptor,
    client: Client<HttpConnector, ProxyBody>,
    scheme: Scheme,
    authority: Authority,
}

/// Builds the descriptor state and serves until interrupted.
pub async fn serve(config: ProxyConfig) -> anyhow::Result<()> {
    let registry = DescriptorRegistry::from_file(&config.descriptor_set)?;
    let index = PayloadFieldIndex::build(&registry, &config.index);
    tracing::info!(payload_types = index.len(), "built payload field index");

    let codecs: Arc<dyn CodecFactory> = match config.codec {
        CodecStrategy::Inline => {
            Arc::new(|| Box::new(IdentityCodec) as Box<dyn PayloadCodec + Send>)
        }
        CodecStrategy::Batched => {
            tracing::warn!("batched codec is backed by the in-process store; \
                externalized payloads do not survive a restart");
            let store = Arc::new(MemoryStore::new());
            Arc::new(move || {
                Box::new(BatchingCodec::new(store.clone())) as Box<dyn PayloadCodec + Send>
            })
        }
    };

    let interceptor = Interceptor::new(Arc::new(registry), Arc::new(index), codecs);

    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    let client = Client::builder(TokioExecutor::new())
        .http2_only(true)
        .build(connector);

    // Scheme and authority were validated by the config.
    let parts = config.upstream.clone().into_parts();
    let state = Arc::new(ProxyState {
        interceptor,
        client,
        scheme: parts.scheme.expect("upstream scheme validated"),
        authority: parts.authority.expect("upstream authority validated"),
    });

    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!(listen = %config.listen, upstream = %config.upstream, "veil listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, state.clone()));
                    let connection = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service);
                    if let Err(error) = connection.await {
                        tracing::debug!(%peer, %error, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<ProxyState>,
) -> Result<Response<ProxyBody>, Infallible> {
    let path = req.uri().path().to_string();
    match state
        .interceptor
        .screen(req.method(), &path, req.headers())
    {
        Some(call) => match forward_intercepted(req, &call, &state).await {
            Ok(response) => Ok(response),
            Err(failure) => {
                tracing::warn!(path = %call.path, tenant = %call.tenant,
                    error = %failure.message, "intercepted call failed");
                Ok(grpc_error_response(&failure))
            }
        },
        None => match forward_passthrough(req, &state).await {
            Ok(response) => Ok(response),
            Err(failure) => {
                tracing::warn!(%path, error = %failure.message, "passthrough call failed");
                Ok(grpc_error_response(&failure))
            }
        },
    }
}

struct CallFailure {
    grpc_status: u32,
    message: String,
}

impl From<InterceptError> for CallFailure {
    fn from(error: InterceptError) -> Self {
        Self {
            grpc_status: GRPC_STATUS_INTERNAL,
            message: error.to_string(),
        }
    }
}

impl CallFailure {
    fn unavailable(error: impl std::fmt::Display) -> Self {
        Self {
            grpc_status: GRPC_STATUS_UNAVAILABLE,
            message: error.to_string(),
        }
    }
}

/// Forwards a request without touching its body.
async fn forward_passthrough(
    req: Request<Incoming>,
    state: &ProxyState,
) -> Result<Response<ProxyBody>, CallFailure> {
    let (mut parts, body) = req.into_parts();
    parts.uri = upstream_uri(state, &parts.uri)?;
    let req = Request::from_parts(parts, boxed_incoming(body));

    let response = state
        .client
        .request(req)
        .await
        .map_err(CallFailure::unavailable)?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, boxed_incoming(body)))
}

/// Buffers and rewrites the body in each direction of an intercepted call.
async fn forward_intercepted(
    req: Request<Incoming>,
    call: &CallContext,
    state: &ProxyState,
) -> Result<Response<ProxyBody>, CallFailure> {
    let (mut parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map_err(CallFailure::unavailable)?
        .to_bytes();

    let rewritten = state.interceptor.process_request(call, body).await?;

    parts.uri = upstream_uri(state, &parts.uri)?;
    // The body length may have changed; hyper recomputes it from the sized body.
    parts.headers.remove(http::header::CONTENT_LENGTH);
    let upstream_req = Request::from_parts(parts, full(rewritten));

    let response = state
        .client
        .request(upstream_req)
        .await
        .map_err(CallFailure::unavailable)?;

    let (mut parts, body) = response.into_parts();
    let collected = body.collect().await.map_err(CallFailure::unavailable)?;
    let trailers = collected.trailers().cloned();
    let rewritten = state
        .interceptor
        .process_response(call, collected.to_bytes())
        .await?;

    parts.headers.insert(
        http::header::CONTENT_LENGTH,
        HeaderValue::from(rewritten.len()),
    );
    Ok(Response::from_parts(
        parts,
        body_with_trailers(rewritten, trailers),
    ))
}

fn upstream_uri(state: &ProxyState, original: &Uri) -> Result<Uri, CallFailure> {
    let path_and_query = original
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    Uri::builder()
        .scheme(state.scheme.clone())
        .authority(state.authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(CallFailure::unavailable)
}

fn full(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

fn boxed_incoming(body: Incoming) -> ProxyBody {
    body.map_err(|e| Box::new(e) as BoxError).boxed()
}

fn body_with_trailers(data: Bytes, trailers: Option<HeaderMap>) -> ProxyBody {
    match trailers {
        None => full(data),
        Some(trailers) => {
            let frames = vec![
                Ok::<_, BoxError>(Frame::data(data)),
                Ok(Frame::trailers(trailers)),
            ];
            StreamBody::new(stream::iter(frames)).boxed()
        }
    }
}

fn grpc_error_response(failure: &CallFailure) -> Response<ProxyBody> {
    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/grpc")
        .header("grpc-status", failure.grpc_status.to_string())
        .header("grpc-message", sanitize_grpc_message(&failure.message))
        .body(full(Bytes::new()))
        .expect("static response parts are valid")
}

/// grpc-message must be a valid header value; anything else is replaced.
fn sanitize_grpc_message(message: &str) -> HeaderValue {
    HeaderValue::from_str(message)
        .unwrap_or_else(|_| HeaderValue::from_static("internal proxy error"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_responses_are_trailers_only() {
        let failure = CallFailure {
            grpc_status: GRPC_STATUS_INTERNAL,
            message: "boom".to_string(),
        };
        let response = grpc_error_response(&failure);
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.headers()["grpc-status"], "13");
        assert_eq!(response.headers()["grpc-message"], "boom");
    }

    #[test]
    fn multiline_messages_are_sanitized() {
        let value = sanitize_grpc_message("bad\nmessage");
        assert_eq!(value, "internal proxy error");
    }
}

//! Rewriter output assembly.
//!
//! The walker cannot emit a flat byte stream directly: a deferred codec
//! result has no length until the codec's `finish` has run, and the length
//! prefix of every enclosing submessage depends on it. The walker therefore
//! produces a segment tree; [`Rewritten::into_bytes`] resolves every payload
//! in encounter order, computes lengths bottom-up, and writes the final
//! buffer in one pass.

use crate::codec::{CodecError, Transformed};
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use prost::encoding::{encode_varint, encoded_len_varint};

/// One node of the rewriter's output.
///
/// Tags always live inside `Verbatim` runs; `Payload` and `Nested` carry only
/// the value whose length prefix is recomputed at assembly time.
#[derive(Debug)]
pub(crate) enum Segment {
    /// An untouched run of input bytes, zero-copy.
    Verbatim(Bytes),
    /// A codec result, re-emitted length-delimited.
    Payload(Transformed),
    /// A recursed submessage, re-emitted length-delimited.
    Nested(Vec<Segment>),
}

enum Resolved {
    Verbatim(Bytes),
    Payload(Bytes),
    Nested(Vec<Resolved>, usize),
}

/// The result of one rewrite, assembled after the codec scope finishes.
#[derive(Debug)]
pub struct Rewritten {
    segments: Vec<Segment>,
}

impl Rewritten {
    pub(crate) fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// The fast-path result: input bytes passed through unchanged.
    pub fn verbatim(bytes: Bytes) -> Self {
        Self {
            segments: vec![Segment::Verbatim(bytes)],
        }
    }

    /// Resolves all deferred payloads and assembles the output bytes.
    ///
    /// Must only be called after the owning codec scope has finished; the
    /// lifecycle guarantees every deferred result is complete by then, so
    /// this never blocks on codec work.
    pub async fn into_bytes(self) -> Result<Bytes, CodecError> {
        let (resolved, len) = resolve(self.segments).await?;
        let mut buf = BytesMut::with_capacity(len);
        write_segments(&resolved, &mut buf);
        Ok(buf.freeze())
    }
}

/// Depth-first resolution; returns the segments plus their total encoded
/// length (value lengths include the recomputed length prefixes).
fn resolve(segments: Vec<Segment>) -> BoxFuture<'static, Result<(Vec<Resolved>, usize), CodecError>> {
    Box::pin(async move {
        let mut out = Vec::with_capacity(segments.len());
        let mut total = 0usize;
        for segment in segments {
            let resolved = match segment {
                Segment::Verbatim(bytes) => {
                    total += bytes.len();
                    Resolved::Verbatim(bytes)
                }
                Segment::Payload(transformed) => {
                    let bytes = transformed.resolve().await?;
                    total += encoded_len_varint(bytes.len() as u64) + bytes.len();
                    Resolved::Payload(bytes)
                }
                Segment::Nested(children) => {
                    let (children, inner) = resolve(children).await?;
                    total += encoded_len_varint(inner as u64) + inner;
                    Resolved::Nested(children, inner)
                }
            };
            out.push(resolved);
        }
        Ok((out, total))
    })
}

fn write_segments(segments: &[Resolved], buf: &mut BytesMut) {
    for segment in segments {
        match segment {
            Resolved::Verbatim(bytes) => buf.extend_from_slice(bytes),
            Resolved::Payload(bytes) => {
                encode_varint(bytes.len() as u64, buf);
                buf.extend_from_slice(bytes);
            }
            Resolved::Nested(children, inner) => {
                encode_varint(*inner as u64, buf);
                write_segments(children, buf);
            }
        }
    }
}

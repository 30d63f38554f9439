//! # Wire Rewriter
//!
//! A streaming rewriter over protobuf message bytes. It never materializes
//! the intercepted message: guided by the [`PayloadFieldIndex`], it walks the
//! bytes tag by tag, copies every uninteresting field verbatim (preserving
//! unknown fields, ordering, and repetition exactly), hands payload bodies to
//! the installed codec, and recurses only into submessage fields known to
//! reach payloads.
//!
//! ## How it works
//!
//! 1. **Fast path**: a message type with no payload fields passes through
//!    with zero copies.
//! 2. Otherwise the walker reads a varint tag at each position (a tag of
//!    zero terminates the walk), always preserves the tag bytes, and
//!    dispatches on the field's classification: direct payloads go to the
//!    codec (singular, or entry-by-entry through the repeated wrapper's
//!    sub-walk), transitive fields recurse with the descriptor-recorded
//!    target type, everything else is skipped over by wire kind and stays
//!    inside the current verbatim run.
//! 3. The output is a segment tree ([`Rewritten`]) assembled after the codec
//!    scope finishes, so codecs may defer results to their `finish`.
//!
//! Recursion depth is bounded by the descriptor graph, not the input bytes: a
//! field only recurses because the index recorded a target type for it.

mod output;

pub use output::Rewritten;

use crate::codec::{CodecError, Direction, PayloadCodec, PayloadContext};
use crate::descriptor::DescriptorRegistry;
use crate::index::{PayloadFieldIndex, PayloadShape};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use output::Segment;
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};
use thiserror::Error;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;
const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("varint extends past the end of the buffer")]
    TruncatedVarint,
    #[error("varint exceeds {MAX_VARINT_BYTES} bytes")]
    OversizeVarint,
    #[error("field value of {declared} bytes overruns the remaining {remaining}")]
    TruncatedField { declared: usize, remaining: usize },
    #[error("unsupported wire type {wire_type} on field {field}")]
    UnsupportedWireType { field: u32, wire_type: u8 },
    #[error("field {field} must be length-delimited to be transformed, found wire type {wire_type}")]
    UnexpectedWireType { field: u32, wire_type: u8 },
    #[error("message type '{0}' is not present in the descriptor registry")]
    UnknownMessageType(String),
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("codec failed at '{field_path}': {source}")]
    Codec {
        field_path: String,
        #[source]
        source: CodecError,
    },
}

/// Streaming payload rewriter over one message type.
pub struct Rewriter<'a> {
    registry: &'a DescriptorRegistry,
    index: &'a PayloadFieldIndex,
}

impl<'a> Rewriter<'a> {
    pub fn new(registry: &'a DescriptorRegistry, index: &'a PayloadFieldIndex) -> Self {
        Self { registry, index }
    }

    /// Rewrites `message` (the raw bytes of a `type_name` message), passing
    /// every payload through `codec` in the given direction.
    ///
    /// The returned [`Rewritten`] must be assembled with
    /// [`Rewritten::into_bytes`] only after the codec scope has finished.
    pub async fn rewrite(
        &self,
        direction: Direction,
        type_name: &str,
        message: Bytes,
        tenant: &str,
        codec: &mut (dyn PayloadCodec + Send),
    ) -> Result<Rewritten, RewriteError> {
        if !self.index.message_has_payloads(type_name) {
            return Ok(Rewritten::verbatim(message));
        }
        let descriptor = self
            .registry
            .message_by_name(type_name)
            .ok_or_else(|| WireError::UnknownMessageType(type_name.to_string()))?;
        let segments = self
            .walk(direction, descriptor, message, String::new(), tenant, codec)
            .await?;
        Ok(Rewritten::new(segments))
    }

    fn walk<'w>(
        &'w self,
        direction: Direction,
        descriptor: MessageDescriptor,
        input: Bytes,
        prefix: String,
        tenant: &'w str,
        codec: &'w mut (dyn PayloadCodec + Send),
    ) -> BoxFuture<'w, Result<Vec<Segment>, RewriteError>> {
        Box::pin(async move {
            let type_name = descriptor.full_name().to_string();
            let is_map_entry = descriptor.is_map_entry();
            let mut map_key: Option<String> = None;

            let mut segments = Vec::new();
            let mut pos = 0usize;
            let mut run_start = 0usize;

            while pos < input.len() {
                let tag_start = pos;
                let key = read_varint(&input, &mut pos)?;
                if key == 0 {
                    flush_run(&mut segments, &input, run_start, tag_start);
                    return Ok(segments);
                }
                let field_number = (key >> 3) as u32;
                let wire_type = (key & 0x7) as u8;

                if let Some(shape) = self.index.payload_shape(&type_name, field_number) {
                    expect_delimited(field_number, wire_type)?;
                    flush_run(&mut segments, &input, run_start, pos);
                    let body = read_delimited(&input, &mut pos)?;
                    let field = descriptor.get_field(field_number);
                    let segment_name =
                        path_segment(&field, field_number, is_map_entry, &map_key);

                    match shape {
                        PayloadShape::Single => {
                            let ctx = PayloadContext {
                                tenant: tenant.to_string(),
                                field_path: format!("{prefix}{segment_name}"),
                                field,
                            };
                            let transformed = codec
                                .transform(direction, &ctx, body)
                                .await
                                .map_err(|source| RewriteError::Codec {
                                    field_path: ctx.field_path.clone(),
                                    source,
                                })?;
                            segments.push(Segment::Payload(transformed));
                        }
                        PayloadShape::Repeated => {
                            let path = format!("{prefix}{segment_name}[]");
                            let children = self
                                .walk_wrapper(direction, body, path, field, tenant, &mut *codec)
                                .await?;
                            segments.push(Segment::Nested(children));
                        }
                    }
                    run_start = pos;
                } else if let Some(target) = self.index.transitive_target(&type_name, field_number)
                {
                    expect_delimited(field_number, wire_type)?;
                    flush_run(&mut segments, &input, run_start, pos);
                    let body = read_delimited(&input, &mut pos)?;
                    let sub_descriptor = self
                        .registry
                        .message_by_name(target)
                        .ok_or_else(|| WireError::UnknownMessageType(target.to_string()))?;
                    let field = descriptor.get_field(field_number);
                    let segment_name =
                        path_segment(&field, field_number, is_map_entry, &map_key);
                    let sub_prefix = format!("{prefix}{segment_name}.");
                    let children = self
                        .walk(direction, sub_descriptor, body, sub_prefix, tenant, &mut *codec)
                        .await?;
                    segments.push(Segment::Nested(children));
                    run_start = pos;
                } else {
                    let value_start = pos;
                    skip_value(&input, &mut pos, field_number, wire_type)?;
                    if is_map_entry && field_number == 1 && wire_type == WIRE_LEN {
                        map_key = read_map_key(&descriptor, &input, value_start);
                    }
                }
            }

            flush_run(&mut segments, &input, run_start, input.len());
            Ok(segments)
        })
    }

    /// Walks the repeated payload wrapper's bytes, transforming each field-1
    /// entry and copying everything else verbatim. Treating the wrapper at
    /// the byte level preserves the exact entry count and order without ever
    /// parsing the wrapper itself.
    async fn walk_wrapper(
        &self,
        direction: Direction,
        input: Bytes,
        path: String,
        field: Option<FieldDescriptor>,
        tenant: &str,
        codec: &mut (dyn PayloadCodec + Send),
    ) -> Result<Vec<Segment>, RewriteError> {
        let mut segments = Vec::new();
        let mut pos = 0usize;
        let mut run_start = 0usize;

        while pos < input.len() {
            let tag_start = pos;
            let key = read_varint(&input, &mut pos)?;
            if key == 0 {
                flush_run(&mut segments, &input, run_start, tag_start);
                return Ok(segments);
            }
            let field_number = (key >> 3) as u32;
            let wire_type = (key & 0x7) as u8;

            if field_number == 1 && wire_type == WIRE_LEN {
                flush_run(&mut segments, &input, run_start, pos);
                let body = read_delimited(&input, &mut pos)?;
                let ctx = PayloadContext {
                    tenant: tenant.to_string(),
                    field_path: path.clone(),
                    field: field.clone(),
                };
                let transformed = codec
                    .transform(direction, &ctx, body)
                    .await
                    .map_err(|source| RewriteError::Codec {
                        field_path: ctx.field_path.clone(),
                        source,
                    })?;
                segments.push(Segment::Payload(transformed));
                run_start = pos;
            } else {
                skip_value(&input, &mut pos, field_number, wire_type)?;
            }
        }

        flush_run(&mut segments, &input, run_start, input.len());
        Ok(segments)
    }
}

fn flush_run(segments: &mut Vec<Segment>, input: &Bytes, start: usize, end: usize) {
    if start < end {
        segments.push(Segment::Verbatim(input.slice(start..end)));
    }
}

/// The path segment for a field: its declared name, or the captured map key
/// in place of a map entry's literal `value`.
fn path_segment(
    field: &Option<FieldDescriptor>,
    field_number: u32,
    is_map_entry: bool,
    map_key: &Option<String>,
) -> String {
    if is_map_entry && field_number == 2 {
        if let Some(key) = map_key {
            return key.clone();
        }
    }
    match field {
        Some(field) => field.name().to_string(),
        None => field_number.to_string(),
    }
}

/// Best-effort capture of a string map key at `start` (the first byte of the
/// key's length prefix). Serializers write the key before the value, so the
/// key is normally available by the time the value field is reached.
fn read_map_key(descriptor: &MessageDescriptor, input: &Bytes, start: usize) -> Option<String> {
    let key_field = descriptor.get_field(1)?;
    if !matches!(key_field.kind(), Kind::String) {
        return None;
    }
    let mut pos = start;
    let body = read_delimited(input, &mut pos).ok()?;
    std::str::from_utf8(&body).ok().map(str::to_string)
}

fn read_varint(input: &Bytes, pos: &mut usize) -> Result<u64, WireError> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_BYTES {
        let Some(&byte) = input.get(*pos + i) else {
            return Err(WireError::TruncatedVarint);
        };
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            *pos += i + 1;
            return Ok(value);
        }
    }
    Err(WireError::OversizeVarint)
}

fn read_delimited(input: &Bytes, pos: &mut usize) -> Result<Bytes, WireError> {
    let len = read_varint(input, pos)? as usize;
    let remaining = input.len() - *pos;
    if len > remaining {
        return Err(WireError::TruncatedField {
            declared: len,
            remaining,
        });
    }
    let body = input.slice(*pos..*pos + len);
    *pos += len;
    Ok(body)
}

fn skip_fixed(input: &Bytes, pos: &mut usize, width: usize) -> Result<(), WireError> {
    let remaining = input.len() - *pos;
    if width > remaining {
        return Err(WireError::TruncatedField {
            declared: width,
            remaining,
        });
    }
    *pos += width;
    Ok(())
}

fn skip_value(
    input: &Bytes,
    pos: &mut usize,
    field_number: u32,
    wire_type: u8,
) -> Result<(), WireError> {
    match wire_type {
        WIRE_VARINT => read_varint(input, pos).map(|_| ()),
        WIRE_FIXED64 => skip_fixed(input, pos, 8),
        WIRE_LEN => read_delimited(input, pos).map(|_| ()),
        WIRE_FIXED32 => skip_fixed(input, pos, 4),
        other => Err(WireError::UnsupportedWireType {
            field: field_number,
            wire_type: other,
        }),
    }
}

fn expect_delimited(field_number: u32, wire_type: u8) -> Result<(), WireError> {
    if wire_type == WIRE_LEN {
        Ok(())
    } else {
        Err(WireError::UnexpectedWireType {
            field: field_number,
            wire_type,
        })
    }
}

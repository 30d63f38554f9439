//! # Payload Wire Shapes
//!
//! Hand-written `prost` messages mirroring the two sentinel payload types on
//! the wire (`temporal.api.common.v1.Payload` and `.Payloads`). The core only
//! ever parses these two shapes; every other intercepted message stays raw
//! bytes. Keeping the structs here instead of generating them keeps the build
//! free of protoc and service codegen the proxy has no use for.

use std::collections::HashMap;

/// A single payload: opaque data plus a small string-to-bytes metadata map.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payload {
    #[prost(map = "string, bytes", tag = "1")]
    pub metadata: HashMap<String, Vec<u8>>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// The repeated wrapper: a message whose only field is a repeated [`Payload`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payloads {
    #[prost(message, repeated, tag = "1")]
    pub payloads: Vec<Payload>,
}

/// Metadata key carrying the payload's encoding.
pub const METADATA_ENCODING: &str = "encoding";
/// Metadata key holding the encoding a payload had before it was externalized.
pub const METADATA_ENCODING_ORIGINAL: &str = "encoding-original";
/// Metadata key holding the identifier of an externalized payload's data.
pub const METADATA_EXTERNAL_ID: &str = "external-id";
/// Encoding value marking a payload whose data lives in the external store.
pub const ENCODING_EXTERNAL: &[u8] = b"binary/external";
/// Bytes left in the `data` field of an externalized payload.
pub const EXTERNAL_DATA_PLACEHOLDER: &[u8] = b"external";

impl Payload {
    /// The payload's `encoding` metadata value, if present.
    pub fn encoding(&self) -> Option<&[u8]> {
        self.metadata.get(METADATA_ENCODING).map(Vec::as_slice)
    }

    /// Whether this payload's data has been moved to the external store.
    pub fn is_externalized(&self) -> bool {
        self.encoding() == Some(ENCODING_EXTERNAL)
    }
}

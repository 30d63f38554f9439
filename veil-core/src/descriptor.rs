//! # Descriptor Registry
//!
//! This module handles the loading and querying of Protobuf `FileDescriptorSet`s.
//! It acts as a database of schema definitions, allowing the proxy to resolve
//! intercepted request paths into the message types flowing in each direction.
//!
//! The registry is built once at startup and is immutable afterwards, so it can
//! be shared freely across every in-flight call.

use prost_reflect::{DescriptorPool, MessageDescriptor};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DescriptorLoadError {
    #[error("Failed to read descriptor file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode descriptor set: {0}")]
    Decode(#[from] prost_reflect::DescriptorError),
}

/// The request and response message types of a service method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMethodInfo {
    /// Fully-qualified request message type.
    pub request_type: String,
    /// Fully-qualified response message type.
    pub response_type: String,
    /// False when the method declares client or server streaming. The proxy
    /// only rewrites unary calls; streaming calls pass through untouched.
    pub unary: bool,
}

/// A registry holding loaded Protobuf definitions, with lookups by method
/// path and by message name.
#[derive(Debug)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
}

impl DescriptorRegistry {
    /// Decodes a `FileDescriptorSet` from a byte slice and builds the registry.
    ///
    /// The pool build validates the dependency graph: a file whose declared
    /// dependencies cannot be resolved fails the load. Re-loading from the
    /// same bytes always yields an equivalent registry.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorLoadError> {
        let pool = DescriptorPool::decode(bytes)?;
        Ok(Self { pool })
    }

    /// Loads a `FileDescriptorSet` from a file on disk and builds the registry.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DescriptorLoadError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Resolves a request path (`"/package.Service/Method"`, with or without
    /// the leading slash) into its [`ServiceMethodInfo`].
    ///
    /// Returns `None` for any path that does not name a known method: a
    /// malformed path, an unknown service, or an unknown method. A miss is a
    /// passthrough condition for the proxy, never an error.
    pub fn method_info(&self, path: &str) -> Option<ServiceMethodInfo> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let (service_name, method_name) = path.split_once('/')?;
        if service_name.is_empty() || method_name.is_empty() || method_name.contains('/') {
            return None;
        }

        let service = self.pool.get_service_by_name(service_name)?;
        let method = service.methods().find(|m| m.name() == method_name)?;

        Some(ServiceMethodInfo {
            request_type: method.input().full_name().to_string(),
            response_type: method.output().full_name().to_string(),
            unary: !method.is_client_streaming() && !method.is_server_streaming(),
        })
    }

    /// Looks up a message descriptor by its fully-qualified name.
    pub fn message_by_name(&self, name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(name)
    }

    /// The underlying descriptor pool, used for index construction.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

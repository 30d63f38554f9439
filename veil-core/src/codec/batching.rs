//! # Batching Codec
//!
//! The reference [`PayloadCodec`]: payload data is externalized to a store
//! behind the [`ExternalStore`] boundary, with all external I/O batched at the
//! call boundary.
//!
//! ## How it works
//!
//! * **Outbound**: each `transform` parses the payload, mints a fresh
//!   identifier, buffers the record, and immediately returns a placeholder
//!   payload whose metadata records the identifier and the original encoding.
//!   `finish` issues one batched store write per tenant.
//! * **Inbound**: each `transform` over an externalized payload registers a
//!   pending entry and returns a deferred result. `finish` issues one batched
//!   store read per tenant and fulfills every pending entry, either with the
//!   rebuilt payload or with an error when the identifier is unknown.
//!
//! A codec instance belongs to exactly one call; the scope state machine
//! (`Idle -> Open -> Idle`) turns any cross-call or out-of-order use into a
//! lifecycle error instead of silent corruption.

use crate::codec::{
    CodecError, DeferredSlot, Direction, PayloadCodec, PayloadContext, Transformed,
};
use crate::payload::{
    Payload, ENCODING_EXTERNAL, EXTERNAL_DATA_PLACEHOLDER, METADATA_ENCODING,
    METADATA_ENCODING_ORIGINAL, METADATA_EXTERNAL_ID,
};
use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),
    #[error("store rejected batch: {0}")]
    Rejected(String),
}

/// One externalized payload record.
#[derive(Debug, Clone)]
pub struct StoreRecord {
    pub id: String,
    pub data: Bytes,
    pub metadata: HashMap<String, Vec<u8>>,
}

/// The external blob store boundary. Concrete implementations (object
/// storage, KMS-backed vaults, ...) live outside the core; see
/// [`crate::codec::store::MemoryStore`] for the in-process one.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    /// Persists a batch of records for one tenant.
    async fn write_batch(&self, tenant: &str, records: Vec<StoreRecord>) -> Result<(), StoreError>;

    /// Fetches the data bytes for a batch of identifiers of one tenant.
    /// Unknown identifiers are simply absent from the result.
    async fn read_batch(
        &self,
        tenant: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Bytes>, StoreError>;
}

struct PendingWrite {
    tenant: String,
    record: StoreRecord,
}

struct PendingRead {
    tenant: String,
    id: String,
    shell: Payload,
    slot: DeferredSlot,
}

enum Scope {
    Idle,
    Outbound(Vec<PendingWrite>),
    Inbound(Vec<PendingRead>),
}

/// Scoped codec that batches one store round-trip per tenant per call.
pub struct BatchingCodec<S> {
    store: Arc<S>,
    scope: Scope,
}

impl<S: ExternalStore> BatchingCodec<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            scope: Scope::Idle,
        }
    }

    fn transform_outbound(&mut self, ctx: &PayloadContext, payload: Bytes) -> Result<Transformed, CodecError> {
        let Scope::Outbound(buffer) = &mut self.scope else {
            return Err(CodecError::Lifecycle(
                "outbound transform outside an open outbound scope".to_string(),
            ));
        };

        let mut shell = Payload::decode(payload.as_ref())?;
        let id = Uuid::new_v4().to_string();
        buffer.push(PendingWrite {
            tenant: ctx.tenant.clone(),
            record: StoreRecord {
                id: id.clone(),
                data: Bytes::from(std::mem::take(&mut shell.data)),
                metadata: shell.metadata.clone(),
            },
        });

        if let Some(original) = shell.metadata.remove(METADATA_ENCODING) {
            shell
                .metadata
                .insert(METADATA_ENCODING_ORIGINAL.to_string(), original);
        }
        shell
            .metadata
            .insert(METADATA_ENCODING.to_string(), ENCODING_EXTERNAL.to_vec());
        shell
            .metadata
            .insert(METADATA_EXTERNAL_ID.to_string(), id.into_bytes());
        shell.data = EXTERNAL_DATA_PLACEHOLDER.to_vec();

        Ok(Transformed::Ready(Bytes::from(shell.encode_to_vec())))
    }

    fn transform_inbound(&mut self, ctx: &PayloadContext, payload: Bytes) -> Result<Transformed, CodecError> {
        let Scope::Inbound(pending) = &mut self.scope else {
            return Err(CodecError::Lifecycle(
                "inbound transform outside an open inbound scope".to_string(),
            ));
        };

        let shell = Payload::decode(payload.as_ref())?;
        if !shell.is_externalized() {
            // Not ours; other codecs' output and plain payloads pass through.
            return Ok(Transformed::Ready(payload));
        }

        let id = shell
            .metadata
            .get(METADATA_EXTERNAL_ID)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .ok_or(CodecError::MissingIdentifier)?
            .to_string();

        let (slot, transformed) = Transformed::deferred();
        pending.push(PendingRead {
            tenant: ctx.tenant.clone(),
            id,
            shell,
            slot,
        });
        Ok(transformed)
    }

    async fn finish_outbound(&self, buffer: Vec<PendingWrite>) -> Result<(), CodecError> {
        let mut by_tenant: HashMap<String, Vec<StoreRecord>> = HashMap::new();
        for write in buffer {
            by_tenant.entry(write.tenant).or_default().push(write.record);
        }
        for (tenant, records) in by_tenant {
            self.store.write_batch(&tenant, records).await?;
        }
        Ok(())
    }

    async fn finish_inbound(&self, pending: Vec<PendingRead>) -> Result<(), CodecError> {
        let mut by_tenant: HashMap<String, Vec<PendingRead>> = HashMap::new();
        for read in pending {
            by_tenant.entry(read.tenant.clone()).or_default().push(read);
        }

        for (tenant, reads) in by_tenant {
            let ids: Vec<String> = reads.iter().map(|r| r.id.clone()).collect();
            // A failed batch read drops this tenant's slots, which resolves
            // their futures; the scope error below fails the call first.
            let fetched = self.store.read_batch(&tenant, &ids).await?;
            for read in reads {
                let result = match fetched.get(&read.id) {
                    Some(data) => Ok(restore_payload(read.shell, data.clone())),
                    None => Err(CodecError::UnknownIdentifier(read.id)),
                };
                read.slot.fulfill(result);
            }
        }
        Ok(())
    }
}

fn restore_payload(mut shell: Payload, data: Bytes) -> Bytes {
    shell.metadata.remove(METADATA_EXTERNAL_ID);
    shell.metadata.remove(METADATA_ENCODING);
    if let Some(original) = shell.metadata.remove(METADATA_ENCODING_ORIGINAL) {
        shell.metadata.insert(METADATA_ENCODING.to_string(), original);
    }
    shell.data = data.to_vec();
    Bytes::from(shell.encode_to_vec())
}

#[async_trait]
impl<S: ExternalStore> PayloadCodec for BatchingCodec<S> {
    async fn init(&mut self, direction: Direction) -> Result<(), CodecError> {
        if !matches!(self.scope, Scope::Idle) {
            return Err(CodecError::Lifecycle(format!(
                "init({direction}) while a scope is already open"
            )));
        }
        self.scope = match direction {
            Direction::Outbound => Scope::Outbound(Vec::new()),
            Direction::Inbound => Scope::Inbound(Vec::new()),
        };
        Ok(())
    }

    async fn transform(
        &mut self,
        direction: Direction,
        ctx: &PayloadContext,
        payload: Bytes,
    ) -> Result<Transformed, CodecError> {
        match direction {
            Direction::Outbound => self.transform_outbound(ctx, payload),
            Direction::Inbound => self.transform_inbound(ctx, payload),
        }
    }

    async fn finish(&mut self, direction: Direction) -> Result<(), CodecError> {
        match (std::mem::replace(&mut self.scope, Scope::Idle), direction) {
            (Scope::Outbound(buffer), Direction::Outbound) => self.finish_outbound(buffer).await,
            (Scope::Inbound(pending), Direction::Inbound) => self.finish_inbound(pending).await,
            (Scope::Idle, _) => Err(CodecError::Lifecycle(format!(
                "finish({direction}) without a matching init"
            ))),
            (_, _) => Err(CodecError::Lifecycle(format!(
                "finish({direction}) does not match the open scope"
            ))),
        }
    }
}

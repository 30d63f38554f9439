//! Shared test fixtures: a Temporal-shaped descriptor set built in code (no
//! protoc involved), message-building helpers, and a recording codec.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use prost_reflect::{DynamicMessage, MapKey, Value};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet, MessageOptions,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use veil_core::codec::{
    CodecError, Direction, PayloadCodec, PayloadContext, Transformed,
};
use veil_core::descriptor::DescriptorRegistry;
use veil_core::index::{IndexConfig, PayloadFieldIndex};
use veil_core::rewrite::Rewriter;

pub const COMMON: &str = "temporal.api.common.v1";
pub const UPDATE: &str = "temporal.api.update.v1";
pub const WORKFLOW_SERVICE: &str = "temporal.api.workflowservice.v1";

// --- Descriptor set construction ---

pub fn descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![common_file(), update_file(), workflow_service_file(), vendor_file()],
    }
}

pub fn registry() -> DescriptorRegistry {
    DescriptorRegistry::from_bytes(&descriptor_set().encode_to_vec())
        .expect("fixture descriptor set must load")
}

pub fn index_default(registry: &DescriptorRegistry) -> PayloadFieldIndex {
    PayloadFieldIndex::build(registry, &IndexConfig::default())
}

pub fn index_with_search_attributes(registry: &DescriptorRegistry) -> PayloadFieldIndex {
    PayloadFieldIndex::build(
        registry,
        &IndexConfig {
            exclude_search_attributes: false,
            ..IndexConfig::default()
        },
    )
}

fn common_file() -> FileDescriptorProto {
    let payload = DescriptorProto {
        name: Some("Payload".to_string()),
        field: vec![
            map_field("metadata", 1, ".temporal.api.common.v1.Payload.MetadataEntry"),
            scalar_field("data", 2, Type::Bytes),
        ],
        nested_type: vec![map_entry("MetadataEntry", scalar_field("value", 2, Type::Bytes))],
        ..Default::default()
    };

    let payloads = DescriptorProto {
        name: Some("Payloads".to_string()),
        field: vec![repeated_message_field(
            "payloads",
            1,
            ".temporal.api.common.v1.Payload",
        )],
        ..Default::default()
    };

    let header = payload_map_message("Header", "fields");
    let memo = payload_map_message("Memo", "fields");
    let search_attributes = payload_map_message("SearchAttributes", "indexed_fields");

    // Recursive shapes: one that reaches a payload through itself, one that
    // never reaches a payload at all.
    let payload_chain = DescriptorProto {
        name: Some("PayloadChain".to_string()),
        field: vec![
            message_field("next", 1, ".temporal.api.common.v1.PayloadChain"),
            message_field("value", 2, ".temporal.api.common.v1.Payload"),
        ],
        ..Default::default()
    };
    let linked_node = DescriptorProto {
        name: Some("LinkedNode".to_string()),
        field: vec![
            message_field("next", 1, ".temporal.api.common.v1.LinkedNode"),
            scalar_field("name", 2, Type::String),
        ],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("temporal/api/common/v1/message.proto".to_string()),
        package: Some(COMMON.to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![
            payload,
            payloads,
            header,
            memo,
            search_attributes,
            payload_chain,
            linked_node,
        ],
        ..Default::default()
    }
}

fn update_file() -> FileDescriptorProto {
    let input = DescriptorProto {
        name: Some("Input".to_string()),
        field: vec![
            message_field("header", 1, ".temporal.api.common.v1.Header"),
            message_field("args", 2, ".temporal.api.common.v1.Payloads"),
            scalar_field("name", 3, Type::String),
        ],
        ..Default::default()
    };
    let request = DescriptorProto {
        name: Some("Request".to_string()),
        field: vec![message_field("input", 2, ".temporal.api.update.v1.Input")],
        ..Default::default()
    };
    let outcome = DescriptorProto {
        name: Some("Outcome".to_string()),
        field: vec![message_field(
            "success",
            1,
            ".temporal.api.common.v1.Payloads",
        )],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("temporal/api/update/v1/message.proto".to_string()),
        package: Some(UPDATE.to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec!["temporal/api/common/v1/message.proto".to_string()],
        message_type: vec![input, request, outcome],
        ..Default::default()
    }
}

fn workflow_service_file() -> FileDescriptorProto {
    let start_request = DescriptorProto {
        name: Some("StartWorkflowExecutionRequest".to_string()),
        field: vec![
            scalar_field("workflow_id", 1, Type::String),
            message_field("input", 4, ".temporal.api.common.v1.Payloads"),
            message_field("header", 5, ".temporal.api.common.v1.Header"),
            message_field(
                "search_attributes",
                6,
                ".temporal.api.common.v1.SearchAttributes",
            ),
            message_field("memo", 7, ".temporal.api.common.v1.Memo"),
        ],
        ..Default::default()
    };
    let start_response = DescriptorProto {
        name: Some("StartWorkflowExecutionResponse".to_string()),
        field: vec![scalar_field("run_id", 1, Type::String)],
        ..Default::default()
    };

    let update_request = DescriptorProto {
        name: Some("UpdateWorkflowExecutionRequest".to_string()),
        field: vec![
            scalar_field("first_execution_run_id", 1, Type::String),
            message_field("request", 2, ".temporal.api.update.v1.Request"),
        ],
        ..Default::default()
    };
    let update_response = DescriptorProto {
        name: Some("UpdateWorkflowExecutionResponse".to_string()),
        field: vec![message_field("outcome", 2, ".temporal.api.update.v1.Outcome")],
        ..Default::default()
    };

    let query_request = DescriptorProto {
        name: Some("QueryWorkflowRequest".to_string()),
        field: vec![
            scalar_field("query_type", 1, Type::String),
            message_field("query_args", 2, ".temporal.api.common.v1.Payloads"),
        ],
        ..Default::default()
    };
    let query_response = DescriptorProto {
        name: Some("QueryWorkflowResponse".to_string()),
        field: vec![message_field(
            "query_result",
            1,
            ".temporal.api.common.v1.Payloads",
        )],
        ..Default::default()
    };

    let upsert_request = DescriptorProto {
        name: Some("UpsertSearchAttributesRequest".to_string()),
        field: vec![
            scalar_field("workflow_id", 1, Type::String),
            message_field(
                "search_attributes",
                2,
                ".temporal.api.common.v1.SearchAttributes",
            ),
        ],
        ..Default::default()
    };
    let upsert_response = DescriptorProto {
        name: Some("UpsertSearchAttributesResponse".to_string()),
        ..Default::default()
    };

    let info_request = DescriptorProto {
        name: Some("GetSystemInfoRequest".to_string()),
        ..Default::default()
    };
    let info_response = DescriptorProto {
        name: Some("GetSystemInfoResponse".to_string()),
        field: vec![scalar_field("server_version", 1, Type::String)],
        ..Default::default()
    };

    let service = ServiceDescriptorProto {
        name: Some("WorkflowService".to_string()),
        method: vec![
            method("StartWorkflowExecution", "StartWorkflowExecutionRequest", "StartWorkflowExecutionResponse", false),
            method("UpdateWorkflowExecution", "UpdateWorkflowExecutionRequest", "UpdateWorkflowExecutionResponse", false),
            method("QueryWorkflow", "QueryWorkflowRequest", "QueryWorkflowResponse", false),
            method("UpsertSearchAttributes", "UpsertSearchAttributesRequest", "UpsertSearchAttributesResponse", false),
            method("GetSystemInfo", "GetSystemInfoRequest", "GetSystemInfoResponse", false),
            method("StreamExecutionEvents", "QueryWorkflowRequest", "QueryWorkflowResponse", true),
        ],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("temporal/api/workflowservice/v1/service.proto".to_string()),
        package: Some(WORKFLOW_SERVICE.to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec![
            "temporal/api/common/v1/message.proto".to_string(),
            "temporal/api/update/v1/message.proto".to_string(),
        ],
        message_type: vec![
            start_request,
            start_response,
            update_request,
            update_response,
            query_request,
            query_response,
            upsert_request,
            upsert_response,
            info_request,
            info_response,
        ],
        service: vec![service],
        ..Default::default()
    }
}

/// A package outside the scan prefix; visible for lookups, never indexed.
fn vendor_file() -> FileDescriptorProto {
    let envelope = DescriptorProto {
        name: Some("ExternalEnvelope".to_string()),
        field: vec![message_field(
            "payload",
            1,
            ".temporal.api.common.v1.Payload",
        )],
        ..Default::default()
    };
    FileDescriptorProto {
        name: Some("vendor/ext/v1/envelope.proto".to_string()),
        package: Some("vendor.ext.v1".to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec!["temporal/api/common/v1/message.proto".to_string()],
        message_type: vec![envelope],
        ..Default::default()
    }
}

fn method(
    name: &str,
    input: &str,
    output: &str,
    server_streaming: bool,
) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".{WORKFLOW_SERVICE}.{input}")),
        output_type: Some(format!(".{WORKFLOW_SERVICE}.{output}")),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

pub fn scalar_field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

pub fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::Message as i32),
        type_name: Some(type_name.to_string()),
        ..Default::default()
    }
}

pub fn repeated_message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated as i32),
        ..message_field(name, number, type_name)
    }
}

fn map_field(name: &str, number: i32, entry_type: &str) -> FieldDescriptorProto {
    repeated_message_field(name, number, entry_type)
}

fn map_entry(name: &str, value: FieldDescriptorProto) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: vec![scalar_field("key", 1, Type::String), value],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A message holding one `map<string, Payload>` field.
fn payload_map_message(name: &str, field_name: &str) -> DescriptorProto {
    let entry_name = "ValuesEntry";
    DescriptorProto {
        name: Some(name.to_string()),
        field: vec![map_field(
            field_name,
            1,
            &format!(".{COMMON}.{name}.{entry_name}"),
        )],
        nested_type: vec![map_entry(
            entry_name,
            message_field("value", 2, &format!(".{COMMON}.Payload")),
        )],
        ..Default::default()
    }
}

// --- Dynamic message helpers ---

pub fn payload_value(registry: &DescriptorRegistry, encoding: &str, data: &[u8]) -> Value {
    let descriptor = registry
        .message_by_name("temporal.api.common.v1.Payload")
        .expect("Payload descriptor");
    let mut message = DynamicMessage::new(descriptor);
    let mut metadata = HashMap::new();
    metadata.insert(
        MapKey::String("encoding".to_string()),
        Value::Bytes(Bytes::copy_from_slice(encoding.as_bytes())),
    );
    message.set_field_by_name("metadata", Value::Map(metadata));
    message.set_field_by_name("data", Value::Bytes(Bytes::copy_from_slice(data)));
    Value::Message(message)
}

pub fn payloads_value(registry: &DescriptorRegistry, items: Vec<Value>) -> Value {
    let descriptor = registry
        .message_by_name("temporal.api.common.v1.Payloads")
        .expect("Payloads descriptor");
    let mut message = DynamicMessage::new(descriptor);
    message.set_field_by_name("payloads", Value::List(items));
    Value::Message(message)
}

pub fn new_message(registry: &DescriptorRegistry, type_name: &str) -> DynamicMessage {
    DynamicMessage::new(
        registry
            .message_by_name(type_name)
            .unwrap_or_else(|| panic!("descriptor for {type_name}")),
    )
}

pub fn decode_message(registry: &DescriptorRegistry, type_name: &str, bytes: &[u8]) -> DynamicMessage {
    DynamicMessage::decode(
        registry
            .message_by_name(type_name)
            .unwrap_or_else(|| panic!("descriptor for {type_name}")),
        bytes,
    )
    .expect("output must stay decodable")
}

// --- Raw wire helpers for hand-crafted inputs ---

pub fn varint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn tag(field: u32, wire_type: u8) -> Vec<u8> {
    varint(u64::from(field) << 3 | u64::from(wire_type))
}

pub fn delimited_field(field: u32, body: &[u8]) -> Vec<u8> {
    let mut out = tag(field, 2);
    out.extend(varint(body.len() as u64));
    out.extend_from_slice(body);
    out
}

pub fn varint_field(field: u32, value: u64) -> Vec<u8> {
    let mut out = tag(field, 0);
    out.extend(varint(value));
    out
}

// --- Recording codec ---

/// Identity-behaving codec that records every lifecycle event and transform
/// path, and can be told to fail its transforms.
pub struct RecordingCodec {
    pub events: Arc<Mutex<Vec<String>>>,
    pub fail_transforms: bool,
}

impl RecordingCodec {
    pub fn new(events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            events,
            fail_transforms: false,
        }
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl PayloadCodec for RecordingCodec {
    async fn init(&mut self, direction: Direction) -> Result<(), CodecError> {
        self.record(format!("init:{direction}"));
        Ok(())
    }

    async fn transform(
        &mut self,
        direction: Direction,
        ctx: &PayloadContext,
        payload: Bytes,
    ) -> Result<Transformed, CodecError> {
        self.record(format!("transform:{direction}:{}", ctx.field_path));
        if self.fail_transforms {
            return Err(CodecError::Lifecycle("injected failure".to_string()));
        }
        Ok(Transformed::Ready(payload))
    }

    async fn finish(&mut self, direction: Direction) -> Result<(), CodecError> {
        self.record(format!("finish:{direction}"));
        Ok(())
    }
}

// --- Rewrite drivers ---

/// Runs one full codec scope around a rewrite and assembles the result.
pub async fn rewrite_scoped(
    registry: &DescriptorRegistry,
    index: &PayloadFieldIndex,
    codec: &mut (dyn PayloadCodec + Send),
    direction: Direction,
    type_name: &str,
    message: Bytes,
    tenant: &str,
) -> Bytes {
    codec.init(direction).await.expect("init");
    let rewriter = Rewriter::new(registry, index);
    let rewritten = rewriter
        .rewrite(direction, type_name, message, tenant, codec)
        .await
        .expect("rewrite");
    codec.finish(direction).await.expect("finish");
    rewritten.into_bytes().await.expect("assemble")
}

//! # Payload Field Index
//!
//! A precomputed map of where payloads live inside every message type the
//! proxy may intercept. The index is what lets the rewriter walk message bytes
//! without deserializing them: for each `(message type, field number)` pair it
//! answers, in constant time, "is this a payload?", "does something below this
//! reach a payload?", and "which type do I recurse with?".
//!
//! ## Classification
//!
//! Construction scans every message (nested ones included) of every file whose
//! package starts with the configured prefix. A field is **direct** when its
//! message type is one of the two sentinel payload types; **transitive** when
//! it is a submessage (or group) whose descendant graph contains at least one
//! direct payload field. Reachability is computed with a visited set, so
//! recursive message graphs terminate: a type already on the stack contributes
//! `false` to its own subquery.
//!
//! Search attributes are special: they are indexed server-side and must reach
//! the upstream untransformed, so by default the
//! `temporal.api.common.v1.SearchAttributes` container (and everything nested
//! in it) is treated as payload-free. [`IndexConfig::exclude_search_attributes`]
//! turns that suppression off.

use crate::descriptor::DescriptorRegistry;
use prost_reflect::{Kind, MessageDescriptor};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Fully-qualified name of the singular sentinel payload type.
pub const PAYLOAD_MESSAGE: &str = "temporal.api.common.v1.Payload";
/// Fully-qualified name of the repeated payload wrapper type.
pub const PAYLOADS_MESSAGE: &str = "temporal.api.common.v1.Payloads";
/// Fully-qualified name of the search attributes container.
pub const SEARCH_ATTRIBUTES_MESSAGE: &str = "temporal.api.common.v1.SearchAttributes";

/// Whether a direct payload field holds a single payload or the repeated
/// wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Single,
    Repeated,
}

/// Index construction settings.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Only messages in packages starting with this prefix are scanned.
    /// Other packages are still available for method lookup.
    pub scan_package_prefix: String,
    /// Treat the search attributes container as payload-free.
    pub exclude_search_attributes: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            scan_package_prefix: "temporal.api.".to_string(),
            exclude_search_attributes: true,
        }
    }
}

#[derive(Debug, Default)]
struct MessageEntry {
    /// field number -> shape of the directly-held payload
    direct: HashMap<u32, PayloadShape>,
    /// field number -> fully-qualified type to recurse with
    transitive: HashMap<u32, String>,
}

/// Read-only payload location index, built once at startup.
#[derive(Debug)]
pub struct PayloadFieldIndex {
    entries: HashMap<String, MessageEntry>,
}

impl PayloadFieldIndex {
    /// Walks the registry and classifies every field of every scanned message.
    pub fn build(registry: &DescriptorRegistry, config: &IndexConfig) -> Self {
        let mut entries: HashMap<String, MessageEntry> = HashMap::new();

        for file in registry.pool().files() {
            if !file.package_name().starts_with(&config.scan_package_prefix) {
                continue;
            }
            let mut stack: Vec<MessageDescriptor> = file.messages().collect();
            while let Some(message) = stack.pop() {
                stack.extend(message.child_messages());
                if is_excluded(config, message.full_name()) {
                    continue;
                }

                let mut entry = MessageEntry::default();
                for field in message.fields() {
                    let Kind::Message(target) = field.kind() else {
                        continue;
                    };
                    match target.full_name() {
                        PAYLOAD_MESSAGE => {
                            entry.direct.insert(field.number(), PayloadShape::Single);
                        }
                        PAYLOADS_MESSAGE => {
                            entry.direct.insert(field.number(), PayloadShape::Repeated);
                        }
                        name => {
                            let mut visited = HashSet::new();
                            if reaches_payload(config, &target, &mut visited) {
                                entry.transitive.insert(field.number(), name.to_string());
                            }
                        }
                    }
                }

                if !entry.direct.is_empty() || !entry.transitive.is_empty() {
                    entries.insert(message.full_name().to_string(), entry);
                }
            }
        }

        Self { entries }
    }

    /// Whether any field of `message` carries a payload, directly or
    /// transitively. The rewriter's fast path: a `false` here means the
    /// message bytes pass through verbatim.
    pub fn message_has_payloads(&self, message: &str) -> bool {
        self.entries.contains_key(message)
    }

    /// Whether `(message, field)` holds a payload directly.
    pub fn is_payload_field(&self, message: &str, field: u32) -> bool {
        self.payload_shape(message, field).is_some()
    }

    /// The shape of the payload directly held at `(message, field)`.
    pub fn payload_shape(&self, message: &str, field: u32) -> Option<PayloadShape> {
        self.entries.get(message)?.direct.get(&field).copied()
    }

    /// Whether `(message, field)` is a submessage reaching payloads below it.
    pub fn has_transitive_payloads(&self, message: &str, field: u32) -> bool {
        self.transitive_target(message, field).is_some()
    }

    /// The submessage type to recurse into for a transitive field.
    pub fn transitive_target(&self, message: &str, field: u32) -> Option<&str> {
        self.entries
            .get(message)?
            .transitive
            .get(&field)
            .map(String::as_str)
    }

    /// Every field number of `message` the rewriter will touch.
    pub fn transformable_field_numbers(&self, message: &str) -> BTreeSet<u32> {
        match self.entries.get(message) {
            Some(entry) => entry
                .direct
                .keys()
                .chain(entry.transitive.keys())
                .copied()
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Number of payload-bearing message types in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the payload-bearing message type names.
    pub fn payload_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn is_excluded(config: &IndexConfig, message: &str) -> bool {
    config.exclude_search_attributes
        && message
            .strip_prefix(SEARCH_ATTRIBUTES_MESSAGE)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// Whether `message`'s descendant graph contains a direct payload field.
///
/// The visited set breaks cycles: a type currently under exploration answers
/// `false` for itself, which is correct because direct edges are recorded
/// separately by the caller.
fn reaches_payload(
    config: &IndexConfig,
    message: &MessageDescriptor,
    visited: &mut HashSet<String>,
) -> bool {
    if is_excluded(config, message.full_name()) {
        return false;
    }
    if !visited.insert(message.full_name().to_string()) {
        return false;
    }
    for field in message.fields() {
        if let Kind::Message(target) = field.kind() {
            match target.full_name() {
                PAYLOAD_MESSAGE | PAYLOADS_MESSAGE => return true,
                _ => {
                    if reaches_payload(config, &target, visited) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

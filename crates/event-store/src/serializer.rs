//! Payload serialization for store backends.
//!
//! The repository core never touches bytes; store backends convert payloads
//! to and from [`SerializedObject`]s through a [`SerializerRegistry`]. The
//! registry is an explicit, caller-supplied ordered provider list resolved
//! first-match-wins, with a JSON default always appended last. The
//! `revision` tag enables external upcasting before payloads reach the
//! repository; the upgrade transformations themselves live outside this
//! workspace.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Type descriptor of a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializedType {
    /// The payload type name (e.g. "OrderCreated").
    pub name: String,

    /// Schema revision of the payload, if the type is versioned.
    pub revision: Option<String>,
}

impl SerializedType {
    /// Creates a type descriptor.
    pub fn new(name: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            name: name.into(),
            revision,
        }
    }
}

impl std::fmt::Display for SerializedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.revision {
            Some(revision) => write!(f, "{} (rev {})", self.name, revision),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A payload converted to bytes, together with its type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedObject {
    /// Describes what the bytes contain.
    pub serialized_type: SerializedType,

    /// The serialized payload.
    pub data: Vec<u8>,
}

/// Converts payload values to and from byte sequences.
pub trait Serializer: Send + Sync {
    /// Returns whether this serializer can handle the given type.
    fn handles(&self, serialized_type: &SerializedType) -> bool;

    /// Serializes `payload` under the given type descriptor.
    fn serialize(
        &self,
        serialized_type: &SerializedType,
        payload: &serde_json::Value,
    ) -> Result<SerializedObject>;

    /// Deserializes `object` back into a payload value.
    fn deserialize(&self, object: &SerializedObject) -> Result<serde_json::Value>;
}

/// Default serializer: JSON bytes for any type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn handles(&self, _serialized_type: &SerializedType) -> bool {
        true
    }

    fn serialize(
        &self,
        serialized_type: &SerializedType,
        payload: &serde_json::Value,
    ) -> Result<SerializedObject> {
        Ok(SerializedObject {
            serialized_type: serialized_type.clone(),
            data: serde_json::to_vec(payload)?,
        })
    }

    fn deserialize(&self, object: &SerializedObject) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&object.data)?)
    }
}

/// Ordered serializer provider chain.
///
/// Deployments extend serialization by passing providers at construction
/// time; resolution walks the list in order and picks the first provider
/// that handles the type. A [`JsonSerializer`] is appended last so
/// resolution always succeeds.
pub struct SerializerRegistry {
    providers: Vec<Arc<dyn Serializer>>,
}

impl SerializerRegistry {
    /// Creates a registry from the given providers, appending the JSON
    /// default.
    pub fn new(mut providers: Vec<Arc<dyn Serializer>>) -> Self {
        providers.push(Arc::new(JsonSerializer));
        Self { providers }
    }

    /// Resolves the serializer for `serialized_type`, first match wins.
    pub fn resolve(&self, serialized_type: &SerializedType) -> &dyn Serializer {
        for provider in &self.providers {
            if provider.handles(serialized_type) {
                return provider.as_ref();
            }
        }
        // unreachable in practice: the JSON default handles everything
        &JsonSerializer
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

//! Service and capability descriptors
//!
//! The catalog, planner, and executor all speak in terms of these types:
//! a [`ServiceDescriptor`] identifies one remote component advertised in
//! the registry, and each of its [`CapabilityDescriptor`]s describes one
//! callable operation together with its typed input schema.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of remote component a service is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// A deterministic tool exposing one or more capabilities.
    #[default]
    Tool,
    /// An agent that may itself reason about its inputs.
    Agent,
}

impl ServiceKind {
    /// Registry key segment for this kind (`/services/{kind}/{id}`).
    pub fn key_segment(&self) -> &'static str {
        match self {
            ServiceKind::Tool => "tool",
            ServiceKind::Agent => "agent",
        }
    }
}

/// Semantic type of one capability input field.
///
/// This is deliberately narrower than full JSON Schema: it is the set of
/// shapes the coercer knows how to produce from string-shaped LLM output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl SemanticType {
    /// Human-readable name used in planner prompts and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Number => "number",
            SemanticType::Integer => "integer",
            SemanticType::Boolean => "boolean",
            SemanticType::Array => "array",
            SemanticType::Object => "object",
        }
    }

    /// Whether an already-decoded JSON value inhabits this type.
    pub fn admits(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match (self, value) {
            (SemanticType::String, Value::String(_)) => true,
            (SemanticType::Number, Value::Number(_)) => true,
            (SemanticType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (SemanticType::Boolean, Value::Bool(_)) => true,
            (SemanticType::Array, Value::Array(_)) => true,
            (SemanticType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One field of a capability's input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name as it appears in the invocation body.
    pub name: String,
    /// Semantic type the capability expects.
    #[serde(rename = "type")]
    pub field_type: SemanticType,
    /// Whether the field must be present.
    #[serde(default)]
    pub required: bool,
    /// A single example value, shown to the planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
    /// Free-text description, shown to the planner and to Layer-3 repair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSchema {
    /// Create a required field of the given type.
    pub fn required(name: impl Into<String>, field_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            example: None,
            description: None,
        }
    }

    /// Create an optional field of the given type.
    pub fn optional(name: impl Into<String>, field_type: SemanticType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Attach an example value.
    pub fn with_example(mut self, example: serde_json::Value) -> Self {
        self.example = Some(example);
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One callable operation exposed by a service.
///
/// `(service.name, capability.name)` is the fully-qualified address used
/// in plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Capability name, unique within its service.
    pub name: String,
    /// HTTP path on the service under which this capability is invoked.
    pub invocation_path: String,
    /// Ordered input schema.
    #[serde(default)]
    pub input_schema: Vec<FieldSchema>,
    /// Hint describing the shape of the output payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hint: Option<String>,
    /// One-line summary shown to the planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Bumped whenever the input schema changes; part of the schema
    /// cache fingerprint.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

impl CapabilityDescriptor {
    /// Create a capability with an empty schema.
    pub fn new(name: impl Into<String>, invocation_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invocation_path: invocation_path.into(),
            input_schema: Vec::new(),
            output_hint: None,
            summary: None,
            schema_version: 1,
        }
    }

    /// Append a field to the input schema.
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.input_schema.push(field);
        self
    }

    /// Attach the planner-facing summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Attach the output shape hint.
    pub fn with_output_hint(mut self, hint: impl Into<String>) -> Self {
        self.output_hint = Some(hint.into());
        self
    }

    /// Look up one field of the input schema by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.input_schema.iter().find(|f| f.name == name)
    }

    /// Names of all required fields, in schema order.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.input_schema.iter().filter(|f| f.required)
    }
}

/// Identity of one remote component advertised in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Opaque unique id (registry key suffix).
    pub id: String,
    /// Service name; plans address capabilities as `(name, capability)`.
    pub name: String,
    /// Tool or agent.
    #[serde(default)]
    pub kind: ServiceKind,
    /// Network address including scheme, e.g. `http://10.0.0.7:8080`.
    pub address: String,
    /// The operations this service exposes.
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
    /// Free-form metadata (region, version, owner, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// UNIX timestamp (seconds) of the last heartbeat renewal.
    #[serde(default)]
    pub last_heartbeat: i64,
}

impl ServiceDescriptor {
    /// Create a descriptor with a fresh heartbeat.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ServiceKind,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            address: address.into(),
            capabilities: Vec::new(),
            metadata: HashMap::new(),
            last_heartbeat: Utc::now().timestamp(),
        }
    }

    /// Append a capability.
    pub fn with_capability(mut self, capability: CapabilityDescriptor) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Registry key for this descriptor (`/services/{kind}/{id}`).
    pub fn registry_key(&self) -> String {
        format!("/services/{}/{}", self.kind.key_segment(), self.id)
    }

    /// Look up one capability by name.
    pub fn capability(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Refresh the heartbeat timestamp.
    pub fn touch(&mut self, now_unix: i64) {
        self.last_heartbeat = now_unix;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_service() -> ServiceDescriptor {
        ServiceDescriptor::new("wt-1", "weather-tool-v2", ServiceKind::Tool, "http://wt:8080")
            .with_capability(
                CapabilityDescriptor::new("get_current_weather", "/api/capabilities/weather")
                    .with_summary("Current weather for a coordinate pair")
                    .with_field(
                        FieldSchema::required("lat", SemanticType::Number).with_example(json!(48.85)),
                    )
                    .with_field(
                        FieldSchema::required("lon", SemanticType::Number).with_example(json!(2.35)),
                    ),
            )
    }

    #[test]
    fn registry_key_includes_kind_segment() {
        let svc = weather_service();
        assert_eq!(svc.registry_key(), "/services/tool/wt-1");
    }

    #[test]
    fn capability_lookup_by_name() {
        let svc = weather_service();
        assert!(svc.capability("get_current_weather").is_some());
        assert!(svc.capability("nope").is_none());
    }

    #[test]
    fn semantic_type_admits_decoded_values() {
        assert!(SemanticType::Number.admits(&json!(1.5)));
        assert!(SemanticType::Integer.admits(&json!(7)));
        assert!(!SemanticType::Integer.admits(&json!(7.2)));
        assert!(!SemanticType::Boolean.admits(&json!("true")));
        assert!(SemanticType::Object.admits(&json!({"a": 1})));
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let svc = weather_service();
        let encoded = serde_json::to_string(&svc).unwrap();
        let decoded: ServiceDescriptor = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.name, "weather-tool-v2");
        assert_eq!(decoded.capabilities.len(), 1);
        assert_eq!(decoded.capabilities[0].input_schema.len(), 2);
        assert_eq!(decoded.capabilities[0].schema_version, 1);
    }
}

//! Compiled-schema cache
//!
//! Each capability's input schema compiles into a JSON Schema validator
//! exactly once per `(service, capability, schema_version)` fingerprint.
//! Catalog change events invalidate by service so a redeployed tool
//! with a bumped schema recompiles on next use.

use capstan_kernel::service::{CapabilityDescriptor, FieldSchema, SemanticType};
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Cache key: one capability at one schema version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint {
    pub service: String,
    pub capability: String,
    pub schema_version: u32,
}

impl SchemaFingerprint {
    /// Fingerprint for a capability on a service.
    pub fn of(service: &str, capability: &CapabilityDescriptor) -> Self {
        Self {
            service: service.to_string(),
            capability: capability.name.clone(),
            schema_version: capability.schema_version,
        }
    }
}

/// Why a parameter set failed schema validation.
#[derive(Debug, Clone, Error)]
#[error("schema validation failed for '{service}.{capability}': {violations:?}")]
pub struct SchemaViolation {
    pub service: String,
    pub capability: String,
    /// One message per violated constraint, instance-path prefixed.
    pub violations: Vec<String>,
}

/// A compiled validator for one capability's input.
pub struct CompiledSchema {
    fingerprint: SchemaFingerprint,
    validator: jsonschema::JSONSchema,
}

impl CompiledSchema {
    fn compile(
        fingerprint: SchemaFingerprint,
        fields: &[FieldSchema],
    ) -> Result<Self, SchemaCompileError> {
        let schema = schema_document(fields);
        let validator = jsonschema::JSONSchema::compile(&schema)
            .map_err(|e| SchemaCompileError(e.to_string()))?;
        Ok(Self {
            fingerprint,
            validator,
        })
    }

    /// Validate a fully-coerced parameter object.
    pub fn validate(&self, params: &Value) -> Result<(), SchemaViolation> {
        let outcome = self.validator.validate(params);
        match outcome {
            Ok(()) => Ok(()),
            Err(errors) => Err(SchemaViolation {
                service: self.fingerprint.service.clone(),
                capability: self.fingerprint.capability.clone(),
                violations: errors
                    .map(|e| format!("{}: {}", e.instance_path, e))
                    .collect(),
            }),
        }
    }
}

/// JSON Schema compilation failure (malformed advertised schema).
#[derive(Debug, Clone, Error)]
#[error("schema compilation failed: {0}")]
pub struct SchemaCompileError(String);

/// Build the JSON Schema document for a field list.
fn schema_document(fields: &[FieldSchema]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields {
        let type_name = match field.field_type {
            SemanticType::String => "string",
            SemanticType::Number => "number",
            SemanticType::Integer => "integer",
            SemanticType::Boolean => "boolean",
            SemanticType::Array => "array",
            SemanticType::Object => "object",
        };
        properties.insert(field.name.clone(), json!({ "type": type_name }));
        if field.required {
            required.push(Value::String(field.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": Value::Array(required),
    })
}

/// Memoising cache of compiled schemas.
#[derive(Default)]
pub struct SchemaCache {
    compiled: DashMap<SchemaFingerprint, Arc<CompiledSchema>>,
}

impl SchemaCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (compiling once if needed) the validator for a capability.
    pub fn get(
        &self,
        service: &str,
        capability: &CapabilityDescriptor,
    ) -> Result<Arc<CompiledSchema>, SchemaCompileError> {
        let fingerprint = SchemaFingerprint::of(service, capability);
        if let Some(hit) = self.compiled.get(&fingerprint) {
            return Ok(Arc::clone(&hit));
        }
        let compiled = Arc::new(CompiledSchema::compile(
            fingerprint.clone(),
            &capability.input_schema,
        )?);
        // First writer wins; a concurrent compile of the same key is
        // discarded rather than replacing the published value.
        let entry = self
            .compiled
            .entry(fingerprint)
            .or_insert_with(|| Arc::clone(&compiled));
        Ok(Arc::clone(&entry))
    }

    /// Drop every compiled schema belonging to a service.
    pub fn invalidate_service(&self, service: &str) {
        self.compiled.retain(|key, _| key.service != service);
    }

    /// Number of compiled entries (for tests and health output).
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

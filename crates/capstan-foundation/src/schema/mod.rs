//! Schema cache and value coercion (Layer 2 machinery).

pub mod cache;
pub mod coerce;

pub use cache::{
    CompiledSchema, SchemaCache, SchemaCompileError, SchemaFingerprint, SchemaViolation,
};
pub use coerce::{coerce, CoercionError};

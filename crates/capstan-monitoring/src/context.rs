//! Trace context model
//!
//! Minimal W3C-shaped identifiers: a 16-byte trace id, an 8-byte span
//! id, and the sampled flag. These are the units the propagator parses
//! and formats; conversion into the OpenTelemetry API types happens in
//! [`crate::linked`].

use rand::RngCore;
use thiserror::Error;

/// A hex-decoding failure for trace or span ids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {what} hex '{input}'")]
pub struct IdParseError {
    what: &'static str,
    input: String,
}

/// 16-byte trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

impl TraceId {
    /// The all-zero (invalid) trace id.
    pub const INVALID: TraceId = TraceId([0; 16]);

    /// Generate a random, valid trace id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        if bytes == [0; 16] {
            bytes[15] = 1;
        }
        Self(bytes)
    }

    /// Parse from 32 lowercase hex characters.
    pub fn from_hex(input: &str) -> Result<Self, IdParseError> {
        let mut bytes = [0u8; 16];
        if input.len() != 32 || hex::decode_to_slice(input, &mut bytes).is_err() {
            return Err(IdParseError {
                what: "trace id",
                input: input.to_string(),
            });
        }
        Ok(Self(bytes))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether the id is non-zero.
    pub fn is_valid(&self) -> bool {
        self.0 != [0; 16]
    }
}

/// 8-byte span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    /// The all-zero (invalid) span id.
    pub const INVALID: SpanId = SpanId([0; 8]);

    /// Generate a random, valid span id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        if bytes == [0; 8] {
            bytes[7] = 1;
        }
        Self(bytes)
    }

    /// Parse from 16 lowercase hex characters.
    pub fn from_hex(input: &str) -> Result<Self, IdParseError> {
        let mut bytes = [0u8; 8];
        if input.len() != 16 || hex::decode_to_slice(input, &mut bytes).is_err() {
            return Err(IdParseError {
                what: "span id",
                input: input.to_string(),
            });
        }
        Ok(Self(bytes))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether the id is non-zero.
    pub fn is_valid(&self) -> bool {
        self.0 != [0; 8]
    }
}

/// W3C trace flags (only the sampled bit is interpreted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// No flags set.
    pub const NONE: TraceFlags = TraceFlags(0);
    /// The sampled bit.
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    /// Wrap a raw flags byte.
    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    /// Raw byte value.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Whether the sampled bit is set.
    pub fn is_sampled(&self) -> bool {
        self.0 & 0x01 == 0x01
    }
}

/// An extracted or locally created span context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_flags: TraceFlags,
    /// Whether this context arrived from another process.
    pub is_remote: bool,
    /// Raw `tracestate` header value, passed through untouched.
    pub trace_state: Option<String>,
}

impl SpanContext {
    /// Build a context from its parts.
    pub fn new(trace_id: TraceId, span_id: SpanId, trace_flags: TraceFlags, is_remote: bool) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags,
            is_remote,
            trace_state: None,
        }
    }

    /// Attach a raw `tracestate` value.
    pub fn with_trace_state(mut self, state: Option<String>) -> Self {
        self.trace_state = state;
        self
    }

    /// A fresh local root context (sampled).
    pub fn new_root() -> Self {
        Self::new(TraceId::random(), SpanId::random(), TraceFlags::SAMPLED, false)
    }

    /// Whether both ids are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }

    /// Whether the sampled bit is set.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }
}

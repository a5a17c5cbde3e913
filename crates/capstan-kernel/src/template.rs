//! Parameter template IR
//!
//! Step parameters arrive from the planner (and from workflow templates)
//! as JSON values whose strings may embed `{{identifier}}` or
//! `{{step_id.field.path}}` references. Rather than re-scanning raw
//! strings at execution time, parameters are parsed once into a tagged
//! [`ParamValue`]:
//!
//! - `Literal` — a plain JSON value, passed through unchanged.
//! - `SingleTemplate` — the entire string is one template; the
//!   referent's **native type is preserved** at resolution.
//! - `Composite` — templates embedded in a larger string; substitution
//!   is textual.
//!
//! The distinction is load-bearing: `"{{step-1.data.lat}}"` must resolve
//! to a number, while `"lat={{step-1.data.lat}}"` resolves to a string.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::LazyLock;

static TEMPLATE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\{\{\s*([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)\s*\}\}")
        .expect("template regex is valid")
});

/// One `{{...}}` reference.
///
/// `root` is either a request-scope identifier (empty `path`) or a step
/// id whose result is navigated by the dotted `path`. Which of the two
/// it is can only be decided against a concrete plan, so the reference
/// stores the raw pieces and the resolver interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateRef {
    /// First dotted segment: request identifier or step id.
    pub root: String,
    /// Remaining segments navigating into the referent.
    pub path: Vec<String>,
}

impl TemplateRef {
    /// Parse the inside of a `{{...}}` reference.
    pub fn parse(inner: &str) -> Self {
        let mut segments = inner.split('.').map(str::to_string);
        let root = segments.next().unwrap_or_default();
        Self {
            root,
            path: segments.collect(),
        }
    }

    /// Whether this reference navigates into a referent (step-result
    /// shape) rather than naming a scalar request identifier.
    pub fn has_path(&self) -> bool {
        !self.path.is_empty()
    }

    /// The textual `{{...}}` form this reference was parsed from.
    pub fn to_template_string(&self) -> String {
        if self.path.is_empty() {
            format!("{{{{{}}}}}", self.root)
        } else {
            format!("{{{{{}.{}}}}}", self.root, self.path.join("."))
        }
    }
}

impl std::fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_template_string())
    }
}

/// A piece of a composite template string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    /// Verbatim text.
    Text(String),
    /// An embedded reference, substituted textually.
    Template(TemplateRef),
}

/// A step parameter in the plan IR.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// A plain JSON value.
    Literal(serde_json::Value),
    /// The entire parameter is one template; native type preserved.
    SingleTemplate(TemplateRef),
    /// Templates embedded in surrounding text; textual substitution.
    Composite(Vec<TemplateSegment>),
}

impl ParamValue {
    /// Parse a raw string parameter into the IR.
    ///
    /// A string with no `{{...}}` occurrences is a literal. A string
    /// that consists of exactly one template (no surrounding text) is a
    /// [`ParamValue::SingleTemplate`]; anything else with at least one
    /// template is a [`ParamValue::Composite`].
    pub fn parse_str(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut cursor = 0;
        for caps in TEMPLATE_RE.captures_iter(text) {
            let whole = caps.get(0).expect("capture 0 always present");
            if whole.start() > cursor {
                segments.push(TemplateSegment::Text(text[cursor..whole.start()].to_string()));
            }
            let inner = caps.get(1).expect("capture 1 in template regex");
            segments.push(TemplateSegment::Template(TemplateRef::parse(inner.as_str())));
            cursor = whole.end();
        }
        if segments.is_empty() {
            return ParamValue::Literal(serde_json::Value::String(text.to_string()));
        }
        if cursor < text.len() {
            segments.push(TemplateSegment::Text(text[cursor..].to_string()));
        }
        match segments.as_slice() {
            [TemplateSegment::Template(reference)] => {
                ParamValue::SingleTemplate(reference.clone())
            }
            _ => ParamValue::Composite(segments),
        }
    }

    /// Parse an arbitrary JSON parameter value into the IR.
    ///
    /// Only strings can carry templates; every other shape (including
    /// containers) passes through as a literal.
    pub fn parse_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::parse_str(&s),
            other => ParamValue::Literal(other),
        }
    }

    /// All template references this parameter contains.
    pub fn references(&self) -> Vec<&TemplateRef> {
        match self {
            ParamValue::Literal(_) => Vec::new(),
            ParamValue::SingleTemplate(reference) => vec![reference],
            ParamValue::Composite(segments) => segments
                .iter()
                .filter_map(|s| match s {
                    TemplateSegment::Template(reference) => Some(reference),
                    TemplateSegment::Text(_) => None,
                })
                .collect(),
        }
    }

    /// Whether this parameter still carries any unresolved template.
    pub fn is_resolved(&self) -> bool {
        matches!(self, ParamValue::Literal(_))
    }

    /// The textual form this parameter serialises to.
    pub fn to_wire_value(&self) -> serde_json::Value {
        match self {
            ParamValue::Literal(value) => value.clone(),
            ParamValue::SingleTemplate(reference) => {
                serde_json::Value::String(reference.to_template_string())
            }
            ParamValue::Composite(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        TemplateSegment::Text(text) => out.push_str(text),
                        TemplateSegment::Template(reference) => {
                            out.push_str(&reference.to_template_string());
                        }
                    }
                }
                serde_json::Value::String(out)
            }
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.is_null() {
            return Err(D::Error::custom("parameter value must not be null"));
        }
        Ok(ParamValue::parse_value(value))
    }
}

/// Navigate a decoded JSON value by a dotted path.
///
/// Numeric segments index arrays; all other segments key objects.
pub fn lookup_path<'a>(
    value: &'a serde_json::Value,
    path: &[String],
) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

//! Mapping templates.
//!
//! A routing rule's `mapping` describes how to build the target event's
//! payload from the source payload and context. Mappings are compiled once at
//! rule creation into a closed, tagged expression tree ([`TemplateExpr`]) and
//! evaluated without any general-purpose interpreter.
//!
//! Supported expressions inside `{{ }}`:
//!
//! - `{{$}}` — the whole source payload
//! - `{{path.to.field}}` — dotted/indexed field access (`items.0.id`);
//!   `$ctx.` prefixes address the event context instead of the payload
//! - `{{path|default}}` — fallback value when the path is missing
//! - `{{$now()}}`, `{{$len(path)}}`, `{{$upper(path)}}`, `{{$lower(path)}}` —
//!   the whitelisted pure functions
//!
//! A string that mixes text and expressions renders by interpolation; any
//! non-string JSON value is a literal. Objects and arrays compile recursively.

use chrono::Utc;
use serde_json::{Map, Value};

use weft_core::EventContext;

use crate::errors::TemplateError;

/// Prefix addressing the event context instead of the payload.
const CTX_PREFIX: &str = "$ctx.";

/// One compiled template expression.
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateExpr {
    /// A literal JSON value, passed through verbatim.
    Literal(Value),
    /// `{{$}}` — the entire source payload.
    WholePayload,
    /// Field access with optional fallback.
    FieldPath {
        /// Dotted path, `$ctx.`-prefixed for context fields.
        path: String,
        /// Value used when the path resolves to nothing.
        default: Option<Value>,
    },
    /// `{{$now()}}` — current time as RFC 3339.
    Now,
    /// `{{$len(path)}}` — length of an array, string, or object.
    Len(String),
    /// `{{$upper(path)}}` — uppercased string value.
    Upper(String),
    /// `{{$lower(path)}}` — lowercased string value.
    Lower(String),
    /// A string mixing literal text and embedded expressions.
    Interpolate(Vec<Segment>),
    /// An object whose members are compiled expressions.
    Object(Vec<(String, TemplateExpr)>),
    /// An array whose elements are compiled expressions.
    Array(Vec<TemplateExpr>),
}

/// One piece of an interpolated string.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// An embedded expression, stringified into the output.
    Expr(Box<TemplateExpr>),
}

/// A compiled mapping template (the root is always an object).
#[derive(Clone, Debug, PartialEq)]
pub struct MappingTemplate {
    root: TemplateExpr,
}

impl MappingTemplate {
    /// Compile a mapping description into an expression tree.
    ///
    /// The root must be a JSON object; strings anywhere in the tree are
    /// parsed for `{{ }}` expressions, everything else is literal.
    pub fn compile(mapping: &Value) -> Result<Self, TemplateError> {
        if !mapping.is_object() {
            return Err(TemplateError::NotAnObject);
        }
        Ok(Self {
            root: compile_value(mapping)?,
        })
    }

    /// Apply the template to a payload and context, producing the target
    /// payload.
    pub fn apply(&self, payload: &Value, ctx: &EventContext) -> Result<Value, TemplateError> {
        let ctx_value = serde_json::to_value(ctx).unwrap_or(Value::Null);
        Ok(eval(&self.root, payload, &ctx_value))
    }
}

fn compile_value(value: &Value) -> Result<TemplateExpr, TemplateError> {
    match value {
        Value::String(s) => compile_string(s),
        Value::Object(map) => {
            let mut fields = Vec::with_capacity(map.len());
            for (key, member) in map {
                fields.push((key.clone(), compile_value(member)?));
            }
            Ok(TemplateExpr::Object(fields))
        }
        Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(compile_value(item)?);
            }
            Ok(TemplateExpr::Array(elements))
        }
        other => Ok(TemplateExpr::Literal(other.clone())),
    }
}

fn compile_string(s: &str) -> Result<TemplateExpr, TemplateError> {
    let Some(first_open) = s.find("{{") else {
        return Ok(TemplateExpr::Literal(Value::String(s.to_string())));
    };

    let mut segments: Vec<Segment> = Vec::new();
    let mut rest = s;
    let mut open = first_open;
    loop {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            return Err(TemplateError::Unclosed(s.to_string()));
        };
        let expr = compile_expr(&after_open[..close])?;
        segments.push(Segment::Expr(Box::new(expr)));

        rest = &after_open[close + 2..];
        match rest.find("{{") {
            Some(next) => open = next,
            None => {
                if !rest.is_empty() {
                    segments.push(Segment::Text(rest.to_string()));
                }
                break;
            }
        }
    }

    // A string that is exactly one expression yields the value itself,
    // preserving its JSON type; anything mixed renders as a string.
    if segments.len() == 1 {
        if let Segment::Expr(expr) = &segments[0] {
            return Ok((**expr).clone());
        }
    }
    Ok(TemplateExpr::Interpolate(segments))
}

fn compile_expr(inner: &str) -> Result<TemplateExpr, TemplateError> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(TemplateError::EmptyPath("{{}}".to_string()));
    }
    if inner == "$" {
        return Ok(TemplateExpr::WholePayload);
    }

    // Function call: `$name(arg)`. `$ctx.` paths fall through to field access.
    if inner.starts_with('$') && !inner.starts_with(CTX_PREFIX) {
        let Some(open) = inner.find('(') else {
            return Err(TemplateError::BadCall(inner.to_string()));
        };
        if !inner.ends_with(')') {
            return Err(TemplateError::BadCall(inner.to_string()));
        }
        let name = &inner[1..open];
        let arg = inner[open + 1..inner.len() - 1].trim();
        return match name {
            "now" => {
                if arg.is_empty() {
                    Ok(TemplateExpr::Now)
                } else {
                    Err(TemplateError::BadCall(inner.to_string()))
                }
            }
            "len" => non_empty_arg(arg, inner).map(TemplateExpr::Len),
            "upper" => non_empty_arg(arg, inner).map(TemplateExpr::Upper),
            "lower" => non_empty_arg(arg, inner).map(TemplateExpr::Lower),
            _ => Err(TemplateError::UnknownFunction(format!("${name}"))),
        };
    }

    // Field path with optional `|default` fallback.
    if let Some((path, default)) = inner.split_once('|') {
        let path = path.trim();
        if path.is_empty() {
            return Err(TemplateError::EmptyPath(inner.to_string()));
        }
        let default = default.trim();
        let default_value = serde_json::from_str(default)
            .unwrap_or_else(|_| Value::String(default.to_string()));
        return Ok(TemplateExpr::FieldPath {
            path: path.to_string(),
            default: Some(default_value),
        });
    }

    Ok(TemplateExpr::FieldPath {
        path: inner.to_string(),
        default: None,
    })
}

fn non_empty_arg(arg: &str, call: &str) -> Result<String, TemplateError> {
    if arg.is_empty() {
        return Err(TemplateError::BadCall(call.to_string()));
    }
    Ok(arg.to_string())
}

fn eval(expr: &TemplateExpr, payload: &Value, ctx_value: &Value) -> Value {
    match expr {
        TemplateExpr::Literal(v) => v.clone(),
        TemplateExpr::WholePayload => payload.clone(),
        TemplateExpr::FieldPath { path, default } => resolve_path(payload, ctx_value, path)
            .cloned()
            .or_else(|| default.clone())
            .unwrap_or(Value::Null),
        TemplateExpr::Now => Value::String(Utc::now().to_rfc3339()),
        TemplateExpr::Len(path) => {
            let len = match resolve_path(payload, ctx_value, path) {
                Some(Value::Array(items)) => Some(items.len()),
                Some(Value::String(s)) => Some(s.chars().count()),
                Some(Value::Object(map)) => Some(map.len()),
                _ => None,
            };
            len.map_or(Value::Null, |n| Value::from(n as u64))
        }
        TemplateExpr::Upper(path) => case_converted(payload, ctx_value, path, str::to_uppercase),
        TemplateExpr::Lower(path) => case_converted(payload, ctx_value, path, str::to_lowercase),
        TemplateExpr::Interpolate(segments) => {
            let mut out = String::new();
            for segment in segments {
                match segment {
                    Segment::Text(text) => out.push_str(text),
                    Segment::Expr(inner) => {
                        out.push_str(&stringify(&eval(inner, payload, ctx_value)));
                    }
                }
            }
            Value::String(out)
        }
        TemplateExpr::Object(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (key, member) in fields {
                let _ = map.insert(key.clone(), eval(member, payload, ctx_value));
            }
            Value::Object(map)
        }
        TemplateExpr::Array(elements) => Value::Array(
            elements
                .iter()
                .map(|element| eval(element, payload, ctx_value))
                .collect(),
        ),
    }
}

fn case_converted(
    payload: &Value,
    ctx_value: &Value,
    path: &str,
    convert: impl Fn(&str) -> String,
) -> Value {
    match resolve_path(payload, ctx_value, path) {
        Some(Value::String(s)) => Value::String(convert(s)),
        Some(other) => Value::String(convert(&stringify(other))),
        None => Value::Null,
    }
}

/// Resolve a dotted/indexed path against the payload (or the context when
/// prefixed with `$ctx.`). Returns `None` if any segment is missing.
pub(crate) fn resolve_path<'a>(
    payload: &'a Value,
    ctx_value: &'a Value,
    path: &str,
) -> Option<&'a Value> {
    let (mut current, path) = match path.strip_prefix(CTX_PREFIX) {
        Some(ctx_path) => (ctx_value, ctx_path),
        None => (payload, path),
    };

    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a value into interpolated text: strings stay raw, everything else
/// is compact JSON.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ctx() -> EventContext {
        EventContext::root().with_agent("agent-7")
    }

    fn apply(mapping: Value, payload: Value) -> Value {
        MappingTemplate::compile(&mapping)
            .unwrap()
            .apply(&payload, &ctx())
            .unwrap()
    }

    #[test]
    fn whole_payload_passthrough() {
        let out = apply(
            serde_json::json!({"original": "{{$}}"}),
            serde_json::json!({"a": 1, "b": [2, 3]}),
        );
        assert_eq!(out["original"], serde_json::json!({"a": 1, "b": [2, 3]}));
    }

    #[test]
    fn field_path_preserves_json_type() {
        let out = apply(
            serde_json::json!({"count": "{{stats.total}}"}),
            serde_json::json!({"stats": {"total": 42}}),
        );
        assert_eq!(out["count"], 42);
    }

    #[test]
    fn indexed_path() {
        let out = apply(
            serde_json::json!({"first": "{{items.0.id}}"}),
            serde_json::json!({"items": [{"id": "i-0"}, {"id": "i-1"}]}),
        );
        assert_eq!(out["first"], "i-0");
    }

    #[test]
    fn missing_path_is_null() {
        let out = apply(serde_json::json!({"x": "{{nope}}"}), serde_json::json!({}));
        assert_eq!(out["x"], Value::Null);
    }

    #[test]
    fn default_fallback() {
        let out = apply(
            serde_json::json!({"region": "{{region|eu-west}}", "retries": "{{retries|3}}"}),
            serde_json::json!({}),
        );
        assert_eq!(out["region"], "eu-west");
        assert_eq!(out["retries"], 3, "defaults parse as JSON when they can");
    }

    #[test]
    fn default_not_used_when_present() {
        let out = apply(
            serde_json::json!({"region": "{{region|eu-west}}"}),
            serde_json::json!({"region": "us-east"}),
        );
        assert_eq!(out["region"], "us-east");
    }

    #[test]
    fn now_function() {
        let out = apply(serde_json::json!({"ts": "{{$now()}}"}), serde_json::json!({}));
        let ts = out["ts"].as_str().unwrap();
        assert!(ts.contains('T'), "must be RFC 3339: {ts}");
    }

    #[test]
    fn len_function() {
        let out = apply(
            serde_json::json!({"n": "{{$len(items)}}", "chars": "{{$len(name)}}"}),
            serde_json::json!({"items": [1, 2, 3], "name": "weft"}),
        );
        assert_eq!(out["n"], 3);
        assert_eq!(out["chars"], 4);
    }

    #[test]
    fn case_functions() {
        let out = apply(
            serde_json::json!({"up": "{{$upper(name)}}", "down": "{{$lower(name)}}"}),
            serde_json::json!({"name": "Weft"}),
        );
        assert_eq!(out["up"], "WEFT");
        assert_eq!(out["down"], "weft");
    }

    #[test]
    fn context_path() {
        let context = ctx();
        let template =
            MappingTemplate::compile(&serde_json::json!({"agent": "{{$ctx.agentId}}"})).unwrap();
        let out = template.apply(&serde_json::json!({}), &context).unwrap();
        assert_eq!(out["agent"], "agent-7");
    }

    #[test]
    fn interpolation_mixes_text_and_exprs() {
        let out = apply(
            serde_json::json!({"summary": "order {{order_id}} has {{$len(items)}} items"}),
            serde_json::json!({"order_id": "o1", "items": [1, 2]}),
        );
        assert_eq!(out["summary"], "order o1 has 2 items");
    }

    #[test]
    fn non_string_literals_pass_through() {
        let out = apply(
            serde_json::json!({"static": 7, "flag": true, "nothing": null}),
            serde_json::json!({}),
        );
        assert_eq!(out["static"], 7);
        assert_eq!(out["flag"], true);
        assert_eq!(out["nothing"], Value::Null);
    }

    #[test]
    fn nested_objects_and_arrays_compile() {
        let out = apply(
            serde_json::json!({
                "meta": {"id": "{{order_id}}", "tags": ["{{kind}}", "fixed"]}
            }),
            serde_json::json!({"order_id": "o1", "kind": "priority"}),
        );
        assert_eq!(out["meta"]["id"], "o1");
        assert_eq!(out["meta"]["tags"], serde_json::json!(["priority", "fixed"]));
    }

    #[test]
    fn unknown_function_rejected_at_compile() {
        let err = MappingTemplate::compile(&serde_json::json!({"x": "{{$rand()}}"})).unwrap_err();
        assert_matches!(err, TemplateError::UnknownFunction(name) if name == "$rand");
    }

    #[test]
    fn unclosed_expression_rejected() {
        let err = MappingTemplate::compile(&serde_json::json!({"x": "{{oops"})).unwrap_err();
        assert_matches!(err, TemplateError::Unclosed(_));
    }

    #[test]
    fn non_object_root_rejected() {
        let err = MappingTemplate::compile(&serde_json::json!("just a string")).unwrap_err();
        assert_matches!(err, TemplateError::NotAnObject);
    }

    #[test]
    fn bad_calls_rejected() {
        for bad in ["{{$now(x)}}", "{{$len()}}", "{{$upper}}"] {
            let mapping = serde_json::json!({"x": bad});
            assert!(
                MappingTemplate::compile(&mapping).is_err(),
                "{bad} should fail compilation"
            );
        }
    }

    #[test]
    fn order_audit_mapping() {
        // mapping {"id":"{{order_id}}","ts":"{{$now()}}"} applied to
        // order:created {order_id:"o1"}
        let out = apply(
            serde_json::json!({"id": "{{order_id}}", "ts": "{{$now()}}"}),
            serde_json::json!({"order_id": "o1"}),
        );
        assert_eq!(out["id"], "o1");
        assert!(out["ts"].as_str().unwrap().contains('T'));
    }
}

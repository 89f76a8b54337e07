//! Deterministic cache key derivation
//!
//! A key is `"{field}:{arguments}"` where the arguments are rendered as
//! canonical JSON: object members sorted by name at every depth, arrays in
//! their original order, no insignificant whitespace. `%` and `:` in the
//! field name are percent-escaped so the field segment always ends at the
//! first `:`.

use crate::cache::types::{Arguments, CacheKey};
use serde_json::Value;
use std::fmt::Write;

/// Build the key for a field invocation
pub fn build_key(field_name: &str, arguments: &Arguments) -> CacheKey {
    let mut key = escape_field(field_name);
    key.push(':');
    write_object(&mut key, arguments.iter());
    key
}

/// Cache key builder for field invocations
///
/// Arguments may be added in any order; they are sorted when the key is
/// built.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    field_name: String,
    arguments: Arguments,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder for a field
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            arguments: Arguments::new(),
        }
    }

    /// Add a single argument to the key
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Add every argument of a mapping
    pub fn args(mut self, arguments: &Arguments) -> Self {
        for (name, value) in arguments {
            self.arguments.insert(name.clone(), value.clone());
        }
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        build_key(&self.field_name, &self.arguments)
    }
}

fn escape_field(field_name: &str) -> String {
    let mut escaped = String::with_capacity(field_name.len() + 1);
    for ch in field_name.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map.iter()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        // Scalars already have a single JSON rendering
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

fn write_object<'a, I>(out: &mut String, members: I)
where
    I: Iterator<Item = (&'a String, &'a Value)>,
{
    let mut members: Vec<(&String, &Value)> = members.collect();
    members.sort_unstable_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (name, value)) in members.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}", Value::String(name.clone()));
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

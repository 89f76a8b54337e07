//! Line-oriented invocation scripts
//!
//! One invocation per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! query users {"page": 1, "size": 3}
//! mutation addUser {"user": {"name": "Judy"}}
//! query user {"id": 1}
//! ```
//!
//! The argument object is optional and defaults to `{}`.

use crate::gateway::Gateway;
use fieldcache::{Arguments, CacheEvent, OperationType};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed script line
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub operation: OperationType,
    pub field: String,
    pub arguments: Arguments,
}

/// What happened to one invocation
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub operation: OperationType,
    pub field: String,
    /// How the cache served it; `None` for invalidating mutations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse a single line; `Ok(None)` for blanks and comments
pub fn parse_line(text: &str) -> Result<Option<Invocation>, String> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    let (operation, rest) = split_word(text);
    let operation: OperationType = operation.parse()?;

    let (field, rest) = split_word(rest);
    if field.is_empty() {
        return Err("missing field name".to_string());
    }

    Ok(Some(Invocation {
        operation,
        field: field.to_string(),
        arguments: parse_arguments(rest)?,
    }))
}

/// Parse every line of a script
pub fn parse_script(text: &str) -> Result<Vec<Invocation>, ScriptError> {
    let mut invocations = Vec::new();
    for (index, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(invocation)) => invocations.push(invocation),
            Ok(None) => {}
            Err(reason) => {
                return Err(ScriptError::Parse {
                    line: index + 1,
                    reason,
                })
            }
        }
    }
    Ok(invocations)
}

pub fn load_script(path: &Path) -> Result<Vec<Invocation>, ScriptError> {
    let text = std::fs::read_to_string(path)?;
    parse_script(&text)
}

/// Load from `path`, or from stdin when no path is given
pub fn read_script(path: Option<&Path>) -> Result<Vec<Invocation>, ScriptError> {
    match path {
        Some(path) => load_script(path),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            parse_script(&text)
        }
    }
}

/// Parse a JSON argument object; empty input means no arguments
pub fn parse_arguments(text: &str) -> Result<Arguments, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Arguments::new());
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("arguments must be a JSON object, got {}", other)),
        Err(e) => Err(format!("invalid JSON arguments: {}", e)),
    }
}

/// Run invocations in order against one gateway
pub async fn run(gateway: &Gateway, invocations: &[Invocation]) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(invocations.len());
    for invocation in invocations {
        outcomes.push(run_one(gateway, invocation).await);
    }
    outcomes
}

/// Run one invocation and classify how the cache handled it
pub async fn run_one(gateway: &Gateway, invocation: &Invocation) -> Outcome {
    let before = gateway.cache().stats();
    let result = gateway
        .execute(invocation.operation, &invocation.field, &invocation.arguments)
        .await;
    let after = gateway.cache().stats();

    let cache = if after.hits > before.hits {
        Some(CacheEvent::Hit)
    } else if after.dedupes > before.dedupes {
        Some(CacheEvent::Dedupe)
    } else if after.misses > before.misses {
        Some(CacheEvent::Miss)
    } else if after.skips > before.skips {
        Some(CacheEvent::Skip)
    } else {
        None
    };

    let (data, error) = match result {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e.to_string())),
    };

    Outcome {
        operation: invocation.operation,
        field: invocation.field.clone(),
        cache,
        data,
        error,
    }
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], &text[end..]),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_line() {
        let invocation = parse_line(r#"query users {"page": 2}"#).unwrap().unwrap();
        assert_eq!(invocation.operation, OperationType::Query);
        assert_eq!(invocation.field, "users");
        assert_eq!(invocation.arguments["page"], json!(2));

        let invocation = parse_line("  Mutation   removeUser {\"id\": 3}  ").unwrap().unwrap();
        assert_eq!(invocation.operation, OperationType::Mutation);
        assert_eq!(invocation.field, "removeUser");

        let invocation = parse_line("query groups").unwrap().unwrap();
        assert!(invocation.arguments.is_empty());
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# warm the cache"), Ok(None));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("subscribe users").is_err());
        assert!(parse_line("query").is_err());
        assert!(parse_line("query users [1, 2]").is_err());
        assert!(parse_line("query users {oops").is_err());
    }

    #[test]
    fn test_parse_script_reports_line() {
        let err = parse_script("query users\n\nquery user {bad\n").unwrap_err();
        match err {
            ScriptError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {}", other),
        }

        let invocations = parse_script("# header\nquery users\nmutation addUser {\"user\": {\"name\": \"Z\"}}\n").unwrap();
        assert_eq!(invocations.len(), 2);
    }
}

//! Walkthrough of the cache lifecycle on the seeded data
//!
//! Lists users, reads one user, lists again, adds a user, then repeats both
//! reads. The list after `addUser` is a miss because the mutation purged
//! `users`; the final single read is a hit because `user:1` was untouched.

use crate::gateway::Gateway;
use crate::script::{self, parse_arguments, Invocation, Outcome};
use fieldcache::{CacheStats, OperationType};
use serde::Serialize;

const STEPS: &[(OperationType, &str, &str)] = &[
    (OperationType::Query, "users", r#"{"page": 1, "size": 3}"#),
    (OperationType::Query, "user", r#"{"id": 1}"#),
    (OperationType::Query, "users", r#"{"page": 1, "size": 3}"#),
    (OperationType::Mutation, "addUser", r#"{"user": {"name": "Judy"}}"#),
    (OperationType::Query, "users", r#"{"page": 1, "size": 3}"#),
    (OperationType::Query, "user", r#"{"id": 1}"#),
];

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub steps: Vec<Outcome>,
    pub stats: CacheStats,
}

/// Scenario invocations in execution order
pub fn steps() -> Vec<Invocation> {
    STEPS
        .iter()
        .map(|(operation, field, arguments)| Invocation {
            operation: *operation,
            field: field.to_string(),
            // Literal arguments above are always valid objects
            arguments: parse_arguments(arguments).unwrap_or_default(),
        })
        .collect()
}

pub async fn run(gateway: &Gateway) -> ScenarioReport {
    let steps = script::run(gateway, &steps()).await;
    ScenarioReport {
        steps,
        stats: gateway.cache().stats(),
    }
}

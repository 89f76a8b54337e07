//! Per-field caching and invalidation policies
//!
//! A [`PolicyRegistry`] is assembled once at startup and never mutated
//! afterwards. Fields without a policy are never cached and never trigger
//! invalidation.

use crate::cache::types::{Arguments, OperationType, Tag};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Computes tags from the field arguments and its resolved result
pub type TagFn = Arc<dyn Fn(&Arguments, &Value) -> Vec<Tag> + Send + Sync>;

/// Caching behaviour of one field
#[derive(Clone)]
pub struct Policy {
    operation: OperationType,
    field_name: String,
    references: Option<TagFn>,
    invalidate: Option<TagFn>,
    ttl: Option<Duration>,
}

impl Policy {
    /// Read policy: cache the result under the returned tags
    pub fn references<F>(f: F) -> PolicyBuilder
    where
        F: Fn(&Arguments, &Value) -> Vec<Tag> + Send + Sync + 'static,
    {
        PolicyBuilder::default().references(f)
    }

    /// Write policy: purge the returned tags after a successful resolution
    pub fn invalidate<F>(f: F) -> PolicyBuilder
    where
        F: Fn(&Arguments, &Value) -> Vec<Tag> + Send + Sync + 'static,
    {
        PolicyBuilder::default().invalidate(f)
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// TTL override for entries stored under this policy
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Whether the policy caches reads
    pub fn is_read(&self) -> bool {
        self.references.is_some()
    }

    /// Whether the policy invalidates on writes
    pub fn is_write(&self) -> bool {
        self.invalidate.is_some()
    }

    /// Tags to attach to a freshly resolved read result
    pub fn references_for(&self, arguments: &Arguments, result: &Value) -> Vec<Tag> {
        self.references
            .as_ref()
            .map(|f| f(arguments, result))
            .unwrap_or_default()
    }

    /// Tags to purge after a successful write
    pub fn invalidations_for(&self, arguments: &Arguments, result: &Value) -> Vec<Tag> {
        self.invalidate
            .as_ref()
            .map(|f| f(arguments, result))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("operation", &self.operation)
            .field("field_name", &self.field_name)
            .field("references", &self.references.is_some())
            .field("invalidate", &self.invalidate.is_some())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Partially built policy, completed when registered
#[derive(Default)]
pub struct PolicyBuilder {
    references: Option<TagFn>,
    invalidate: Option<TagFn>,
    ttl: Option<Duration>,
}

impl PolicyBuilder {
    pub fn references<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arguments, &Value) -> Vec<Tag> + Send + Sync + 'static,
    {
        self.references = Some(Arc::new(f));
        self
    }

    pub fn invalidate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arguments, &Value) -> Vec<Tag> + Send + Sync + 'static,
    {
        self.invalidate = Some(Arc::new(f));
        self
    }

    /// Override the default TTL for this field
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn finish(self, operation: OperationType, field_name: String) -> Policy {
        Policy {
            operation,
            field_name,
            references: self.references,
            invalidate: self.invalidate,
            ttl: self.ttl,
        }
    }
}

/// Immutable lookup table of policies keyed by operation type, then field name
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<OperationType, HashMap<String, Policy>>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// An empty registry: every field is skipped
    pub fn empty() -> Self {
        Self::default()
    }

    /// Find the policy of a field
    pub fn lookup(&self, operation: OperationType, field_name: &str) -> Option<&Policy> {
        self.policies.get(&operation)?.get(field_name)
    }

    pub fn len(&self) -> usize {
        self.policies.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Iterate over all registered policies
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values().flat_map(HashMap::values)
    }
}

/// Builder for [`PolicyRegistry`]
#[derive(Default)]
pub struct PolicyRegistryBuilder {
    policies: HashMap<OperationType, HashMap<String, Policy>>,
}

impl PolicyRegistryBuilder {
    /// Register a policy for a query field
    pub fn query(self, field_name: impl Into<String>, policy: PolicyBuilder) -> Self {
        self.policy(OperationType::Query, field_name, policy)
    }

    /// Register a policy for a mutation field
    pub fn mutation(self, field_name: impl Into<String>, policy: PolicyBuilder) -> Self {
        self.policy(OperationType::Mutation, field_name, policy)
    }

    /// Register a policy; a later registration for the same field replaces the earlier one
    pub fn policy(
        mut self,
        operation: OperationType,
        field_name: impl Into<String>,
        policy: PolicyBuilder,
    ) -> Self {
        let field_name = field_name.into();
        let policy = policy.finish(operation, field_name.clone());
        self.policies
            .entry(operation)
            .or_default()
            .insert(field_name, policy);
        self
    }

    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            policies: self.policies,
        }
    }
}

//! Root field resolvers
//!
//! | operation | field | arguments | result |
//! |-----------|-------|-----------|--------|
//! | query | `user` | `id` | user with its groups, or `null` |
//! | query | `users` | `page`, `size` | list of users |
//! | query | `group` | `id` | group with its users, or `null` |
//! | query | `groups` | `page`, `size` | list of groups |
//! | mutation | `addUser` | `user: {name}` | new user |
//! | mutation | `updateUser` | `id`, `user: {name}` | updated user |
//! | mutation | `removeUser` | `id` | removed id |
//! | mutation | `addGroup` | `group: {name}` | new group |
//! | mutation | `updateGroup` | `id`, `group: {name}` | updated group |
//! | mutation | `removeGroup` | `id` | removed id |
//! | mutation | `addUserToGroup` | `userId`, `groupId` | group |
//! | mutation | `removeUserFromGroup` | `userId`, `groupId` | group |
//!
//! Ids are accepted as numbers or numeric strings.

use crate::data::{DataError, DataStore, Group, User};
use fieldcache::{Arguments, OperationType};
use serde_json::{json, Value};
use thiserror::Error;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 3;

/// Errors returned by resolvers
///
/// Cloned to every caller sharing a deduplicated resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{0}")]
    NotFound(#[from] DataError),

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("unknown field {operation}.{field}")]
    UnknownField {
        operation: OperationType,
        field: String,
    },
}

/// Resolve one root field against the data store
pub async fn resolve_field(
    data: &DataStore,
    operation: OperationType,
    field: &str,
    args: &Arguments,
) -> Result<Value, ResolveError> {
    match (operation, field) {
        (OperationType::Query, "user") => {
            let id = id_arg(args, "id")?;
            match data.user(id).await {
                Some(user) => {
                    let groups = data.groups_of(id).await;
                    let mut groups_json = Vec::with_capacity(groups.len());
                    for group_id in groups {
                        if let Some(group) = data.group(group_id).await {
                            groups_json.push(json!({"id": group.id, "name": group.name}));
                        }
                    }
                    Ok(json!({"id": user.id, "name": user.name, "groups": groups_json}))
                }
                None => Ok(Value::Null),
            }
        }
        (OperationType::Query, "users") => {
            let (page, size) = page_args(args)?;
            let users = data.users(page, size).await;
            Ok(Value::Array(users.iter().map(user_json).collect()))
        }
        (OperationType::Query, "group") => {
            let id = id_arg(args, "id")?;
            match data.group(id).await {
                Some(group) => {
                    let members = data.users_by_id(&group.users).await;
                    let users: Vec<Value> = members.iter().map(user_json).collect();
                    Ok(json!({"id": group.id, "name": group.name, "users": users}))
                }
                None => Ok(Value::Null),
            }
        }
        (OperationType::Query, "groups") => {
            let (page, size) = page_args(args)?;
            let groups = data.groups(page, size).await;
            Ok(Value::Array(groups.iter().map(group_json).collect()))
        }

        (OperationType::Mutation, "addUser") => {
            let name = input_name(args, "user")?;
            Ok(user_json(&data.add_user(&name).await))
        }
        (OperationType::Mutation, "updateUser") => {
            let id = id_arg(args, "id")?;
            let name = input_name(args, "user")?;
            Ok(user_json(&data.update_user(id, &name).await?))
        }
        (OperationType::Mutation, "removeUser") => {
            let id = id_arg(args, "id")?;
            Ok(json!(data.remove_user(id).await?))
        }
        (OperationType::Mutation, "addGroup") => {
            let name = input_name(args, "group")?;
            Ok(group_json(&data.add_group(&name).await))
        }
        (OperationType::Mutation, "updateGroup") => {
            let id = id_arg(args, "id")?;
            let name = input_name(args, "group")?;
            Ok(group_json(&data.update_group(id, &name).await?))
        }
        (OperationType::Mutation, "removeGroup") => {
            let id = id_arg(args, "id")?;
            Ok(json!(data.remove_group(id).await?))
        }
        (OperationType::Mutation, "addUserToGroup") => {
            let user_id = id_arg(args, "userId")?;
            let group_id = id_arg(args, "groupId")?;
            Ok(group_json(&data.add_user_to_group(user_id, group_id).await?))
        }
        (OperationType::Mutation, "removeUserFromGroup") => {
            let user_id = id_arg(args, "userId")?;
            let group_id = id_arg(args, "groupId")?;
            Ok(group_json(
                &data.remove_user_from_group(user_id, group_id).await?,
            ))
        }

        _ => Err(ResolveError::UnknownField {
            operation,
            field: field.to_string(),
        }),
    }
}

fn user_json(user: &User) -> Value {
    json!({"id": user.id, "name": user.name})
}

fn group_json(group: &Group) -> Value {
    json!({"id": group.id, "name": group.name, "users": group.users})
}

/// Read an id given either as a number or a numeric string
pub fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn id_arg(args: &Arguments, name: &str) -> Result<u64, ResolveError> {
    let value = args.get(name).ok_or_else(|| invalid(name, "missing"))?;
    parse_id(value).ok_or_else(|| invalid(name, "expected a numeric id"))
}

fn page_args(args: &Arguments) -> Result<(usize, usize), ResolveError> {
    Ok((
        usize_arg(args, "page", DEFAULT_PAGE)?,
        usize_arg(args, "size", DEFAULT_PAGE_SIZE)?,
    ))
}

fn usize_arg(args: &Arguments, name: &str, default: usize) -> Result<usize, ResolveError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        // Negative values clamp like any other out-of-range page
        Some(Value::Number(n)) if n.as_i64().is_some_and(|v| v < 0) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| invalid(name, "expected an integer")),
        Some(_) => Err(invalid(name, "expected an integer")),
    }
}

fn input_name(args: &Arguments, input: &str) -> Result<String, ResolveError> {
    args.get(input)
        .and_then(|value| value.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(input, "expected an object with a string 'name'"))
}

fn invalid(name: &str, reason: &str) -> ResolveError {
    ResolveError::InvalidArgument {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

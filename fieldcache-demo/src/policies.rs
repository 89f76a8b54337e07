//! Caching policies for the sample schema
//!
//! Reads are tagged with the entities they return plus a collection tag for
//! lists. Mutations purge the collection and the touched entity only.
//! Renaming a group leaves its old name inside cached `user` results, and
//! removing a user leaves it listed in cached `group` results, until TTL.

use crate::schema::parse_id;
use fieldcache::{Arguments, Policy, PolicyRegistry, Tag};
use serde_json::Value;

pub fn user_tag(id: u64) -> Tag {
    format!("user:{}", id)
}

pub fn group_tag(id: u64) -> Tag {
    format!("group:{}", id)
}

pub const USERS: &str = "users";
pub const GROUPS: &str = "groups";

/// Policy table for every cached or invalidating root field
pub fn registry() -> PolicyRegistry {
    PolicyRegistry::builder()
        .query("user", Policy::references(|_, result| entity_tag(result, user_tag)))
        .query(
            "users",
            Policy::references(|_, result| list_tags(result, user_tag, USERS)),
        )
        .query("group", Policy::references(|_, result| entity_tag(result, group_tag)))
        .query(
            "groups",
            Policy::references(|_, result| list_tags(result, group_tag, GROUPS)),
        )
        .mutation("addUser", Policy::invalidate(|_, _| vec![USERS.to_string()]))
        .mutation(
            "updateUser",
            Policy::invalidate(|args, _| with_arg(vec![USERS.to_string()], args, "id", user_tag)),
        )
        .mutation(
            "removeUser",
            Policy::invalidate(|args, _| with_arg(vec![USERS.to_string()], args, "id", user_tag)),
        )
        .mutation("addGroup", Policy::invalidate(|_, _| vec![GROUPS.to_string()]))
        .mutation(
            "updateGroup",
            Policy::invalidate(|args, _| with_arg(vec![GROUPS.to_string()], args, "id", group_tag)),
        )
        .mutation(
            "removeGroup",
            Policy::invalidate(|args, _| with_arg(vec![GROUPS.to_string()], args, "id", group_tag)),
        )
        .mutation("addUserToGroup", Policy::invalidate(membership_tags))
        .mutation("removeUserFromGroup", Policy::invalidate(membership_tags))
        .build()
}

/// Tag of a single entity result; `null` yields none
fn entity_tag(result: &Value, tag: fn(u64) -> Tag) -> Vec<Tag> {
    result
        .get("id")
        .and_then(parse_id)
        .map(tag)
        .into_iter()
        .collect()
}

fn list_tags(result: &Value, tag: fn(u64) -> Tag, collection: &str) -> Vec<Tag> {
    let mut tags: Vec<Tag> = result
        .as_array()
        .map(|rows| rows.iter().flat_map(|row| entity_tag(row, tag)).collect())
        .unwrap_or_default();
    tags.push(collection.to_string());
    tags
}

fn with_arg(mut tags: Vec<Tag>, args: &Arguments, name: &str, tag: fn(u64) -> Tag) -> Vec<Tag> {
    if let Some(id) = args.get(name).and_then(parse_id) {
        tags.push(tag(id));
    }
    tags
}

fn membership_tags(args: &Arguments, _result: &Value) -> Vec<Tag> {
    let mut tags = with_arg(vec![GROUPS.to_string()], args, "groupId", group_tag);
    tags.push(USERS.to_string());
    with_arg(tags, args, "userId", user_tag)
}

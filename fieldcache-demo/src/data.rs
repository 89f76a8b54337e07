//! In-memory users and groups data
//!
//! Seeded with nine users and seven groups. Every resolver reads and writes
//! through a [`DataStore`]; nothing here knows about caching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

pub type UserId = u64;
pub type GroupId = u64;

/// Largest page size a list query may request
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub users: Vec<UserId>,
}

/// Failures of data mutations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("group {0} not found")]
    GroupNotFound(GroupId),
}

#[derive(Debug, Clone)]
struct GroupRecord {
    name: String,
    users: Vec<UserId>,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, String>,
    groups: BTreeMap<GroupId, GroupRecord>,
}

/// Shared sample data behind an async lock
pub struct DataStore {
    tables: RwLock<Tables>,
    user_latency: Duration,
}

impl DataStore {
    /// Store seeded with the sample users and groups
    pub fn seeded() -> Self {
        let users = [
            (1, "Alice"),
            (2, "Bob"),
            (3, "Charlie"),
            (4, "Dave"),
            (5, "Eve"),
            (6, "Frank"),
            (7, "Grace"),
            (8, "Heidi"),
            (9, "Irene"),
        ];
        let groups: [(GroupId, &str, &[UserId]); 7] = [
            (10, "Gamers", &[1, 2, 3]),
            (11, "Guitar Players", &[4, 5, 6]),
            (12, "Snowboarders", &[7, 8, 9]),
            (13, "Divers", &[3, 6, 9]),
            (14, "Surfers", &[2, 4, 6]),
            (15, "Bikers", &[1, 3, 5]),
            (16, "Basketball Players", &[4, 7, 8]),
        ];

        let tables = Tables {
            users: users
                .into_iter()
                .map(|(id, name)| (id, name.to_string()))
                .collect(),
            groups: groups
                .into_iter()
                .map(|(id, name, members)| {
                    (
                        id,
                        GroupRecord {
                            name: name.to_string(),
                            users: members.to_vec(),
                        },
                    )
                })
                .collect(),
        };

        Self {
            tables: RwLock::new(tables),
            user_latency: Duration::ZERO,
        }
    }

    /// Store without any users or groups
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            user_latency: Duration::ZERO,
        }
    }

    /// Delay every single-user lookup, simulating a slow backend
    pub fn with_user_latency(mut self, latency: Duration) -> Self {
        self.user_latency = latency;
        self
    }

    pub async fn user(&self, id: UserId) -> Option<User> {
        if !self.user_latency.is_zero() {
            debug!("Simulating {:?} latency for user {}", self.user_latency, id);
            tokio::time::sleep(self.user_latency).await;
        }

        let tables = self.tables.read().await;
        tables.users.get(&id).map(|name| User {
            id,
            name: name.clone(),
        })
    }

    /// One page of users in id order
    ///
    /// `page` is clamped to `[1, user count]` and `size` to
    /// `[1, MAX_PAGE_SIZE]`.
    pub async fn users(&self, page: usize, size: usize) -> Vec<User> {
        let tables = self.tables.read().await;
        let (skip, take) = page_window(tables.users.len(), page, size);
        tables
            .users
            .iter()
            .skip(skip)
            .take(take)
            .map(|(id, name)| User {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }

    pub async fn group(&self, id: GroupId) -> Option<Group> {
        let tables = self.tables.read().await;
        tables.groups.get(&id).map(|record| to_group(id, record))
    }

    /// One page of groups in id order, clamped like [`DataStore::users`]
    pub async fn groups(&self, page: usize, size: usize) -> Vec<Group> {
        let tables = self.tables.read().await;
        let (skip, take) = page_window(tables.groups.len(), page, size);
        tables
            .groups
            .iter()
            .skip(skip)
            .take(take)
            .map(|(id, record)| to_group(*id, record))
            .collect()
    }

    /// Ids of every group the user belongs to
    pub async fn groups_of(&self, user_id: UserId) -> Vec<GroupId> {
        let tables = self.tables.read().await;
        tables
            .groups
            .iter()
            .filter(|(_, record)| record.users.contains(&user_id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Names of the given users, skipping unknown ids
    pub async fn users_by_id(&self, ids: &[UserId]) -> Vec<User> {
        let tables = self.tables.read().await;
        ids.iter()
            .filter_map(|id| {
                tables.users.get(id).map(|name| User {
                    id: *id,
                    name: name.clone(),
                })
            })
            .collect()
    }

    pub async fn add_user(&self, name: &str) -> User {
        let mut tables = self.tables.write().await;
        let id = next_id(tables.users.keys());
        tables.users.insert(id, name.to_string());
        User {
            id,
            name: name.to_string(),
        }
    }

    pub async fn update_user(&self, id: UserId, name: &str) -> Result<User, DataError> {
        let mut tables = self.tables.write().await;
        let current = tables
            .users
            .get_mut(&id)
            .ok_or(DataError::UserNotFound(id))?;
        *current = name.to_string();
        Ok(User {
            id,
            name: name.to_string(),
        })
    }

    /// Delete a user and drop it from every group
    pub async fn remove_user(&self, id: UserId) -> Result<UserId, DataError> {
        let mut tables = self.tables.write().await;
        tables
            .users
            .remove(&id)
            .ok_or(DataError::UserNotFound(id))?;
        for record in tables.groups.values_mut() {
            record.users.retain(|member| *member != id);
        }
        Ok(id)
    }

    pub async fn add_group(&self, name: &str) -> Group {
        let mut tables = self.tables.write().await;
        let id = next_id(tables.groups.keys());
        let record = GroupRecord {
            name: name.to_string(),
            users: Vec::new(),
        };
        let group = to_group(id, &record);
        tables.groups.insert(id, record);
        group
    }

    /// Rename a group, keeping its members
    pub async fn update_group(&self, id: GroupId, name: &str) -> Result<Group, DataError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .groups
            .get_mut(&id)
            .ok_or(DataError::GroupNotFound(id))?;
        record.name = name.to_string();
        Ok(to_group(id, record))
    }

    pub async fn remove_group(&self, id: GroupId) -> Result<GroupId, DataError> {
        let mut tables = self.tables.write().await;
        tables
            .groups
            .remove(&id)
            .map(|_| id)
            .ok_or(DataError::GroupNotFound(id))
    }

    /// Add a member; adding an existing member is a no-op
    pub async fn add_user_to_group(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<Group, DataError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) {
            return Err(DataError::UserNotFound(user_id));
        }
        let record = tables
            .groups
            .get_mut(&group_id)
            .ok_or(DataError::GroupNotFound(group_id))?;
        if !record.users.contains(&user_id) {
            record.users.push(user_id);
        }
        Ok(to_group(group_id, record))
    }

    pub async fn remove_user_from_group(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<Group, DataError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .groups
            .get_mut(&group_id)
            .ok_or(DataError::GroupNotFound(group_id))?;
        record.users.retain(|member| *member != user_id);
        Ok(to_group(group_id, record))
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::seeded()
    }
}

fn to_group(id: GroupId, record: &GroupRecord) -> Group {
    Group {
        id,
        name: record.name.clone(),
        users: record.users.clone(),
    }
}

fn next_id<'a, I>(ids: I) -> u64
where
    I: Iterator<Item = &'a u64>,
{
    ids.max().map_or(1, |id| id + 1)
}

/// Rows to skip and take for a clamped page request
fn page_window(count: usize, page: usize, size: usize) -> (usize, usize) {
    let page = page.min(count).max(1);
    let size = size.clamp(1, MAX_PAGE_SIZE);
    ((page - 1) * size, size)
}

//! User entity state.
//!
//! Users are stored by user key. A secondary index maps each username to its
//! user key through a foreign key, so an index entry can never point at a user
//! that does not exist. Create, update and delete touch both families as one
//! atomic unit: inside the enclosing transaction if one is open, otherwise in
//! a transaction of their own.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{ColumnFamily, ColumnFamilyName, DbForeignKey, StateDb, TransactionContext};
use crate::error::{StateError, StateResult};
use crate::impl_bincode_value;

/// A user as issued by a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_key: u64,
    pub username: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

impl UserRecord {
    pub fn new(user_key: u64, username: impl Into<String>) -> Self {
        Self {
            user_key,
            username: username.into(),
            name: String::new(),
            email: String::new(),
            password: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }
}

/// The stored user aggregate: the record plus its memberships.
///
/// Memberships keep insertion order and contain no duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedUser {
    pub user: UserRecord,
    pub role_keys: Vec<u64>,
    pub group_keys: Vec<u64>,
    pub tenant_ids: Vec<String>,
}

impl PersistedUser {
    fn new(user: UserRecord) -> Self {
        Self {
            user,
            role_keys: Vec::new(),
            group_keys: Vec::new(),
            tenant_ids: Vec::new(),
        }
    }

    pub fn user_key(&self) -> u64 {
        self.user.user_key
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }
}

impl_bincode_value!(PersistedUser);

fn add_member<T: PartialEq>(members: &mut Vec<T>, value: T) {
    if !members.contains(&value) {
        members.push(value);
    }
}

fn remove_member<T: PartialEq>(members: &mut Vec<T>, value: &T) {
    members.retain(|member| member != value);
}

/// Narrow read access to users, for authorization and query layers.
pub trait UserStateReader {
    /// The user with `user_key`.
    fn get_user(&self, user_key: u64) -> StateResult<Option<PersistedUser>>;

    /// The user registered under `username`.
    fn get_user_by_username(&self, username: &str) -> StateResult<Option<PersistedUser>>;

    /// Tenant ids of the user, empty if the user does not exist.
    fn get_tenant_ids(&self, user_key: u64) -> StateResult<Vec<String>>;
}

/// Mutable user state.
#[derive(Clone)]
pub struct UserState {
    users: ColumnFamily<u64, PersistedUser>,
    user_key_by_username: ColumnFamily<String, DbForeignKey<u64>>,
    context: TransactionContext,
}

impl UserState {
    pub fn new(db: &StateDb) -> Self {
        Self {
            users: db.create_column_family(ColumnFamilyName::Users),
            user_key_by_username: db.create_column_family(ColumnFamilyName::UserKeyByUsername),
            context: db.context().clone(),
        }
    }

    /// Create a user and its username index entry.
    pub fn create(&self, user: &UserRecord) -> StateResult<()> {
        self.context.atomically(|| {
            self.users
                .insert(&user.user_key, &PersistedUser::new(user.clone()))?;
            self.user_key_by_username.insert(
                &user.username,
                &DbForeignKey::new(user.user_key, ColumnFamilyName::Users),
            )
        })?;
        debug!(user_key = user.user_key, username = %user.username, "Created user");
        Ok(())
    }

    /// Replace the user record, keeping its memberships.
    ///
    /// A changed username moves the index entry.
    pub fn update(&self, user: &UserRecord) -> StateResult<()> {
        self.context.atomically(|| self.update_both(user))
    }

    fn update_both(&self, user: &UserRecord) -> StateResult<()> {
        let Some(mut persisted) = self.users.get(&user.user_key)? else {
            // Raises the missing-key violation, or degrades to an upsert when
            // preconditions are disabled.
            return self
                .users
                .update(&user.user_key, &PersistedUser::new(user.clone()));
        };

        if persisted.user.username != user.username {
            self.user_key_by_username
                .delete_existing(&persisted.user.username)?;
            self.user_key_by_username.insert(
                &user.username,
                &DbForeignKey::new(user.user_key, ColumnFamilyName::Users),
            )?;
        }

        persisted.user = user.clone();
        self.users.update(&user.user_key, &persisted)
    }

    /// Delete the user and its username index entry.
    pub fn delete(&self, user_key: u64) -> StateResult<()> {
        self.context.atomically(|| {
            if let Some(persisted) = self.users.get(&user_key)? {
                self.user_key_by_username
                    .delete_existing(&persisted.user.username)?;
            }
            self.users.delete_existing(&user_key)
        })?;
        debug!(user_key, "Deleted user");
        Ok(())
    }

    pub fn add_role(&self, user_key: u64, role_key: u64) -> StateResult<()> {
        self.modify(user_key, |user| add_member(&mut user.role_keys, role_key))
    }

    pub fn remove_role(&self, user_key: u64, role_key: u64) -> StateResult<()> {
        self.modify(user_key, |user| remove_member(&mut user.role_keys, &role_key))
    }

    pub fn add_group(&self, user_key: u64, group_key: u64) -> StateResult<()> {
        self.modify(user_key, |user| add_member(&mut user.group_keys, group_key))
    }

    pub fn remove_group(&self, user_key: u64, group_key: u64) -> StateResult<()> {
        self.modify(user_key, |user| remove_member(&mut user.group_keys, &group_key))
    }

    pub fn add_tenant_id(&self, user_key: u64, tenant_id: &str) -> StateResult<()> {
        self.modify(user_key, |user| {
            add_member(&mut user.tenant_ids, tenant_id.to_string())
        })
    }

    pub fn remove_tenant_id(&self, user_key: u64, tenant_id: &str) -> StateResult<()> {
        self.modify(user_key, |user| {
            remove_member(&mut user.tenant_ids, &tenant_id.to_string())
        })
    }

    /// Read-modify-write of one user aggregate.
    fn modify(&self, user_key: u64, mutate: impl FnOnce(&mut PersistedUser)) -> StateResult<()> {
        let mut user = self
            .users
            .get(&user_key)?
            .ok_or_else(|| StateError::not_found("User", user_key))?;
        mutate(&mut user);
        self.users.update(&user_key, &user)
    }
}

impl UserStateReader for UserState {
    fn get_user(&self, user_key: u64) -> StateResult<Option<PersistedUser>> {
        self.users.get(&user_key)
    }

    fn get_user_by_username(&self, username: &str) -> StateResult<Option<PersistedUser>> {
        match self.user_key_by_username.get(&username.to_string())? {
            Some(fk) => self.users.get(fk.inner()),
            None => Ok(None),
        }
    }

    fn get_tenant_ids(&self, user_key: u64) -> StateResult<Vec<String>> {
        Ok(self
            .users
            .get(&user_key)?
            .map(|user| user.tenant_ids)
            .unwrap_or_default())
    }
}

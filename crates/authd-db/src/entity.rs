//! `EntityStore`: CRUD for users, groups, and memberships (spec.md §4.2).

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::connection::Store;
use crate::{Error, Result};

/// A synthesized user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub dir: String,
    pub shell: String,
    pub broker_id: String,
    pub locked: bool,
}

impl User {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            gecos: String::new(),
            dir: String::new(),
            shell: "/bin/bash".to_string(),
            broker_id: String::new(),
            locked: false,
        }
    }
}

/// A synthesized group row. `ugid` is empty for legacy rows with no
/// upstream stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub ugid: String,
}

impl Group {
    pub fn new(name: impl Into<String>, gid: u32, ugid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gid,
            ugid: ugid.into(),
        }
    }
}

/// A group and the names of its current members, per spec.md's
/// single-transaction join operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupWithMembers {
    pub group: Group,
    pub members: Vec<String>,
}

/// The result of `UserWithGroups`: a user plus both of its membership
/// lists, read in one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithGroups {
    pub user: User,
    pub groups: Vec<GroupWithMembers>,
    pub local_groups: Vec<String>,
}

pub struct EntityStore {
    store: std::sync::Arc<Store>,
}

impl EntityStore {
    pub fn new(store: std::sync::Arc<Store>) -> Self {
        Self { store }
    }

    // ---- reads ----

    pub fn user_by_id(&self, uid: u32) -> Result<User> {
        self.store.with_connection(|conn| {
            Self::query_user(conn, "uid = ?1", params![uid])?
                .ok_or_else(|| Error::not_found("user", uid.to_string()))
        })
    }

    pub fn user_by_name(&self, name: &str) -> Result<User> {
        let name = name.to_lowercase();
        self.store.with_connection(|conn| {
            Self::query_user(conn, "name = ?1", params![name])?
                .ok_or_else(|| Error::not_found("user", name.clone()))
        })
    }

    pub fn group_by_id(&self, gid: u32) -> Result<Group> {
        self.store.with_connection(|conn| {
            Self::query_group(conn, "gid = ?1", params![gid])?
                .ok_or_else(|| Error::not_found("group", gid.to_string()))
        })
    }

    pub fn group_by_name(&self, name: &str) -> Result<Group> {
        let name = name.to_lowercase();
        self.store.with_connection(|conn| {
            Self::query_group(conn, "name = ?1", params![name])?
                .ok_or_else(|| Error::not_found("group", name.clone()))
        })
    }

    pub fn group_by_ugid(&self, ugid: &str) -> Result<Group> {
        let ugid = ugid.to_lowercase();
        self.store.with_connection(|conn| {
            Self::query_group(conn, "ugid = ?1", params![ugid])?
                .ok_or_else(|| Error::not_found("group", ugid.clone()))
        })
    }

    pub fn group_with_members_by_id(&self, gid: u32) -> Result<GroupWithMembers> {
        self.store.transaction(|tx| {
            let group = Self::query_group(tx, "gid = ?1", params![gid])?
                .ok_or_else(|| Error::not_found("group", gid.to_string()))?;
            let members = Self::member_names(tx, group.gid)?;
            Ok(GroupWithMembers { group, members })
        })
    }

    pub fn group_with_members_by_name(&self, name: &str) -> Result<GroupWithMembers> {
        let name = name.to_lowercase();
        self.store.transaction(|tx| {
            let group = Self::query_group(tx, "name = ?1", params![name])?
                .ok_or_else(|| Error::not_found("group", name.clone()))?;
            let members = Self::member_names(tx, group.gid)?;
            Ok(GroupWithMembers { group, members })
        })
    }

    pub fn all_users(&self) -> Result<Vec<User>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, uid, gid, gecos, dir, shell, broker_id, locked FROM users ORDER BY uid",
            )?;
            let users = stmt
                .query_map([], Self::row_to_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }

    pub fn all_groups_with_members(&self) -> Result<Vec<GroupWithMembers>> {
        self.store.transaction(|tx| {
            let mut stmt =
                tx.prepare("SELECT name, gid, COALESCE(ugid, '') FROM groups ORDER BY gid")?;
            let groups = stmt
                .query_map([], Self::row_to_group)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut result = Vec::with_capacity(groups.len());
            for group in groups {
                let members = Self::member_names(tx, group.gid)?;
                result.push(GroupWithMembers { group, members });
            }
            Ok(result)
        })
    }

    /// Every group the user belongs to, with members. `NotFound` if the
    /// user currently has no memberships at all (spec.md §4.2).
    pub fn user_groups(&self, uid: u32) -> Result<Vec<GroupWithMembers>> {
        self.store.transaction(|tx| {
            let groups = Self::groups_for_user(tx, uid)?;
            if groups.is_empty() {
                return Err(Error::not_found("user_groups", uid.to_string()));
            }
            let mut result = Vec::with_capacity(groups.len());
            for group in groups {
                let members = Self::member_names(tx, group.gid)?;
                result.push(GroupWithMembers { group, members });
            }
            Ok(result)
        })
    }

    pub fn user_local_groups(&self, uid: u32) -> Result<Vec<String>> {
        self.store.with_connection(|conn| Self::local_group_names(conn, uid))
    }

    pub fn user_with_groups(&self, name: &str) -> Result<UserWithGroups> {
        let name = name.to_lowercase();
        self.store.transaction(|tx| {
            let user = Self::query_user(tx, "name = ?1", params![name])?
                .ok_or_else(|| Error::not_found("user", name.clone()))?;
            let groups = Self::groups_for_user(tx, user.uid)?;
            let mut group_results = Vec::with_capacity(groups.len());
            for group in groups {
                let members = Self::member_names(tx, group.gid)?;
                group_results.push(GroupWithMembers { group, members });
            }
            let local_groups = Self::local_group_names(tx, user.uid)?;
            Ok(UserWithGroups {
                user,
                groups: group_results,
                local_groups,
            })
        })
    }

    pub fn broker_for_user(&self, name: &str) -> Result<String> {
        let name = name.to_lowercase();
        self.store.with_connection(|conn| {
            conn.query_row("SELECT broker_id FROM users WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| Error::not_found("user", name.clone()))
        })
    }

    // ---- writes ----

    /// Reconciles a user, its authd-managed groups, and its local-group
    /// memberships in one transaction, per spec.md §4.2 steps 1-4.
    pub fn update_user_entry(
        &self,
        user: &User,
        authd_groups: &[Group],
        local_groups: &[String],
    ) -> Result<()> {
        let mut user = user.clone();
        user.name = user.name.to_lowercase();
        let authd_groups: Vec<Group> = authd_groups
            .iter()
            .cloned()
            .map(|mut g| {
                g.name = g.name.to_lowercase();
                g.ugid = g.ugid.to_lowercase();
                g
            })
            .collect();

        self.store.transaction(|tx| {
            let resolved = Self::reconcile_user(tx, &user)?;
            Self::upsert_user(tx, &resolved)?;

            for group in &authd_groups {
                Self::reconcile_group(tx, group)?;
            }

            tx.execute("DELETE FROM users_to_groups WHERE uid = ?1", params![user.uid])?;
            for group in &authd_groups {
                tx.execute(
                    "INSERT INTO users_to_groups (uid, gid) VALUES (?1, ?2)",
                    params![user.uid, group.gid],
                )
                .map_err(|e| Self::decorate_fk(tx, e, user.uid, Some(group.gid)))?;
            }

            tx.execute(
                "DELETE FROM users_to_local_groups WHERE uid = ?1",
                params![user.uid],
            )?;
            for name in local_groups {
                tx.execute(
                    "INSERT INTO users_to_local_groups (uid, group_name) VALUES (?1, ?2)",
                    params![user.uid, name],
                )
                .map_err(|e| Self::decorate_fk(tx, e, user.uid, None))?;
            }

            Ok(())
        })?;
        tracing::debug!(user = %user.name, uid = user.uid, "reconciled user entry");
        Ok(())
    }

    pub fn update_broker_for_user(&self, name: &str, broker_id: &str) -> Result<()> {
        let name = name.to_lowercase();
        self.store.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE users SET broker_id = ?1 WHERE name = ?2",
                params![broker_id, name],
            )?;
            if affected == 0 {
                return Err(Error::not_found("user", name.clone()));
            }
            Ok(())
        })?;
        tracing::debug!(user = %name, broker_id, "updated broker for user");
        Ok(())
    }

    pub fn update_locked_field_for_user(&self, name: &str, locked: bool) -> Result<()> {
        let name = name.to_lowercase();
        self.store.with_connection(|conn| {
            let affected =
                conn.execute("UPDATE users SET locked = ?1 WHERE name = ?2", params![locked, name])?;
            if affected == 0 {
                return Err(Error::not_found("user", name.clone()));
            }
            Ok(())
        })?;
        tracing::debug!(user = %name, locked, "updated locked field for user");
        Ok(())
    }

    pub fn set_shell(&self, name: &str, shell: &str) -> Result<()> {
        let name = name.to_lowercase();
        self.store.with_connection(|conn| {
            let affected =
                conn.execute("UPDATE users SET shell = ?1 WHERE name = ?2", params![shell, name])?;
            if affected == 0 {
                return Err(Error::not_found("user", name.clone()));
            }
            Ok(())
        })?;
        tracing::debug!(user = %name, shell, "set shell for user");
        Ok(())
    }

    pub fn delete_user(&self, uid: u32) -> Result<()> {
        self.store.with_connection(|conn| {
            let affected = conn.execute("DELETE FROM users WHERE uid = ?1", params![uid])?;
            if affected == 0 {
                return Err(Error::not_found("user", uid.to_string()));
            }
            Ok(())
        })?;
        tracing::debug!(uid, "deleted user");
        Ok(())
    }

    pub fn remove_user_from_group(&self, uid: u32, gid: u32) -> Result<()> {
        self.store.with_connection(|conn| {
            conn.execute(
                "DELETE FROM users_to_groups WHERE uid = ?1 AND gid = ?2",
                params![uid, gid],
            )?;
            Ok(())
        })?;
        tracing::debug!(uid, gid, "removed user from group");
        Ok(())
    }

    // ---- internals ----

    fn reconcile_user(tx: &Connection, user: &User) -> Result<User> {
        match Self::query_user(tx, "uid = ?1", params![user.uid])? {
            Some(existing) => {
                if existing.name != user.name {
                    return Err(Error::Conflict(format!(
                        "uid {} already belongs to user '{}'",
                        user.uid, existing.name
                    )));
                }
                let mut resolved = user.clone();
                if !existing.dir.is_empty() && existing.dir != user.dir {
                    resolved.dir = existing.dir;
                }
                if !existing.shell.is_empty() && existing.shell != user.shell {
                    resolved.shell = existing.shell;
                }
                Ok(resolved)
            }
            None => Ok(user.clone()),
        }
    }

    fn upsert_user(tx: &Connection, user: &User) -> Result<()> {
        tx.execute(
            "INSERT INTO users (name, uid, gid, gecos, dir, shell, broker_id, locked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(uid) DO UPDATE SET
                gid = excluded.gid,
                gecos = excluded.gecos,
                dir = excluded.dir,
                shell = excluded.shell,
                broker_id = excluded.broker_id,
                locked = excluded.locked",
            params![
                user.name,
                user.uid,
                user.gid,
                user.gecos,
                user.dir,
                user.shell,
                user.broker_id,
                user.locked
            ],
        )
        .map_err(|e| Self::decorate_unique(e, "name", &user.name))?;
        Ok(())
    }

    fn reconcile_group(tx: &Connection, group: &Group) -> Result<()> {
        if let Some(existing) = Self::query_group(tx, "gid = ?1", params![group.gid])? {
            if !existing.ugid.is_empty() && existing.ugid != group.ugid {
                return Err(Error::Conflict(format!(
                    "gid {} already belongs to group '{}' with a different ugid",
                    group.gid, existing.name
                )));
            }
        }
        tx.execute(
            "INSERT INTO groups (name, gid, ugid) VALUES (?1, ?2, ?3)
             ON CONFLICT(gid) DO UPDATE SET name = excluded.name, ugid = excluded.ugid",
            params![group.name, group.gid, Self::opt_ugid(&group.ugid)],
        )
        .map_err(|e| Self::decorate_unique(e, "name/ugid", &group.name))?;
        Ok(())
    }

    fn groups_for_user(tx: &Connection, uid: u32) -> Result<Vec<Group>> {
        let mut stmt = tx.prepare(
            "SELECT g.name, g.gid, COALESCE(g.ugid, '')
             FROM groups g JOIN users_to_groups utg ON utg.gid = g.gid
             WHERE utg.uid = ?1 ORDER BY g.gid",
        )?;
        let groups = stmt
            .query_map(params![uid], Self::row_to_group)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    fn local_group_names(conn: &Connection, uid: u32) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT group_name FROM users_to_local_groups WHERE uid = ?1 ORDER BY group_name",
        )?;
        let names = stmt
            .query_map(params![uid], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn member_names(tx: &Connection, gid: u32) -> Result<Vec<String>> {
        let mut stmt = tx.prepare(
            "SELECT u.name FROM users_to_groups utg JOIN users u ON u.uid = utg.uid
             WHERE utg.gid = ?1 ORDER BY u.name",
        )?;
        let names = stmt
            .query_map(params![gid], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn query_user(
        conn: &Connection,
        predicate: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<User>> {
        let sql = format!(
            "SELECT name, uid, gid, gecos, dir, shell, broker_id, locked FROM users WHERE {predicate}"
        );
        Ok(conn.query_row(&sql, params, Self::row_to_user).optional()?)
    }

    fn query_group(
        conn: &Connection,
        predicate: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Group>> {
        let sql = format!("SELECT name, gid, COALESCE(ugid, '') FROM groups WHERE {predicate}");
        Ok(conn.query_row(&sql, params, Self::row_to_group).optional()?)
    }

    pub(crate) fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            name: row.get(0)?,
            uid: row.get::<_, i64>(1)? as u32,
            gid: row.get::<_, i64>(2)? as u32,
            gecos: row.get(3)?,
            dir: row.get(4)?,
            shell: row.get(5)?,
            broker_id: row.get(6)?,
            locked: row.get(7)?,
        })
    }

    fn row_to_group(row: &Row) -> rusqlite::Result<Group> {
        Ok(Group {
            name: row.get(0)?,
            gid: row.get::<_, i64>(1)? as u32,
            ugid: row.get(2)?,
        })
    }

    fn opt_ugid(ugid: &str) -> Option<&str> {
        if ugid.is_empty() {
            None
        } else {
            Some(ugid)
        }
    }

    /// Decorates a UNIQUE-constraint failure with the offending field,
    /// matching spec.md §4.2's "Conflict" surfacing for name/ugid clashes.
    fn decorate_unique(err: rusqlite::Error, field: &str, value: &str) -> Error {
        if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &err {
            if msg.contains("UNIQUE constraint failed") {
                return Error::Conflict(format!("{field} '{value}' already in use"));
            }
        }
        Error::Sqlite(err)
    }

    /// Decorates a foreign-key violation by probing whether the user/group
    /// actually exist, per spec.md §4.2 step 3.
    fn decorate_fk(tx: &Connection, err: rusqlite::Error, uid: u32, gid: Option<u32>) -> Error {
        let user_exists = tx
            .query_row("SELECT 1 FROM users WHERE uid = ?1", params![uid], |_| Ok(()))
            .optional()
            .unwrap_or(None)
            .is_some();
        if !user_exists {
            return Error::Conflict(format!("foreign key violation: user uid {uid} does not exist"));
        }
        if let Some(gid) = gid {
            let group_exists = tx
                .query_row("SELECT 1 FROM groups WHERE gid = ?1", params![gid], |_| Ok(()))
                .optional()
                .unwrap_or(None)
                .is_some();
            if !group_exists {
                return Error::Conflict(format!(
                    "foreign key violation: group gid {gid} does not exist"
                ));
            }
        }
        Error::Sqlite(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> Arc<Store> {
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        Arc::new(Store::open(dir.path()).unwrap())
    }

    #[test]
    fn insert_then_lookup() {
        let entities = EntityStore::new(store());
        let user = User::new("user1", 1111, 11111);
        let group = Group::new("group1", 11111, "12345678");
        entities.update_user_entry(&user, &[group.clone()], &[]).unwrap();

        let found = entities.user_by_id(1111).unwrap();
        assert_eq!(found.name, "user1");
        let groups = entities.user_groups(1111).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group.name, "group1");
        assert_eq!(groups[0].members, vec!["user1"]);
    }

    #[test]
    fn conflicting_uid_rename_is_rejected() {
        let entities = EntityStore::new(store());
        let user = User::new("user1", 1111, 11111);
        entities.update_user_entry(&user, &[], &[]).unwrap();

        let renamed = User::new("newuser1", 1111, 11111);
        let err = entities.update_user_entry(&renamed, &[], &[]).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        assert_eq!(entities.user_by_id(1111).unwrap().name, "user1");
    }

    #[test]
    fn dir_and_shell_are_sticky() {
        let entities = EntityStore::new(store());
        let mut user = User::new("user1", 1111, 11111);
        user.dir = "/home/user1".to_string();
        user.shell = "/bin/zsh".to_string();
        entities.update_user_entry(&user, &[], &[]).unwrap();

        let mut update = User::new("user1", 1111, 11111);
        update.dir = "/home/elsewhere".to_string();
        update.shell = "/bin/sh".to_string();
        entities.update_user_entry(&update, &[], &[]).unwrap();

        let found = entities.user_by_id(1111).unwrap();
        assert_eq!(found.dir, "/home/user1");
        assert_eq!(found.shell, "/bin/zsh");
    }

    #[test]
    fn update_user_entry_is_idempotent() {
        let entities = EntityStore::new(store());
        let user = User::new("user1", 1111, 11111);
        let group = Group::new("group1", 11111, "abc");
        entities
            .update_user_entry(&user, &[group.clone()], &["wheel".to_string()])
            .unwrap();
        entities
            .update_user_entry(&user, &[group.clone()], &["wheel".to_string()])
            .unwrap();

        assert_eq!(entities.user_groups(1111).unwrap().len(), 1);
        assert_eq!(entities.user_local_groups(1111).unwrap(), vec!["wheel"]);
    }

    #[test]
    fn delete_user_cascades_memberships_but_not_group() {
        let entities = EntityStore::new(store());
        let user1 = User::new("user1", 1111, 11111);
        let user2 = User::new("user2", 2222, 22222);
        let group = Group::new("group1", 11111, "abc");
        entities.update_user_entry(&user1, &[group.clone()], &[]).unwrap();
        entities.update_user_entry(&user2, &[group.clone()], &[]).unwrap();

        entities.delete_user(1111).unwrap();

        assert!(matches!(
            entities.user_by_id(1111).unwrap_err(),
            Error::NotFound { .. }
        ));
        let members = entities.group_with_members_by_id(11111).unwrap().members;
        assert_eq!(members, vec!["user2"]);
    }

    #[test]
    fn delete_user_not_found() {
        let entities = EntityStore::new(store());
        assert!(matches!(
            entities.delete_user(9999).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn group_by_ugid_distinguishes_rename_from_new_group() {
        let entities = EntityStore::new(store());
        let user = User::new("user1", 1111, 11111);
        let group = Group::new("displayname-one", 11111, "stable-ugid");
        entities.update_user_entry(&user, &[group], &[]).unwrap();

        let renamed_group = Group::new("displayname-two", 11111, "stable-ugid");
        entities.update_user_entry(&user, &[renamed_group], &[]).unwrap();

        let found = entities.group_by_ugid("stable-ugid").unwrap();
        assert_eq!(found.name, "displayname-two");
        assert_eq!(found.gid, 11111);
    }

    #[test]
    fn update_user_entry_lowercases_names_and_ugid() {
        let entities = EntityStore::new(store());
        let user = User::new("Alice", 1111, 11111);
        let group = Group::new("Staff", 11111, "Stable-UGID");
        entities.update_user_entry(&user, &[group], &[]).unwrap();

        let found = entities.user_by_id(1111).unwrap();
        assert_eq!(found.name, "alice");
        let group = entities.group_by_id(11111).unwrap();
        assert_eq!(group.name, "staff");
        assert_eq!(group.ugid, "stable-ugid");
    }

    #[test]
    fn reconcile_group_rejects_clearing_an_existing_ugid() {
        let entities = EntityStore::new(store());
        let user = User::new("user1", 1111, 11111);
        let group = Group::new("staff", 11111, "stable-ugid");
        entities.update_user_entry(&user, &[group], &[]).unwrap();

        let without_ugid = Group::new("staff", 11111, "");
        let err = entities.update_user_entry(&user, &[without_ugid], &[]).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        assert_eq!(entities.group_by_id(11111).unwrap().ugid, "stable-ugid");
    }
}

//! `ReassignmentEngine`: reassigns a user's uid or a group's gid in place,
//! cascading the change across every referencing row (spec.md §4.3).
//!
//! SQLite refuses `PRAGMA foreign_keys` changes while a transaction is
//! open, so the toggle happens on the bare connection via
//! [`Store::with_connection`] before the reassignment's own transaction
//! begins, and again (best-effort) after it ends.

use rusqlite::{params, Connection, OptionalExtension};

use crate::connection::Store;
use crate::entity::{EntityStore, User};
use crate::{Error, Result};

pub struct ReassignmentEngine<'a> {
    store: &'a Store,
}

impl<'a> ReassignmentEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Reassigns `old_uid` to `new_uid`, updating `users`,
    /// `users_to_groups`, and `users_to_local_groups` so every reference
    /// follows the user to its new id.
    pub fn set_user_id(&self, old_uid: u32, new_uid: u32) -> Result<()> {
        if old_uid == new_uid {
            return Ok(());
        }

        self.store.with_connection(|conn| {
            conn.pragma_update(None, "foreign_keys", "OFF")?;
            Ok(())
        })?;

        let result = self.store.transaction(|tx| {
            let taken = Self::row_exists(tx, "users", "uid", new_uid)?;
            if taken {
                return Err(Error::Conflict(format!("uid {new_uid} is already in use")));
            }
            let exists = Self::row_exists(tx, "users", "uid", old_uid)?;
            if !exists {
                return Err(Error::not_found("user", old_uid.to_string()));
            }

            tx.execute("UPDATE users SET uid = ?1 WHERE uid = ?2", params![new_uid, old_uid])?;
            tx.execute(
                "UPDATE users_to_groups SET uid = ?1 WHERE uid = ?2",
                params![new_uid, old_uid],
            )?;
            tx.execute(
                "UPDATE users_to_local_groups SET uid = ?1 WHERE uid = ?2",
                params![new_uid, old_uid],
            )?;
            Ok(())
        });

        self.reenable_foreign_keys();
        if result.is_ok() {
            tracing::debug!(old_uid, new_uid, "reassigned user id");
        }
        result
    }

    /// Reassigns `old_gid` to `new_gid`, updating `groups`,
    /// `users.gid` (the user's default group), and `users_to_groups`.
    /// Returns every user whose default group changed, so the caller can
    /// chown their home directories.
    pub fn set_group_id(&self, old_gid: u32, new_gid: u32) -> Result<Vec<User>> {
        if old_gid == new_gid {
            return Ok(Vec::new());
        }

        self.store.with_connection(|conn| {
            conn.pragma_update(None, "foreign_keys", "OFF")?;
            Ok(())
        })?;

        let result = self.store.transaction(|tx| {
            let taken = Self::row_exists(tx, "groups", "gid", new_gid)?;
            if taken {
                return Err(Error::Conflict(format!("gid {new_gid} is already in use")));
            }
            let exists = Self::row_exists(tx, "groups", "gid", old_gid)?;
            if !exists {
                return Err(Error::not_found("group", old_gid.to_string()));
            }

            let mut stmt = tx.prepare(
                "SELECT name, uid, gid, gecos, dir, shell, broker_id, locked FROM users WHERE gid = ?1",
            )?;
            let affected = stmt
                .query_map(params![old_gid], EntityStore::row_to_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            tx.execute("UPDATE groups SET gid = ?1 WHERE gid = ?2", params![new_gid, old_gid])?;
            tx.execute("UPDATE users SET gid = ?1 WHERE gid = ?2", params![new_gid, old_gid])?;
            tx.execute(
                "UPDATE users_to_groups SET gid = ?1 WHERE gid = ?2",
                params![new_gid, old_gid],
            )?;

            Ok(affected
                .into_iter()
                .map(|mut u| {
                    u.gid = new_gid;
                    u
                })
                .collect())
        });

        self.reenable_foreign_keys();
        if result.is_ok() {
            tracing::debug!(old_gid, new_gid, "reassigned group id");
        }
        result
    }

    fn reenable_foreign_keys(&self) {
        let reenabled = self.store.with_connection(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        if let Err(e) = reenabled {
            tracing::error!(error = %e, "failed to re-enable foreign_keys after reassignment");
        }
    }

    fn row_exists(tx: &Connection, table: &str, column: &str, value: u32) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {table} WHERE {column} = ?1");
        Ok(tx
            .query_row(&sql, params![value], |_| Ok(()))
            .optional()?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityStore, Group, User};
    use std::sync::Arc;

    fn store() -> Arc<Store> {
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        Arc::new(Store::open(dir.path()).unwrap())
    }

    #[test]
    fn set_user_id_cascades_to_memberships() {
        let store = store();
        let entities = EntityStore::new(store.clone());
        let user = User::new("user1", 1111, 11111);
        let group = Group::new("group1", 11111, "abc");
        entities
            .update_user_entry(&user, &[group], &["wheel".to_string()])
            .unwrap();

        ReassignmentEngine::new(&store).set_user_id(1111, 2222).unwrap();

        assert!(matches!(
            entities.user_by_id(1111).unwrap_err(),
            Error::NotFound { .. }
        ));
        let moved = entities.user_by_id(2222).unwrap();
        assert_eq!(moved.name, "user1");
        assert_eq!(entities.user_groups(2222).unwrap().len(), 1);
        assert_eq!(entities.user_local_groups(2222).unwrap(), vec!["wheel"]);
    }

    #[test]
    fn set_user_id_rejects_collision() {
        let store = store();
        let entities = EntityStore::new(store.clone());
        entities.update_user_entry(&User::new("user1", 1111, 11111), &[], &[]).unwrap();
        entities.update_user_entry(&User::new("user2", 2222, 22222), &[], &[]).unwrap();

        let err = ReassignmentEngine::new(&store).set_user_id(1111, 2222).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(entities.user_by_id(1111).unwrap().name, "user1");
    }

    #[test]
    fn set_group_id_updates_default_group_and_memberships() {
        let store = store();
        let entities = EntityStore::new(store.clone());
        let user = User::new("user1", 1111, 11111);
        let group = Group::new("group1", 11111, "abc");
        entities.update_user_entry(&user, &[group], &[]).unwrap();

        let affected = ReassignmentEngine::new(&store).set_group_id(11111, 22222).unwrap();

        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].name, "user1");
        assert_eq!(affected[0].gid, 22222);
        assert_eq!(entities.user_by_id(1111).unwrap().gid, 22222);
        assert_eq!(entities.group_with_members_by_id(22222).unwrap().members, vec!["user1"]);
    }

    #[test]
    fn set_group_id_is_noop_when_unchanged() {
        let store = store();
        let entities = EntityStore::new(store.clone());
        entities.update_user_entry(&User::new("user1", 1111, 11111), &[], &[]).unwrap();
        let affected = ReassignmentEngine::new(&store).set_group_id(11111, 11111).unwrap();
        assert!(affected.is_empty());
    }

    #[test]
    fn set_user_id_is_noop_when_unchanged() {
        let store = store();
        let entities = EntityStore::new(store.clone());
        entities.update_user_entry(&User::new("user1", 1111, 11111), &[], &[]).unwrap();
        ReassignmentEngine::new(&store).set_user_id(1111, 1111).unwrap();
        assert_eq!(entities.user_by_id(1111).unwrap().name, "user1");
    }
}

//! `MigrationPipeline`: applies ordered, idempotent schema migrations
//! (spec.md §4.5). The only migration defined so far lowercases legacy
//! mixed-case user and group names, keeping `/etc/group` in lockstep with
//! the database so the two never disagree about a member's name.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::params;

use authd_groupfile::GroupFileCoordinator;

use crate::connection::Store;
use crate::Result;

const CURRENT_SCHEMA_VERSION: i64 = 1;

pub struct MigrationPipeline {
    group_file: Arc<GroupFileCoordinator>,
}

impl MigrationPipeline {
    pub fn new(group_file: Arc<GroupFileCoordinator>) -> Self {
        Self { group_file }
    }

    /// Brings `store` up to [`CURRENT_SCHEMA_VERSION`], a no-op if it is
    /// already current.
    pub fn migrate(&self, store: &Store) -> Result<()> {
        let version = Self::read_version(store)?;
        if version >= CURRENT_SCHEMA_VERSION {
            tracing::debug!(version, "identity database schema already current");
            return Ok(());
        }

        self.lowercase_names(store)?;
        Self::write_version(store, CURRENT_SCHEMA_VERSION)?;
        tracing::info!(
            from = version,
            to = CURRENT_SCHEMA_VERSION,
            "applied identity database migrations"
        );
        Ok(())
    }

    fn read_version(store: &Store) -> Result<i64> {
        store.with_connection(|conn| {
            Ok(conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?)
        })
    }

    fn write_version(store: &Store, version: i64) -> Result<()> {
        store.with_connection(|conn| {
            conn.execute("UPDATE schema_version SET version = ?1", params![version])?;
            Ok(())
        })
    }

    /// 1. Delete groups whose `LOWER(name)` collides with another group's,
    ///    keeping the one with the smallest gid (gid is `INTEGER PRIMARY
    ///    KEY`, i.e. sqlite's rowid).
    /// 2. Collect every user/group whose stored name isn't already
    ///    lowercase.
    /// 3. Rewrite `/etc/group` first, so a crash between steps leaves the
    ///    group file (the thing `getgrnam(3)` actually reads) already
    ///    correct and the database migration merely repeats on restart.
    /// 4. Rename both tables' rows and lowercase any `ugid` that still
    ///    matches a group's own (pre-rename) `name` column, in a single
    ///    transaction.
    fn lowercase_names(&self, store: &Store) -> Result<()> {
        Self::delete_conflicting_groups(store)?;

        let user_renames = Self::collect_renames(store, "users", "uid")?;
        let group_renames = Self::collect_renames(store, "groups", "gid")?;

        if user_renames.is_empty() && group_renames.is_empty() {
            return Ok(());
        }

        let old_names: Vec<String> = user_renames
            .iter()
            .chain(group_renames.iter())
            .map(|(_, old, _)| old.clone())
            .collect();
        let new_names: Vec<String> = user_renames
            .iter()
            .chain(group_renames.iter())
            .map(|(_, _, new)| new.clone())
            .collect();
        self.group_file.rename_users(&old_names, &new_names)?;

        store.transaction(|tx| {
            for (id, _, new) in &user_renames {
                tx.execute("UPDATE users SET name = ?1 WHERE uid = ?2", params![new, id])?;
            }
            // Matches ugid against each group's pre-rename name, so this
            // must run before the group-name rename loop below.
            tx.execute_batch("UPDATE groups SET ugid = LOWER(ugid) WHERE ugid = name;")?;
            for (id, _, new) in &group_renames {
                tx.execute("UPDATE groups SET name = ?1 WHERE gid = ?2", params![new, id])?;
            }
            Ok(())
        })
    }

    /// Deletes the non-minimum-gid row(s) of any group name that collides
    /// with another group's name once both are lowercased, per spec.md
    /// §4.5 step 5. Memberships of the deleted group cascade away.
    fn delete_conflicting_groups(store: &Store) -> Result<()> {
        store.transaction(|tx| {
            let mut by_lower: HashMap<String, Vec<u32>> = HashMap::new();
            {
                let mut stmt = tx.prepare("SELECT gid, name FROM groups")?;
                let rows = stmt
                    .query_map([], |row| {
                        let gid: i64 = row.get(0)?;
                        let name: String = row.get(1)?;
                        Ok((gid as u32, name))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for (gid, name) in rows {
                    by_lower.entry(name.to_lowercase()).or_default().push(gid);
                }
            }

            for (lower_name, mut gids) in by_lower {
                if gids.len() < 2 {
                    continue;
                }
                gids.sort_unstable();
                let (keep, duplicates) = gids.split_first().expect("checked len >= 2 above");
                for gid in duplicates {
                    tracing::warn!(
                        gid = *gid,
                        kept_gid = *keep,
                        name = %lower_name,
                        "deleting case-colliding duplicate group"
                    );
                    tx.execute("DELETE FROM groups WHERE gid = ?1", params![gid])?;
                }
            }
            Ok(())
        })
    }

    fn collect_renames(store: &Store, table: &str, id_column: &str) -> Result<Vec<(u32, String, String)>> {
        store.with_connection(|conn| {
            let sql = format!("SELECT {id_column}, name FROM {table}");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    let id: i64 = row.get(0)?;
                    let name: String = row.get(1)?;
                    Ok((id as u32, name))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|(id, name)| {
                    let lower = name.to_lowercase();
                    if lower != name {
                        Some((id, name, lower))
                    } else {
                        None
                    }
                })
                .collect())
        })
    }
}

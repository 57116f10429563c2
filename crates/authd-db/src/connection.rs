//! `SchemaManager`: opens/creates `authd.db`, enforces its file mode, and
//! applies ordered schema migrations (spec.md §4.1).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::migrations::MigrationPipeline;
use crate::schema::CREATE_SCHEMA_SQL;
use crate::{Error, Result};

const DB_FILE_NAME: &str = "authd.db";
const ALLOWED_MODE_MASK: u32 = 0o600;

/// Owns the on-disk SQLite connection and all transaction plumbing for the
/// identity database.
pub struct Store {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) `<dir>/authd.db`.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            return Err(Error::not_found("directory", dir.display().to_string()));
        }

        let db_path = dir.join(DB_FILE_NAME);
        let existed = db_path.exists();

        if existed {
            Self::check_permissions(&db_path)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        if existed {
            Self::check_not_corrupt(&conn)?;
        } else {
            if let Err(e) = Self::create_schema(&conn) {
                drop(conn);
                let _ = fs::remove_file(&db_path);
                return Err(e);
            }
            fs::set_permissions(&db_path, fs::Permissions::from_mode(ALLOWED_MODE_MASK))?;
        }

        tracing::debug!(path = %db_path.display(), created = !existed, "opened identity database");

        Ok(Self {
            path: db_path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_permissions(db_path: &Path) -> Result<()> {
        let meta = fs::metadata(db_path)?;
        let mode = meta.permissions().mode() & 0o777;
        if mode & !ALLOWED_MODE_MASK != 0 {
            return Err(Error::Permission(format!(
                "{} has mode {:o}, which exceeds the allowed {:o}",
                db_path.display(),
                mode,
                ALLOWED_MODE_MASK
            )));
        }
        Ok(())
    }

    fn check_not_corrupt(conn: &Connection) -> Result<()> {
        conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::Corrupt(e.to_string()))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(CREATE_SCHEMA_SQL)?;
        Ok(())
    }

    /// Runs `f` inside a single SQL transaction, committing on success and
    /// rolling back on error so callers see all-or-nothing effects.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Corrupt("identity database mutex poisoned".into()))?;
        let tx = conn.unchecked_transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }

    /// Runs `f` with direct connection access but no transaction wrapper,
    /// used only by [`crate::reassignment::ReassignmentEngine`], which must
    /// disable foreign keys outside any transaction (spec.md §4.3 step 1).
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Corrupt("identity database mutex poisoned".into()))?;
        f(&conn)
    }

    /// Applies pending schema migrations, coordinating with the group-file
    /// editor for the lowercase-normalization migration (spec.md §4.5).
    pub fn apply_migrations(&self, group_file: Arc<authd_groupfile::GroupFileCoordinator>) -> Result<()> {
        MigrationPipeline::new(group_file).migrate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_db_with_mode_0600() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let meta = fs::metadata(store.path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn open_rejects_missing_directory() {
        let missing = Path::new("/nonexistent-authd-test-dir");
        let err = Store::open(missing).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn open_rejects_overly_permissive_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(DB_FILE_NAME);
        fs::write(&db_path, b"").unwrap();
        fs::set_permissions(&db_path, fs::Permissions::from_mode(0o644)).unwrap();

        let err = Store::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
    }

    #[test]
    fn open_rejects_corrupt_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(DB_FILE_NAME);
        fs::write(&db_path, b"not a sqlite file").unwrap();
        fs::set_permissions(&db_path, fs::Permissions::from_mode(0o600)).unwrap();

        let err = Store::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let result: Result<()> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO users (name, uid, gid) VALUES ('a', 1, 1)",
                [],
            )?;
            Err(Error::Conflict("forced rollback".into()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_connection(|c| Ok(c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}

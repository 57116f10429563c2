//! `GroupFileCoordinator`: safe, lock-guarded, atomic editing of
//! `/etc/group` during schema migration (spec.md §4.4).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::line::{parse_group_file, render_group_file};
use crate::lock::LockPrimitive;
use crate::Result;

pub struct GroupFileCoordinator {
    path: PathBuf,
    lock: Arc<dyn LockPrimitive>,
    lock_timeout: Duration,
}

impl GroupFileCoordinator {
    pub fn new<P: Into<PathBuf>>(
        path: P,
        lock: Arc<dyn LockPrimitive>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            lock,
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames users across every line of the group file: any member equal
    /// to `old_names[i]` becomes `new_names[i]`. `old_names` and
    /// `new_names` must be the same length; callers (the migration
    /// pipeline) are responsible for that invariant.
    pub fn rename_users(&self, old_names: &[String], new_names: &[String]) -> Result<()> {
        self.lock.write_lock(self.lock_timeout)?;
        let result = self.rename_users_locked(old_names, new_names);
        self.lock.write_unlock()?;
        result
    }

    fn rename_users_locked(&self, old_names: &[String], new_names: &[String]) -> Result<()> {
        let original_content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let (mut lines, trailing_newline) = parse_group_file(&original_content)?;

        for line in &mut lines {
            for (old, new) in old_names.iter().zip(new_names.iter()) {
                line.rename_member(old, new);
            }
        }

        let new_content = render_group_file(&lines, trailing_newline);
        if new_content == original_content {
            tracing::debug!(path = %self.path.display(), "group file unchanged by rename, skipping rewrite");
            return Ok(());
        }

        let original_is_symlink = self
            .path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        let backup_path = self.backup_path();
        let snapshot_dir = self.snapshot_prior_backup(&backup_path)?;

        let backup_is_dir = backup_path.is_dir();
        if backup_path.exists() {
            if backup_is_dir {
                tracing::warn!(
                    path = %backup_path.display(),
                    "existing group-file backup is a directory, leaving it in place"
                );
            } else if let Err(e) = fs::remove_file(&backup_path) {
                tracing::warn!(error = %e, path = %backup_path.display(), "failed to remove previous group-file backup");
            }
        }

        if backup_is_dir {
            tracing::warn!(
                path = %backup_path.display(),
                "skipping group-file backup creation because the backup path is a directory"
            );
        } else {
            let backup_result = if original_is_symlink {
                fs::write(&backup_path, &original_content)
            } else {
                fs::rename(&self.path, &backup_path)
            };
            if let Err(e) = backup_result {
                self.restore_prior_backup(&snapshot_dir, &backup_path);
                return Err(e.into());
            }
        }

        let plus_path = self.plus_path();
        fs::write(&plus_path, &new_content)?;
        fs::set_permissions(&plus_path, fs::Permissions::from_mode(0o644))?;

        let rename_target = if original_is_symlink {
            self.resolve_symlink_target()?
        } else {
            self.path.clone()
        };
        fs::rename(&plus_path, &rename_target)?;

        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let mut s = self.path.clone().into_os_string();
        s.push("-");
        PathBuf::from(s)
    }

    fn plus_path(&self) -> PathBuf {
        let mut s = self.path.clone().into_os_string();
        s.push("+");
        PathBuf::from(s)
    }

    fn resolve_symlink_target(&self) -> Result<PathBuf> {
        let resolved = fs::read_link(&self.path)?;
        if resolved.is_absolute() {
            Ok(resolved)
        } else {
            let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
            Ok(parent.join(resolved))
        }
    }

    /// Snapshots a pre-existing backup into a temp directory so it can be
    /// restored if creating the new backup fails. Returns the snapshot
    /// directory if a snapshot was taken.
    fn snapshot_prior_backup(&self, backup_path: &Path) -> Result<Option<tempfile::TempDir>> {
        if !backup_path.is_file() {
            return Ok(None);
        }
        let dir = tempfile::tempdir()?;
        let snapshot_path = dir.path().join("backup.snapshot");
        fs::copy(backup_path, &snapshot_path)?;
        Ok(Some(dir))
    }

    fn restore_prior_backup(&self, snapshot_dir: &Option<tempfile::TempDir>, backup_path: &Path) {
        let Some(dir) = snapshot_dir else {
            return;
        };
        let snapshot_path = dir.path().join("backup.snapshot");
        if let Err(e) = fs::copy(&snapshot_path, backup_path) {
            tracing::warn!(error = %e, "failed to restore prior group-file backup after backup failure");
        }
    }
}

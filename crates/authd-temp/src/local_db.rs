//! Production [`LocalUserDb`] backed by `uzers` for passwd lookups and
//! the same `/etc/group` line parser `GroupFileCoordinator` uses for
//! group lookups, so both views of "is this name/id already taken" read
//! the file formats authd itself writes.

use std::fs;
use std::path::Path;

use uzers::Users;

use authd_groupfile::GroupLine;

use crate::traits::LocalUserDb;

pub struct SystemLocalUserDb<U> {
    users: U,
    group_lines: Vec<GroupLine>,
}

impl<U: Users> SystemLocalUserDb<U> {
    pub fn new(users: U, group_file_path: &Path) -> std::io::Result<Self> {
        let content = match fs::read_to_string(group_file_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let (group_lines, _) = authd_groupfile::parse_group_file(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Self { users, group_lines })
    }
}

impl<U: Users + Send + Sync> LocalUserDb for SystemLocalUserDb<U> {
    fn user_name_taken(&self, name: &str) -> bool {
        self.users.get_user_by_name(name).is_some()
    }

    fn uid_taken(&self, uid: u32) -> bool {
        self.users.get_user_by_uid(uid as libc::uid_t).is_some()
    }

    fn group_name_taken(&self, name: &str) -> bool {
        self.group_lines.iter().any(|line| line.name == name)
    }

    fn gid_taken(&self, gid: u32) -> bool {
        self.group_lines
            .iter()
            .any(|line| line.gid.parse::<u32>() == Ok(gid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use uzers::mock::MockUsers;
    use uzers::os::unix::UserExt;

    #[test]
    fn reports_taken_names_and_ids_from_both_sources() {
        let dir = tempfile::tempdir().unwrap();
        let group_path = dir.path().join("group");
        fs::write(&group_path, "wheel:x:10:alice\n").unwrap();

        let mut mock = MockUsers::with_current_uid(1000);
        mock.add_user(uzers::mock::User::new(1000, "alice", 1000).with_home_dir("/home/alice"));

        let db = SystemLocalUserDb::new(mock, &group_path).unwrap();
        assert!(db.user_name_taken("alice"));
        assert!(db.uid_taken(1000));
        assert!(!db.user_name_taken("bob"));
        assert!(db.group_name_taken("wheel"));
        assert!(db.gid_taken(10));
        assert!(!db.gid_taken(11));
    }

    #[test]
    fn tolerates_missing_group_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("group");
        let mock = MockUsers::with_current_uid(0);
        let db = SystemLocalUserDb::new(mock, &missing).unwrap();
        assert!(!db.group_name_taken("wheel"));
    }

    #[test]
    fn follows_symlinked_group_file() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("group.real");
        let link = dir.path().join("group");
        fs::write(&real, "wheel:x:10:alice\n").unwrap();
        symlink(&real, &link).unwrap();

        let mock = MockUsers::with_current_uid(0);
        let db = SystemLocalUserDb::new(mock, &link).unwrap();
        assert!(db.gid_taken(10));
    }
}

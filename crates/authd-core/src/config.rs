//! Ambient configuration, resolved from environment variables at the
//! edge so every lower crate can take its paths and timeouts as plain
//! constructor arguments (spec.md §9's injection-discipline note).
//!
//! Grounded on `ah-local-db::Database::default_path`'s env-var-first,
//! then-platform-default pattern, generalized to the three knobs this
//! crate needs.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_STATE_DIR: &str = "/var/lib/authd";
const DEFAULT_GROUP_FILE_PATH: &str = "/etc/group";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default from spec.md §4.7.
pub const DEFAULT_MAX_PRE_AUTH_USERS: usize = 4096;
/// Default from spec.md §4.9.
pub const DEFAULT_MAX_ID_GENERATION_ATTEMPTS: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub group_file_path: PathBuf,
    pub lock_timeout: Duration,
    pub max_pre_auth_users: usize,
    pub max_id_generation_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            group_file_path: PathBuf::from(DEFAULT_GROUP_FILE_PATH),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_pre_auth_users: DEFAULT_MAX_PRE_AUTH_USERS,
            max_id_generation_attempts: DEFAULT_MAX_ID_GENERATION_ATTEMPTS,
        }
    }
}

impl Config {
    /// Resolves configuration from `AUTHD_STATE_DIR`, `AUTHD_GROUP_FILE`,
    /// and `AUTHD_LOCK_TIMEOUT_MS`, falling back to defaults for any that
    /// are unset or unparseable. Only this function reads the
    /// environment; every lower crate takes its settings as constructor
    /// arguments.
    pub fn resolve() -> Self {
        let defaults = Self::default();
        let state_dir = std::env::var("AUTHD_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);
        let group_file_path = std::env::var("AUTHD_GROUP_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.group_file_path);
        let lock_timeout = std::env::var("AUTHD_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);

        Self {
            state_dir,
            group_file_path,
            lock_timeout,
            max_pre_auth_users: defaults.max_pre_auth_users,
            max_id_generation_attempts: defaults.max_id_generation_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn resolve_falls_back_to_defaults() {
        std::env::remove_var("AUTHD_STATE_DIR");
        std::env::remove_var("AUTHD_GROUP_FILE");
        std::env::remove_var("AUTHD_LOCK_TIMEOUT_MS");
        let config = Config::resolve();
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.group_file_path, PathBuf::from(DEFAULT_GROUP_FILE_PATH));
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    #[serial]
    fn resolve_reads_overrides() {
        std::env::set_var("AUTHD_STATE_DIR", "/tmp/authd-state");
        std::env::set_var("AUTHD_GROUP_FILE", "/tmp/group");
        std::env::set_var("AUTHD_LOCK_TIMEOUT_MS", "1500");
        let config = Config::resolve();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/authd-state"));
        assert_eq!(config.group_file_path, PathBuf::from("/tmp/group"));
        assert_eq!(config.lock_timeout, Duration::from_millis(1500));
        std::env::remove_var("AUTHD_STATE_DIR");
        std::env::remove_var("AUTHD_GROUP_FILE");
        std::env::remove_var("AUTHD_LOCK_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn resolve_ignores_unparseable_timeout() {
        std::env::set_var("AUTHD_LOCK_TIMEOUT_MS", "not-a-number");
        let config = Config::resolve();
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        std::env::remove_var("AUTHD_LOCK_TIMEOUT_MS");
    }
}

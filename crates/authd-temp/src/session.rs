//! `TemporaryRecords` (facade) and `LockedSession` (spec.md §4.9).
//!
//! `TemporaryRecords` holds at most one active `LockedSession` at a time,
//! installed under a mutex in a single check-then-set step — the same
//! linearizability a compare-and-swap on an atomic pointer would give,
//! expressed with `std::sync::Mutex` per this crate's thread-based
//! concurrency model (no coroutine/task scheduler, spec.md §5).

use std::sync::{Arc, Mutex};

use crate::id_tracker::IdTracker;
use crate::pre_auth::PreAuthRegistry;
use crate::temp_group::TempGroupRegistry;
use crate::traits::{IdGenerator, LocalUserDb};
use crate::{Error, Result};

const MAX_ID_GENERATION_ATTEMPTS: usize = 256;

/// Releases a temporary reservation. Calling it is optional: dropping it
/// unused simply leaves the reservation in place.
pub struct Cleanup(Option<Box<dyn FnOnce() + Send>>);

impl Cleanup {
    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    fn empty() -> Self {
        Self(None)
    }

    pub fn run(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

pub struct TemporaryRecords {
    id_tracker: Arc<IdTracker>,
    pre_auth: Arc<PreAuthRegistry>,
    temp_groups: Arc<TempGroupRegistry>,
    id_gen: Arc<dyn IdGenerator>,
    active_session: Mutex<Option<Arc<LockedSession>>>,
}

impl TemporaryRecords {
    pub fn new(
        id_tracker: Arc<IdTracker>,
        pre_auth: Arc<PreAuthRegistry>,
        temp_groups: Arc<TempGroupRegistry>,
        id_gen: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            id_tracker,
            pre_auth,
            temp_groups,
            id_gen,
            active_session: Mutex::new(None),
        }
    }

    /// Called by the daemon while holding the cross-process user-database
    /// write lock. Installs a new `LockedSession` if none is active, or
    /// returns the existing one.
    pub fn lock_for_changes(&self, local_db: Arc<dyn LocalUserDb>) -> Arc<LockedSession> {
        let mut active = self.active_session.lock().unwrap();
        if let Some(session) = active.as_ref() {
            return Arc::clone(session);
        }
        let session = Arc::new(LockedSession {
            id_tracker: Arc::clone(&self.id_tracker),
            pre_auth: Arc::clone(&self.pre_auth),
            temp_groups: Arc::clone(&self.temp_groups),
            id_gen: Arc::clone(&self.id_gen),
            local_db,
        });
        *active = Some(Arc::clone(&session));
        session
    }

    /// Ends the active session, if any, so a later `lock_for_changes`
    /// installs a fresh one with a new local-database snapshot.
    pub fn release(&self) {
        *self.active_session.lock().unwrap() = None;
    }

    pub fn user_by_id(&self, uid: u32) -> Option<crate::pre_auth::PreAuthUser> {
        self.pre_auth.user_by_id(uid)
    }

    pub fn user_by_name(&self, name: &str) -> Option<crate::pre_auth::PreAuthUser> {
        self.pre_auth.user_by_name(name)
    }
}

pub struct LockedSession {
    id_tracker: Arc<IdTracker>,
    pre_auth: Arc<PreAuthRegistry>,
    temp_groups: Arc<TempGroupRegistry>,
    id_gen: Arc<dyn IdGenerator>,
    local_db: Arc<dyn LocalUserDb>,
}

impl LockedSession {
    /// Promotes a pre-auth user for `name` if one exists, otherwise
    /// reserves a fresh UID.
    pub fn register_user(&self, name: &str) -> Result<(u32, Cleanup)> {
        if self.local_db.user_name_taken(name) {
            return Err(Error::Conflict(format!(
                "'{name}' already exists as a local user"
            )));
        }

        if let Some(pre_auth_user) = self.pre_auth.user_by_login(name) {
            let uid = pre_auth_user.uid;
            tracing::debug!(name, uid, "promoted pre-auth user");
            let pre_auth = Arc::clone(&self.pre_auth);
            let id_tracker = Arc::clone(&self.id_tracker);
            let owned_name = name.to_string();
            return Ok((
                uid,
                Cleanup::new(move || {
                    pre_auth.delete_pre_auth_user(uid);
                    id_tracker.forget_user(&owned_name);
                }),
            ));
        }

        for _ in 0..MAX_ID_GENERATION_ATTEMPTS {
            let candidate = self.id_gen.generate_uid();
            if self.local_db.uid_taken(candidate) {
                continue;
            }
            if !self.id_tracker.track_id(candidate) {
                continue;
            }
            let (tracked, current_uid) = self.id_tracker.track_user(name, candidate);
            if !tracked {
                // Lost a name race: someone else already owns this name
                // under a different uid. Release our reservation and
                // hand back the winner's uid with no cleanup to run.
                self.id_tracker.forget_id(candidate);
                return Ok((current_uid, Cleanup::empty()));
            }

            tracing::debug!(name, uid = candidate, "registered fresh user");
            let id_tracker = Arc::clone(&self.id_tracker);
            let owned_name = name.to_string();
            return Ok((
                candidate,
                Cleanup::new(move || {
                    id_tracker.forget_id(candidate);
                    id_tracker.forget_user(&owned_name);
                }),
            ));
        }

        tracing::warn!(name, attempts = MAX_ID_GENERATION_ATTEMPTS, "exhausted uid generation attempts");
        Err(Error::IdGenerationExhausted {
            attempts: MAX_ID_GENERATION_ATTEMPTS,
        })
    }

    pub fn register_pre_auth_user(&self, login_name: &str) -> Result<u32> {
        self.pre_auth.register_pre_auth_user(login_name)
    }

    /// Reserves a GID for `name`, reusing an existing temp-group
    /// reservation if one is already active.
    pub fn register_group_for_user(&self, uid: u32, name: &str) -> Result<(u32, Cleanup)> {
        if self.local_db.group_name_taken(name) {
            return Err(Error::Conflict(format!(
                "'{name}' already exists as a local group"
            )));
        }

        let existing = self.temp_groups.get_temporary_group(name);
        if existing != 0 {
            return Ok((existing, self.release_temp_group_cleanup(existing)));
        }

        for _ in 0..MAX_ID_GENERATION_ATTEMPTS {
            let candidate = self.id_gen.generate_gid();
            if candidate == uid {
                continue;
            }
            if self.local_db.gid_taken(candidate) {
                continue;
            }
            if !self.id_tracker.track_id(candidate) {
                continue;
            }
            self.temp_groups.add_temporary_group(candidate, name);
            tracing::debug!(name, gid = candidate, "registered temp group for user");
            return Ok((candidate, self.release_temp_group_cleanup(candidate)));
        }

        tracing::warn!(name, attempts = MAX_ID_GENERATION_ATTEMPTS, "exhausted gid generation attempts");
        Err(Error::IdGenerationExhausted {
            attempts: MAX_ID_GENERATION_ATTEMPTS,
        })
    }

    fn release_temp_group_cleanup(&self, gid: u32) -> Cleanup {
        let temp_groups = Arc::clone(&self.temp_groups);
        let id_tracker = Arc::clone(&self.id_tracker);
        Cleanup::new(move || {
            if temp_groups.release_temporary_group(gid) {
                id_tracker.forget_id(gid);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SequentialIdGen {
        next: AtomicU32,
    }
    impl IdGenerator for SequentialIdGen {
        fn generate_uid(&self) -> u32 {
            self.next.fetch_add(1, Ordering::SeqCst)
        }
        fn generate_gid(&self) -> u32 {
            self.generate_uid()
        }
    }

    struct EmptyLocalDb;
    impl LocalUserDb for EmptyLocalDb {
        fn user_name_taken(&self, _: &str) -> bool {
            false
        }
        fn uid_taken(&self, _: u32) -> bool {
            false
        }
        fn group_name_taken(&self, _: &str) -> bool {
            false
        }
        fn gid_taken(&self, _: u32) -> bool {
            false
        }
    }

    fn records() -> TemporaryRecords {
        let id_tracker = Arc::new(IdTracker::new());
        let id_gen: Arc<dyn IdGenerator> = Arc::new(SequentialIdGen {
            next: AtomicU32::new(900000),
        });
        let pre_auth = Arc::new(PreAuthRegistry::new(
            Arc::clone(&id_gen),
            Arc::clone(&id_tracker),
            Arc::new(EmptyLocalDb),
            4096,
        ));
        let temp_groups = Arc::new(TempGroupRegistry::new());
        TemporaryRecords::new(id_tracker, pre_auth, temp_groups, id_gen)
    }

    #[test]
    fn lock_for_changes_returns_same_session_until_released() {
        let records = records();
        let a = records.lock_for_changes(Arc::new(EmptyLocalDb));
        let b = records.lock_for_changes(Arc::new(EmptyLocalDb));
        assert!(Arc::ptr_eq(&a, &b));

        records.release();
        let c = records.lock_for_changes(Arc::new(EmptyLocalDb));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn register_user_promotes_pre_auth_entry() {
        let records = records();
        let pre_uid = records.pre_auth.register_pre_auth_user("alice").unwrap();
        let session = records.lock_for_changes(Arc::new(EmptyLocalDb));

        let (uid, cleanup) = session.register_user("alice").unwrap();
        assert_eq!(uid, pre_uid);
        cleanup.run();
        assert!(records.pre_auth.user_by_login("alice").is_none());
    }

    #[test]
    fn register_user_without_pre_auth_generates_fresh_uid() {
        let records = records();
        let session = records.lock_for_changes(Arc::new(EmptyLocalDb));
        let (uid, cleanup) = session.register_user("bob").unwrap();
        assert!(uid >= 900000);
        cleanup.run();
    }

    #[test]
    fn register_user_rejects_existing_local_name() {
        struct TakenLocalDb;
        impl LocalUserDb for TakenLocalDb {
            fn user_name_taken(&self, _: &str) -> bool {
                true
            }
            fn uid_taken(&self, _: u32) -> bool {
                false
            }
            fn group_name_taken(&self, _: &str) -> bool {
                false
            }
            fn gid_taken(&self, _: u32) -> bool {
                false
            }
        }
        let records = records();
        let session = records.lock_for_changes(Arc::new(TakenLocalDb));
        assert!(matches!(
            session.register_user("root").unwrap_err(),
            Error::Conflict(_)
        ));
    }

    #[test]
    fn register_group_for_user_reuses_existing_temp_group() {
        let records = records();
        let session = records.lock_for_changes(Arc::new(EmptyLocalDb));

        let (gid1, cleanup1) = session.register_group_for_user(1000, "authd-wheel").unwrap();
        let (gid2, cleanup2) = session.register_group_for_user(1001, "authd-wheel").unwrap();
        assert_eq!(gid1, gid2);

        cleanup1.run();
        // Still referenced once more.
        assert_eq!(records.temp_groups.get_temporary_group("authd-wheel"), gid1);
        records.temp_groups.release_temporary_group(gid1);
        cleanup2.run();
    }

    #[test]
    fn register_group_for_user_rejects_gid_equal_to_uid() {
        struct OnceThenDifferentGen {
            calls: AtomicU32,
        }
        impl IdGenerator for OnceThenDifferentGen {
            fn generate_uid(&self) -> u32 {
                900000
            }
            fn generate_gid(&self) -> u32 {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    1000
                } else {
                    5000
                }
            }
        }
        let id_tracker = Arc::new(IdTracker::new());
        let id_gen: Arc<dyn IdGenerator> = Arc::new(OnceThenDifferentGen {
            calls: AtomicU32::new(0),
        });
        let pre_auth = Arc::new(PreAuthRegistry::new(
            Arc::clone(&id_gen),
            Arc::clone(&id_tracker),
            Arc::new(EmptyLocalDb),
            4096,
        ));
        let temp_groups = Arc::new(TempGroupRegistry::new());
        let records = TemporaryRecords::new(id_tracker, pre_auth, temp_groups, id_gen);
        let session = records.lock_for_changes(Arc::new(EmptyLocalDb));

        let (gid, _cleanup) = session.register_group_for_user(1000, "authd-wheel").unwrap();
        assert_eq!(gid, 5000);
    }
}

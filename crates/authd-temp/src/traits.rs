//! External-collaborator traits threaded into temporary-record
//! coordination by constructor injection. Canonically defined here (the
//! lowest crate that actually consumes them) and re-exported by
//! `authd-core`, which otherwise would need a dependency cycle back onto
//! this crate to expose them publicly.
//!
//! Grounded on the teacher's pattern of defining narrow traits at crate
//! seams (`FsSnapshotProvider`-style collaborator traits) so the
//! coordination logic can be exercised with a deterministic double in
//! tests and wired to a real ID allocator / process scanner elsewhere.

/// Allocates candidate UIDs/GIDs. No uniqueness guarantee: callers must
/// still check the result against [`crate::id_tracker::IdTracker`] and the
/// local passwd/group snapshot.
pub trait IdGenerator: Send + Sync {
    fn generate_uid(&self) -> u32;
    fn generate_gid(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyState {
    Busy,
    NotBusy,
}

/// Tells whether a user has live processes, open files, or sessions
/// that make it unsafe to delete. Implemented outside the CORE (process
/// table scanning is platform-specific and not part of this crate).
pub trait UserBusyChecker: Send + Sync {
    fn check_user_busy(&self, name: &str, uid: u32) -> std::io::Result<BusyState>;
}

/// A point-in-time view of the host's local passwd/group databases,
/// consulted so a generated UID/GID never collides with an entry NSS
/// would also resolve.
pub trait LocalUserDb: Send + Sync {
    fn user_name_taken(&self, name: &str) -> bool;
    fn uid_taken(&self, uid: u32) -> bool;
    fn group_name_taken(&self, name: &str) -> bool;
    fn gid_taken(&self, gid: u32) -> bool;
}

//! Facade crate: wires the identity database, group-file coordinator,
//! and temporary-record coordination into one `Authd` handle, and defines
//! the external-collaborator traits and configuration surface a
//! transport layer builds on (spec.md §2 added crate layout).

mod config;
mod error;
mod facade;

pub use authd_db::{EntityStore, Group, GroupWithMembers, ReassignmentEngine, Store, User, UserWithGroups};
pub use authd_groupfile::{FileLockPrimitive, GroupFileCoordinator, GroupLine, LockPrimitive};
pub use authd_temp::{
    BusyState, Cleanup, IdGenerator, IdTracker, LocalUserDb, LockedSession, PreAuthRegistry,
    PreAuthUser, SystemLocalUserDb, TempGroupRegistry, TemporaryRecords, UserBusyChecker,
};

pub use config::Config;
pub use error::Error;
pub use facade::Authd;

pub type Result<T> = std::result::Result<T, Error>;

//! In-memory coordination of pre-auth placeholders and temporary
//! UID/GID reservations, ahead of a synthesized user landing in the
//! identity database (spec.md §4.6-4.9).

mod error;
mod id_tracker;
mod local_db;
mod pre_auth;
mod session;
mod temp_group;
mod traits;

pub use error::Error;
pub use id_tracker::IdTracker;
pub use local_db::SystemLocalUserDb;
pub use pre_auth::{PreAuthRegistry, PreAuthUser};
pub use session::{Cleanup, LockedSession, TemporaryRecords};
pub use temp_group::TempGroupRegistry;
pub use traits::{BusyState, IdGenerator, LocalUserDb, UserBusyChecker};

pub type Result<T> = std::result::Result<T, Error>;

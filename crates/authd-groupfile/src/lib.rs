//! Locking, parsing, and atomic rewriting of `/etc/group`.
//!
//! [`GroupFileCoordinator`] is the only component in this crate that
//! touches the filesystem; [`line`] and [`lock`] are reusable in isolation
//! (the identity database's local-snapshot needs only the line parser, not
//! the coordinator).

pub mod coordinator;
pub mod error;
pub mod line;
pub mod lock;

pub use coordinator::GroupFileCoordinator;
pub use error::Error;
pub use line::{parse_group_file, render_group_file, GroupLine};
pub use lock::{CountingLockPrimitive, FileLockPrimitive, LockPrimitive};

pub type Result<T> = std::result::Result<T, Error>;

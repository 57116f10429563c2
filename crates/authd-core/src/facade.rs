//! `Authd`: the facade a transport layer builds on. Owns the identity
//! database, the `/etc/group` coordinator, and in-memory temporary-record
//! coordination, wiring them together the way spec.md §2's data-flow
//! describes (NSS query → PreAuthRegistry → LockedSession → EntityStore).

use std::sync::Arc;

use authd_db::{EntityStore, ReassignmentEngine, Store};
use authd_groupfile::{FileLockPrimitive, GroupFileCoordinator};
use authd_temp::{IdGenerator, IdTracker, LocalUserDb, PreAuthRegistry, TempGroupRegistry, TemporaryRecords};

use crate::config::Config;
use crate::Result;

pub struct Authd {
    store: Arc<Store>,
    entities: EntityStore,
    group_file: Arc<GroupFileCoordinator>,
    temp: TemporaryRecords,
    config: Config,
}

impl Authd {
    /// Opens the identity database at `config.state_dir`, applies any
    /// pending migrations, and wires up temporary-record coordination.
    /// `id_gen` is the caller's UID/GID allocator (spec.md §4.10); this
    /// crate never ships a default one.
    pub fn open(config: Config, id_gen: Arc<dyn IdGenerator>, local_db: Arc<dyn LocalUserDb>) -> Result<Self> {
        let store = Arc::new(Store::open(&config.state_dir)?);
        let entities = EntityStore::new(Arc::clone(&store));

        let lock_path = config
            .group_file_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("/etc"))
            .join(".pwd.lock");
        let lock = Arc::new(FileLockPrimitive::new(lock_path));
        let group_file = Arc::new(GroupFileCoordinator::new(
            config.group_file_path.clone(),
            lock,
            config.lock_timeout,
        ));

        store.apply_migrations(Arc::clone(&group_file))?;

        let id_tracker = Arc::new(IdTracker::new());
        let pre_auth = Arc::new(PreAuthRegistry::new(
            Arc::clone(&id_gen),
            Arc::clone(&id_tracker),
            Arc::clone(&local_db),
            config.max_pre_auth_users,
        ));
        let temp_groups = Arc::new(TempGroupRegistry::new());
        let temp = TemporaryRecords::new(id_tracker, pre_auth, temp_groups, id_gen);

        tracing::info!(state_dir = %config.state_dir.display(), "authd identity store ready");

        Ok(Self {
            store,
            entities,
            group_file,
            temp,
            config,
        })
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn group_file(&self) -> &Arc<GroupFileCoordinator> {
        &self.group_file
    }

    pub fn temporary_records(&self) -> &TemporaryRecords {
        &self.temp
    }

    pub fn reassignment(&self) -> ReassignmentEngine<'_> {
        ReassignmentEngine::new(&self.store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

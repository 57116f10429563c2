//! `TempGroupRegistry`: ref-counted temporary groups (spec.md §4.8).

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    by_name: HashMap<String, u32>,
    by_gid: HashMap<u32, (String, usize)>,
}

#[derive(Default)]
pub struct TempGroupRegistry {
    state: Mutex<State>,
}

impl TempGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing GID for `name` and increments its refcount,
    /// or `0` if no temp group is registered for `name`.
    pub fn get_temporary_group(&self, name: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        let Some(&gid) = state.by_name.get(name) else {
            return 0;
        };
        if let Some(entry) = state.by_gid.get_mut(&gid) {
            entry.1 += 1;
        }
        gid
    }

    /// Panics on double-registration: calling this for a `name` that is
    /// already registered is a programming error, not a runtime race (the
    /// caller must have already gone through `get_temporary_group`).
    pub fn add_temporary_group(&self, gid: u32, name: &str) {
        let mut state = self.state.lock().unwrap();
        if state.by_name.contains_key(name) {
            tracing::error!(name, gid, "double-registration of temp group");
            panic!("temp group '{name}' is already registered");
        }
        state.by_name.insert(name.to_string(), gid);
        state.by_gid.insert(gid, (name.to_string(), 1));
        tracing::debug!(name, gid, "registered temp group");
    }

    /// Decrements `gid`'s refcount. Returns `true` if this removed the
    /// last reference.
    pub fn release_temporary_group(&self, gid: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.by_gid.get_mut(&gid) else {
            return false;
        };
        entry.1 -= 1;
        if entry.1 == 0 {
            let name = entry.0.clone();
            state.by_gid.remove(&gid);
            state.by_name.remove(&name);
            true
        } else {
            false
        }
    }
}

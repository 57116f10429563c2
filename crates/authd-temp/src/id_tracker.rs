//! `IdTracker`: in-memory set of reserved IDs and name→UID references
//! (spec.md §4.6). All operations are O(1) and mutex-guarded.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    ids: HashSet<u32>,
    user_names: HashMap<String, (u32, usize)>,
}

#[derive(Default)]
pub struct IdTracker {
    state: Mutex<State>,
}

impl IdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `id` was already tracked.
    pub fn track_id(&self, id: u32) -> bool {
        self.state.lock().unwrap().ids.insert(id)
    }

    pub fn forget_id(&self, id: u32) {
        self.state.lock().unwrap().ids.remove(&id);
    }

    /// If `name` already maps to a different uid, returns
    /// `(false, existing_uid)`. Otherwise increments the refcount (or
    /// creates the entry) and returns `(true, uid)`.
    pub fn track_user(&self, name: &str, uid: u32) -> (bool, u32) {
        let mut state = self.state.lock().unwrap();
        match state.user_names.get_mut(name) {
            Some((existing_uid, _)) if *existing_uid != uid => (false, *existing_uid),
            Some((_, refcount)) => {
                *refcount += 1;
                (true, uid)
            }
            None => {
                state.user_names.insert(name.to_string(), (uid, 1));
                (true, uid)
            }
        }
    }

    /// Decrements `name`'s refcount, removing the entry once it hits
    /// zero. A no-op if `name` is not tracked.
    pub fn forget_user(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some((_, refcount)) = state.user_names.get_mut(name) {
            *refcount = refcount.saturating_sub(1);
            if *refcount == 0 {
                state.user_names.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_id_rejects_duplicates() {
        let tracker = IdTracker::new();
        assert!(tracker.track_id(1000));
        assert!(!tracker.track_id(1000));
        tracker.forget_id(1000);
        assert!(tracker.track_id(1000));
    }

    #[test]
    fn track_user_refcounts_same_uid() {
        let tracker = IdTracker::new();
        assert_eq!(tracker.track_user("alice", 1000), (true, 1000));
        assert_eq!(tracker.track_user("alice", 1000), (true, 1000));
        tracker.forget_user("alice");
        tracker.forget_user("alice");
        // Fully forgotten: a different uid can now claim the name.
        assert_eq!(tracker.track_user("alice", 2000), (true, 2000));
    }

    #[test]
    fn track_user_rejects_uid_mismatch() {
        let tracker = IdTracker::new();
        tracker.track_user("alice", 1000);
        assert_eq!(tracker.track_user("alice", 2000), (false, 1000));
    }

    #[test]
    fn forget_user_on_untracked_name_is_noop() {
        let tracker = IdTracker::new();
        tracker.forget_user("nobody");
    }
}

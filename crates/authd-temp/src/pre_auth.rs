//! `PreAuthRegistry`: random-named placeholder users, keyed by login
//! name, generated display name, and UID (spec.md §4.7). Registered
//! before broker authentication completes so tools like `sshd` see a
//! passwd entry for the login name they're about to authenticate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::RngCore;

use crate::id_tracker::IdTracker;
use crate::traits::{IdGenerator, LocalUserDb};
use crate::{Error, Result};

const MAX_LOGIN_NAME_LEN: usize = 256;
const DISPLAY_NAME_PREFIX: &str = "authd-pre-auth-user-";
const MAX_DISPLAY_NAME_ATTEMPTS: usize = 16;

/// A synthesized placeholder passwd entry for a not-yet-authenticated
/// login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreAuthUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub dir: String,
    pub shell: String,
    pub login_name: String,
}

#[derive(Default)]
struct State {
    by_uid: HashMap<u32, PreAuthUser>,
    by_display_name: HashMap<String, u32>,
    by_login: HashMap<String, u32>,
}

pub struct PreAuthRegistry {
    id_gen: Arc<dyn IdGenerator>,
    id_tracker: Arc<IdTracker>,
    local_db: Arc<dyn LocalUserDb>,
    max_population: usize,
    state: Mutex<State>,
}

impl PreAuthRegistry {
    pub fn new(
        id_gen: Arc<dyn IdGenerator>,
        id_tracker: Arc<IdTracker>,
        local_db: Arc<dyn LocalUserDb>,
        max_population: usize,
    ) -> Self {
        Self {
            id_gen,
            id_tracker,
            local_db,
            max_population,
            state: Mutex::new(State::default()),
        }
    }

    pub fn register_pre_auth_user(&self, login_name: &str) -> Result<u32> {
        if login_name.is_empty() || login_name.len() > MAX_LOGIN_NAME_LEN {
            return Err(Error::InvalidLoginName(login_name.to_string()));
        }

        {
            let state = self.state.lock().unwrap();
            if let Some(&uid) = state.by_login.get(login_name) {
                return Ok(uid);
            }
            if state.by_uid.len() >= self.max_population {
                return Err(Error::MaxPreAuthExceeded(self.max_population));
            }
        }

        if self.local_db.user_name_taken(login_name) {
            return Err(Error::Conflict(format!(
                "login '{login_name}' already exists as a local user"
            )));
        }

        let uid = self.reserve_uid()?;
        let display_name = self.reserve_display_name(uid)?;

        let user = PreAuthUser {
            name: display_name.clone(),
            uid,
            gid: uid,
            gecos: login_name.to_string(),
            dir: "/nonexistent".to_string(),
            shell: "/usr/sbin/nologin".to_string(),
            login_name: login_name.to_string(),
        };

        let mut state = self.state.lock().unwrap();
        // Another thread may have raced us for the same login between our
        // unlocked check above and now; defer to whoever won.
        if let Some(&existing) = state.by_login.get(login_name) {
            drop(state);
            self.id_tracker.forget_id(uid);
            return Ok(existing);
        }
        state.by_uid.insert(uid, user.clone());
        state.by_display_name.insert(display_name, uid);
        state.by_login.insert(login_name.to_string(), uid);
        tracing::debug!(login_name, uid, "registered pre-auth user");
        Ok(uid)
    }

    /// Idempotent: ignores absent UIDs, because sshd may open multiple
    /// sessions per login and trigger duplicate cleanups.
    pub fn delete_pre_auth_user(&self, uid: u32) {
        let mut state = self.state.lock().unwrap();
        let Some(user) = state.by_uid.remove(&uid) else {
            return;
        };
        state.by_display_name.remove(&user.name);
        state.by_login.remove(&user.login_name);
        drop(state);
        self.id_tracker.forget_id(uid);
        tracing::debug!(uid, login_name = %user.login_name, "deleted pre-auth user");
    }

    pub fn user_by_id(&self, uid: u32) -> Option<PreAuthUser> {
        self.state.lock().unwrap().by_uid.get(&uid).cloned()
    }

    pub fn user_by_name(&self, display_name: &str) -> Option<PreAuthUser> {
        let state = self.state.lock().unwrap();
        let uid = *state.by_display_name.get(display_name)?;
        state.by_uid.get(&uid).cloned()
    }

    pub fn user_by_login(&self, login_name: &str) -> Option<PreAuthUser> {
        let state = self.state.lock().unwrap();
        let uid = *state.by_login.get(login_name)?;
        state.by_uid.get(&uid).cloned()
    }

    fn reserve_uid(&self) -> Result<u32> {
        for _ in 0..MAX_DISPLAY_NAME_ATTEMPTS {
            let candidate = self.id_gen.generate_uid();
            if self.local_db.uid_taken(candidate) {
                continue;
            }
            if self.id_tracker.track_id(candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::IdGenerationExhausted {
            attempts: MAX_DISPLAY_NAME_ATTEMPTS,
        })
    }

    fn reserve_display_name(&self, uid: u32) -> Result<String> {
        for _ in 0..MAX_DISPLAY_NAME_ATTEMPTS {
            let candidate = random_display_name();
            let taken = self.state.lock().unwrap().by_display_name.contains_key(&candidate);
            if !taken {
                return Ok(candidate);
            }
        }
        self.id_tracker.forget_id(uid);
        Err(Error::IdGenerationExhausted {
            attempts: MAX_DISPLAY_NAME_ATTEMPTS,
        })
    }
}

fn random_display_name() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(DISPLAY_NAME_PREFIX.len() + 64);
    hex.push_str(DISPLAY_NAME_PREFIX);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

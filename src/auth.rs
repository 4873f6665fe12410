//! Login, sessions and brute-force throttling.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LoginPolicy;
use crate::error::StoreResult;
use crate::model::Student;
use crate::normalize::canonical_id;
use crate::roster::RecordStore;

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Failures {
    count: u32,
    first_failure: Instant,
    locked_until: Option<Instant>,
}

impl Failures {
    /// An active lockout, or failures still inside the counting window.
    fn is_live(&self, now: Instant, window: Duration) -> bool {
        match self.locked_until {
            Some(until) => until > now,
            None => now.duration_since(self.first_failure) < window,
        }
    }
}

/// Failed-attempt counter per normalized login. Failures are counted within a
/// window as long as the lockout; stale entries are dropped on every call.
pub struct LoginGuard {
    max_failures: u32,
    lockout: Duration,
    failures: Mutex<HashMap<String, Failures>>,
}

impl LoginGuard {
    pub fn new(max_failures: u32, lockout: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            lockout,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn live_failures(&self, now: Instant) -> MutexGuard<'_, HashMap<String, Failures>> {
        let mut failures = locked(&self.failures);
        failures.retain(|_, f| f.is_live(now, self.lockout));
        failures
    }

    /// Remaining lockout for `login`, if any.
    pub fn check(&self, login: &str) -> Option<Duration> {
        let now = Instant::now();
        let until = self.live_failures(now).get(&canonical_id(login))?.locked_until?;
        Some(until.saturating_duration_since(now))
    }

    /// Count a failure. Returns true when this failure triggered a lockout.
    pub fn record_failure(&self, login: &str) -> bool {
        let now = Instant::now();
        let mut failures = self.live_failures(now);
        let entry = failures.entry(canonical_id(login)).or_insert(Failures {
            count: 0,
            first_failure: now,
            locked_until: None,
        });
        if entry.locked_until.is_some() {
            return false;
        }
        entry.count += 1;
        if entry.count >= self.max_failures {
            entry.locked_until = Some(now + self.lockout);
            return true;
        }
        false
    }

    pub fn record_success(&self, login: &str) {
        locked(&self.failures).remove(&canonical_id(login));
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        locked(&self.failures).len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated { token: String, student: Student },
    Rejected,
    LockedOut { retry_after: Duration },
}

pub struct Authenticator {
    guard: LoginGuard,
    failure_delay: Duration,
    /// Session token to student id.
    sessions: Mutex<HashMap<String, String>>,
}

impl Authenticator {
    pub fn new(policy: &LoginPolicy) -> Self {
        Self {
            guard: LoginGuard::new(policy.max_failures, policy.lockout),
            failure_delay: policy.failure_delay,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Throttling keys for a login: the text as typed, plus the id of the
    /// student it names, so id and name share one counter.
    fn throttle_keys(&self, store: &RecordStore, login: &str) -> StoreResult<Vec<String>> {
        let mut keys = vec![canonical_id(login)];
        if let Some(id) = store.resolve_login(login)? {
            let key = canonical_id(&id);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    pub fn login(&self, store: &RecordStore, login: &str, password: &str) -> StoreResult<LoginOutcome> {
        let keys = self.throttle_keys(store, login)?;
        if let Some(retry_after) = keys.iter().filter_map(|k| self.guard.check(k)).max() {
            warn!(login = %login.trim(), "login attempt while locked out");
            return Ok(LoginOutcome::LockedOut { retry_after });
        }

        match store.authenticate(login, password)? {
            Some(student) => {
                for key in &keys {
                    self.guard.record_success(key);
                }
                let token = Uuid::new_v4().to_string();
                locked(&self.sessions).insert(token.clone(), student.id.clone());
                info!(student_id = %student.id, "login succeeded");
                Ok(LoginOutcome::Authenticated { token, student })
            }
            None => {
                let mut locked_now = false;
                for key in &keys {
                    locked_now |= self.guard.record_failure(key);
                }
                if locked_now {
                    warn!(login = %login.trim(), "too many failed logins, locking");
                } else {
                    info!(login = %login.trim(), "login rejected");
                }
                if !self.failure_delay.is_zero() {
                    std::thread::sleep(self.failure_delay);
                }
                Ok(LoginOutcome::Rejected)
            }
        }
    }

    /// The session's student, re-read from the store. A token whose student
    /// has disappeared is dropped.
    pub fn resume(&self, store: &RecordStore, token: &str) -> StoreResult<Option<Student>> {
        let Some(student_id) = locked(&self.sessions).get(token.trim()).cloned() else {
            return Ok(None);
        };
        match store.get(&student_id)? {
            Some(student) => Ok(Some(student.without_password())),
            None => {
                locked(&self.sessions).remove(token.trim());
                Ok(None)
            }
        }
    }

    pub fn logout(&self, token: &str) -> bool {
        locked(&self.sessions).remove(token.trim()).is_some()
    }

    /// Forget every session, e.g. when a different store is opened.
    pub fn clear_sessions(&self) {
        locked(&self.sessions).clear();
    }
}

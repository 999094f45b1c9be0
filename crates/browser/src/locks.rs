//! Advisory per-tab locks.
//!
//! Cooperating clients use these to serialise touches on a shared tab; the
//! server surfaces them in `/tabs` but does not enforce them on action
//! routes. Expired locks are treated as absent.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tabbridge_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct LockEntry {
    pub owner: String,
    pub expires_at: Instant,
}

impl LockEntry {
    fn live(&self) -> bool {
        self.expires_at > Instant::now()
    }

    /// Wall-clock expiry for JSON responses.
    pub fn expires_at_rfc3339(&self) -> String {
        let remaining = self.expires_at.saturating_duration_since(Instant::now());
        let when = chrono::Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_default();
        when.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, LockEntry>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take or refresh the lock on a tab. Succeeds when no live lock exists
    /// or the caller already owns it (refreshing the TTL).
    pub fn lock(&self, tab_id: &str, owner: &str, ttl: Duration) -> Result<LockEntry> {
        let mut locks = self.locks.lock().unwrap();
        if let Some(existing) = locks.get(tab_id) {
            if existing.live() && existing.owner != owner {
                return Err(Error::conflict(format!(
                    "tab {} is locked by {}",
                    tab_id, existing.owner
                )));
            }
        }
        let entry = LockEntry {
            owner: owner.to_string(),
            expires_at: Instant::now() + ttl,
        };
        locks.insert(tab_id.to_string(), entry.clone());
        Ok(entry)
    }

    /// Release a lock. Only the owner may unlock.
    pub fn unlock(&self, tab_id: &str, owner: &str) -> Result<()> {
        let mut locks = self.locks.lock().unwrap();
        match locks.get(tab_id) {
            Some(existing) if existing.live() => {
                if existing.owner != owner {
                    return Err(Error::conflict(format!(
                        "tab {} is locked by {}, not {}",
                        tab_id, existing.owner, owner
                    )));
                }
                locks.remove(tab_id);
                Ok(())
            }
            _ => {
                // Unlocking an unlocked (or expired) tab is a no-op.
                locks.remove(tab_id);
                Ok(())
            }
        }
    }

    /// Current live lock for a tab, if any.
    pub fn get(&self, tab_id: &str) -> Option<LockEntry> {
        let locks = self.locks.lock().unwrap();
        locks.get(tab_id).filter(|e| e.live()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_conflict_then_expiry() {
        let mgr = LockManager::new();
        mgr.lock("T", "A", Duration::from_millis(50)).unwrap();

        // Second owner conflicts while the lock is live.
        let err = mgr.lock("T", "B", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.status(), 409);

        std::thread::sleep(Duration::from_millis(60));
        mgr.lock("T", "B", Duration::from_secs(1)).unwrap();
        assert_eq!(mgr.get("T").unwrap().owner, "B");
    }

    #[test]
    fn owner_refreshes_ttl() {
        let mgr = LockManager::new();
        let first = mgr.lock("T", "A", Duration::from_millis(100)).unwrap();
        let second = mgr.lock("T", "A", Duration::from_secs(10)).unwrap();
        assert!(second.expires_at > first.expires_at);
    }

    #[test]
    fn unlock_by_non_owner_conflicts() {
        let mgr = LockManager::new();
        mgr.lock("T", "A", Duration::from_secs(10)).unwrap();
        let err = mgr.unlock("T", "B").unwrap_err();
        assert_eq!(err.status(), 409);
        mgr.unlock("T", "A").unwrap();
        assert!(mgr.get("T").is_none());
    }

    #[test]
    fn expired_lock_reads_as_absent() {
        let mgr = LockManager::new();
        mgr.lock("T", "A", Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(mgr.get("T").is_none());
    }

    #[test]
    fn concurrent_lock_yields_exactly_one_success() {
        use std::sync::Arc;
        let mgr = Arc::new(LockManager::new());
        let mut handles = Vec::new();
        for owner in ["A", "B"] {
            let m = Arc::clone(&mgr);
            handles.push(std::thread::spawn(move || {
                m.lock("T", owner, Duration::from_secs(5)).is_ok()
            }));
        }
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn locks_are_per_tab() {
        let mgr = LockManager::new();
        mgr.lock("T1", "A", Duration::from_secs(5)).unwrap();
        mgr.lock("T2", "B", Duration::from_secs(5)).unwrap();
        assert_eq!(mgr.get("T1").unwrap().owner, "A");
        assert_eq!(mgr.get("T2").unwrap().owner, "B");
    }
}

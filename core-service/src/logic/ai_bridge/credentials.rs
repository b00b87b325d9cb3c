//! Credential Pool - round-robin rotation with rate-limit cooldowns
//!
//! Raw keys never leave this module except inside a `Lease`; logs and the
//! store only see `hash_credential` output.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Upper bound on a server-supplied Retry-After
pub const MAX_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Stable, non-reversible identifier for a credential
pub fn hash_credential(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..12].to_string()
}

// ============================================================================
// USAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialUsage {
    pub credential_id: String,
    pub provider: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl CredentialUsage {
    fn new(credential_id: String, provider: &str) -> Self {
        Self {
            credential_id,
            provider: provider.to_string(),
            requests: 0,
            successes: 0,
            failures: 0,
            rate_limited: 0,
            last_used: None,
            cooldown_until: None,
        }
    }
}

// ============================================================================
// POOL
// ============================================================================

/// One selected credential
#[derive(Debug, Clone)]
pub struct Lease {
    pub index: usize,
    pub id: String,
    pub key: String,
}

struct Entry {
    key: String,
    cooldown_until: Option<Instant>,
    usage: CredentialUsage,
}

struct PoolState {
    entries: Vec<Entry>,
    cursor: usize,
}

pub struct CredentialPool {
    provider: String,
    default_cooldown: Duration,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(provider: &str, keys: Vec<String>, default_cooldown: Duration) -> Self {
        let mut entries: Vec<Entry> = Vec::new();
        for key in keys {
            let key = key.trim().to_string();
            if key.is_empty() || entries.iter().any(|e| e.key == key) {
                continue;
            }
            entries.push(Entry {
                usage: CredentialUsage::new(hash_credential(&key), provider),
                key,
                cooldown_until: None,
            });
        }

        Self {
            provider: provider.to_string(),
            default_cooldown,
            state: Mutex::new(PoolState { entries, cursor: 0 }),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next usable credential, round-robin from the cursor
    pub fn next(&self) -> Option<Lease> {
        self.next_at(Instant::now())
    }

    pub fn next_at(&self, now: Instant) -> Option<Lease> {
        let mut state = self.state.lock();
        let n = state.entries.len();

        for step in 0..n {
            let index = (state.cursor + step) % n;
            let entry = &mut state.entries[index];

            if let Some(until) = entry.cooldown_until {
                if until > now {
                    continue;
                }
                log::info!("Credential {} cooldown expired", entry.usage.credential_id);
                entry.cooldown_until = None;
                entry.usage.cooldown_until = None;
            }

            entry.usage.requests += 1;
            entry.usage.last_used = Some(Utc::now());
            let lease = Lease {
                index,
                id: entry.usage.credential_id.clone(),
                key: entry.key.clone(),
            };
            state.cursor = (index + 1) % n;
            return Some(lease);
        }

        None
    }

    pub fn mark_rate_limited(&self, lease: &Lease, retry_after: Option<Duration>) {
        self.mark_rate_limited_at(lease, retry_after, Instant::now());
    }

    pub fn mark_rate_limited_at(&self, lease: &Lease, retry_after: Option<Duration>, now: Instant) {
        let mut cooldown = retry_after
            .map(|d| d.min(MAX_COOLDOWN))
            .unwrap_or(self.default_cooldown);
        let until = match now.checked_add(cooldown) {
            Some(until) => until,
            None => {
                cooldown = self.default_cooldown.min(MAX_COOLDOWN);
                now.checked_add(cooldown).unwrap_or(now)
            }
        };
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(lease.index) {
            entry.cooldown_until = Some(until);
            entry.usage.rate_limited += 1;
            entry.usage.failures += 1;
            entry.usage.cooldown_until = chrono::Duration::from_std(cooldown)
                .ok()
                .map(|d| Utc::now() + d);
            log::warn!(
                "Credential {} rate limited, cooling down for {:?}",
                entry.usage.credential_id,
                cooldown
            );
        }
    }

    pub fn record_success(&self, lease: &Lease) {
        if let Some(entry) = self.state.lock().entries.get_mut(lease.index) {
            entry.usage.successes += 1;
        }
    }

    pub fn record_failure(&self, lease: &Lease) {
        if let Some(entry) = self.state.lock().entries.get_mut(lease.index) {
            entry.usage.failures += 1;
        }
    }

    pub fn usage_snapshot(&self) -> Vec<CredentialUsage> {
        self.state.lock().entries.iter().map(|e| e.usage.clone()).collect()
    }
}

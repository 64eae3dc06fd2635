//! Per-IP rate accounting and blacklist promotion
//!
//! All state lives in two containers guarded by independent locks: a
//! read-mostly blacklist behind an `RwLock`, and a rate map behind a `Mutex`
//! because every access to it mutates or may mutate a record. Lock order is
//! rate map before blacklist writer; the blacklist read on entry is released
//! before the rate map is touched.

use chrono::Utc;
use log::warn;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

/// Request count for one source within its current window
#[derive(Debug)]
struct RateRecord {
    /// Epoch second at which the current window began
    window_start: i64,

    /// Requests observed since `window_start`, within the same minute bucket
    count: u32,
}

/// Decides whether a source IP is admitted, tracking rates and the blacklist
///
/// One instance is shared by every connection task. Entries in the rate map
/// are created lazily per source and never removed; memory is bounded only by
/// process lifetime, which is accepted for this scope.
pub struct AdmissionController {
    /// Requests allowed per source within one window; the next one blacklists
    ceiling: u32,

    /// Sources denied for the rest of the run. Monotonic: inserts only.
    blacklist: RwLock<HashSet<String>>,

    /// Per-source window accounting
    rates: Mutex<HashMap<String, RateRecord>>,
}

impl AdmissionController {
    /// Create a controller with an empty blacklist and rate map
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            blacklist: RwLock::new(HashSet::new()),
            rates: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a request from `ip` may be forwarded right now
    pub fn admit(&self, ip: &str) -> bool {
        self.admit_at(ip, Utc::now().timestamp())
    }

    /// Decide admission as of the given epoch second.
    ///
    /// Windows are absolute wall-clock minute buckets, not sliding: two
    /// requests one second apart that straddle a minute boundary land in
    /// different buckets and the second one starts a fresh count.
    pub fn admit_at(&self, ip: &str, now: i64) -> bool {
        {
            let blacklist = self.blacklist.read().unwrap();
            if blacklist.contains(ip) {
                return false;
            }
        }

        let mut rates = self.rates.lock().unwrap();
        match rates.get_mut(ip) {
            None => {
                rates.insert(
                    ip.to_string(),
                    RateRecord {
                        window_start: now,
                        count: 1,
                    },
                );
                true
            }
            Some(record) if now / 60 == record.window_start / 60 => {
                record.count += 1;
                if record.count > self.ceiling {
                    let mut blacklist = self.blacklist.write().unwrap();
                    blacklist.insert(ip.to_string());
                    warn!(
                        "ip {} sent {} requests in one window (ceiling {}), blacklisted",
                        ip, record.count, self.ceiling
                    );
                    false
                } else {
                    true
                }
            }
            Some(record) => {
                // New minute bucket: prior load is forgiven
                record.window_start = now;
                record.count = 1;
                true
            }
        }
    }

    /// Whether `ip` has been promoted to the blacklist
    pub fn is_blacklisted(&self, ip: &str) -> bool {
        self.blacklist.read().unwrap().contains(ip)
    }

    /// Number of sources with a rate record
    pub fn tracked_sources(&self) -> usize {
        self.rates.lock().unwrap().len()
    }

    /// Number of blacklisted sources
    pub fn blacklisted_sources(&self) -> usize {
        self.blacklist.read().unwrap().len()
    }
}

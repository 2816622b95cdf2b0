// 🔢 Serial Registry - at-most-once serial assignment
//
// One registry per run: seeded from the statistics ledger, mutated in memory,
// never written back except through the output ledger.
//
// The lookup → allocate → publish sequence runs inside a single lock so that
// two workers holding files of the same account can never both get a fresh
// serial. File I/O happens after the lock is released.

use crate::normalizer::{digits_only, normalize_key, DigitMatcher, NormalizeOptions};
use crate::statistics::StatisticsEntry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

// ============================================================================
// ENTITY KEY
// ============================================================================

/// Normalized identifier of one real-world account or card
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Whitespace/punctuation-free, upper-cased form
    pub key: String,
    /// Digits-only form used for fuzzy matching
    pub digits: String,
}

impl EntityKey {
    /// None when the raw value normalizes to nothing
    pub fn new(raw: &str) -> Option<Self> {
        let key = normalize_key(Some(raw), NormalizeOptions::default());
        if key.is_empty() {
            return None;
        }
        let digits = digits_only(&key);
        Some(EntityKey { key, digits })
    }
}

// ============================================================================
// ASSIGNMENT RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentOutcome {
    /// Fresh serial allocated and published
    New,
    /// Entity already known; existing serial reused
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub serial: u32,
    pub outcome: AssignmentOutcome,
}

impl Assignment {
    pub fn is_duplicate(&self) -> bool {
        self.outcome == AssignmentOutcome::Duplicate
    }
}

// ============================================================================
// MATCH POLICY
// ============================================================================

/// How keys are compared during lookup. Exact matches always win over fuzzy
/// ones; fuzzy digit matching can be switched off entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    pub digits: DigitMatcher,
    pub fuzzy: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        MatchPolicy {
            digits: DigitMatcher::default(),
            fuzzy: true,
        }
    }
}

// ============================================================================
// SERIAL REGISTRY
// ============================================================================

#[derive(Debug, Default)]
pub struct SerialRegistry {
    used_serials: BTreeSet<u32>,
    account_to_serial: HashMap<String, u32>,
    card_to_serial: HashMap<String, u32>,
    policy: MatchPolicy,
}

impl SerialRegistry {
    pub fn new(policy: MatchPolicy) -> Self {
        SerialRegistry {
            policy,
            ..Default::default()
        }
    }

    /// Seed from statistics-ledger rows. Non-positive serials are ignored and
    /// the first row that maps a key wins.
    pub fn from_entries(entries: &[StatisticsEntry], policy: MatchPolicy) -> Self {
        let mut registry = SerialRegistry::new(policy);
        for entry in entries {
            if let Some(serial) = entry.serial.filter(|s| *s > 0) {
                registry.seed(serial, entry.account.as_deref(), entry.card.as_deref());
            }
        }
        registry
    }

    /// Record an existing serial with its account/card keys.
    pub fn seed(&mut self, serial: u32, account: Option<&str>, card: Option<&str>) {
        self.used_serials.insert(serial);

        if let Some(key) = account.and_then(EntityKey::new) {
            self.account_to_serial.entry(key.key).or_insert(serial);
        }
        if let Some(key) = card.and_then(EntityKey::new) {
            self.card_to_serial.entry(key.key).or_insert(serial);
        }
    }

    /// Look up the account key, then every card key, in both maps.
    pub fn find_existing(&self, account: Option<&EntityKey>, cards: &[EntityKey]) -> Option<u32> {
        let candidates = || account.into_iter().chain(cards.iter());

        // Pass 1: exact normalized keys
        for key in candidates() {
            if let Some(serial) = self.exact(&key.key) {
                return Some(serial);
            }
        }

        if !self.policy.fuzzy {
            return None;
        }

        // Pass 2: digit match against every registered key
        for key in candidates() {
            if let Some(serial) = self.fuzzy(key) {
                return Some(serial);
            }
        }

        None
    }

    /// Smallest positive integer not yet used (gap-filling).
    pub fn next_free_serial(&self) -> u32 {
        let mut candidate = 1;
        for used in self.used_serials.range(1..) {
            if *used != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    /// Resolve or allocate the serial for one entity.
    ///
    /// Takes `&mut self`, so callers sharing a registry must go through
    /// [`SharedRegistry::assign`], which holds the lock for the whole call.
    pub fn assign(&mut self, account: Option<&EntityKey>, cards: &[EntityKey]) -> Assignment {
        if let Some(serial) = self.find_existing(account, cards) {
            return Assignment {
                serial,
                outcome: AssignmentOutcome::Duplicate,
            };
        }

        let serial = self.next_free_serial();
        self.used_serials.insert(serial);

        if let Some(key) = account {
            self.account_to_serial.insert(key.key.clone(), serial);
        }
        for card in cards {
            self.card_to_serial.insert(card.key.clone(), serial);
        }

        Assignment {
            serial,
            outcome: AssignmentOutcome::New,
        }
    }

    pub fn used_count(&self) -> usize {
        self.used_serials.len()
    }

    pub fn account_count(&self) -> usize {
        self.account_to_serial.len()
    }

    pub fn card_count(&self) -> usize {
        self.card_to_serial.len()
    }

    fn exact(&self, key: &str) -> Option<u32> {
        self.account_to_serial
            .get(key)
            .or_else(|| self.card_to_serial.get(key))
            .copied()
    }

    /// Best digit match among all registered keys.
    ///
    /// Ranked by: identical digits, then the longest overlap, then the lowest
    /// serial, then the key itself, so the pick never depends on map order.
    fn fuzzy(&self, key: &EntityKey) -> Option<u32> {
        if key.digits.is_empty() {
            return None;
        }
        self.account_to_serial
            .iter()
            .chain(self.card_to_serial.iter())
            .filter(|(registered, _)| self.policy.digits.matches(&key.digits, registered))
            .min_by_key(|&(registered, serial)| {
                let digits = digits_only(registered);
                let overlap = digits.len().min(key.digits.len());
                (digits != key.digits, Reverse(overlap), *serial, registered.as_str())
            })
            .map(|(_, serial)| *serial)
    }
}

// ============================================================================
// SHARED HANDLE
// ============================================================================

/// Registry handle passed to every worker
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<SerialRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: SerialRegistry) -> Self {
        SharedRegistry {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    /// Atomic lookup-then-allocate-then-publish.
    pub fn assign(&self, account: Option<&EntityKey>, cards: &[EntityKey]) -> Assignment {
        self.inner.lock().assign(account, cards)
    }

    /// (used serials, account mappings, card mappings)
    pub fn counts(&self) -> (usize, usize, usize) {
        let guard = self.inner.lock();
        (guard.used_count(), guard.account_count(), guard.card_count())
    }
}

// ============================================================================
// TESTS
// ============================================================================

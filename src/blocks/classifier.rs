//! Access-frequency classifier.
//!
//! Counts reads per block address in two logical tables: a cold table for
//! blocks served from a compressed representation and a hot table for blocks
//! served raw. Both tables live in one sharded map keyed by address, so an
//! address is always in exactly one of them and every per-address update is
//! atomic under the shard lock. There is no lock spanning all addresses.
//!
//! Cold counts stop at the promotion threshold; the observation that reaches
//! it is the only one reporting a crossing. Hot counts stop at the saturation
//! bound, after which observations become read-only.

use dashmap::DashMap;
use serde::Serialize;

use crate::blocks::address::BlockAddress;
use crate::config::ClassifierConfig;

/// Which table an address is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Temperature {
    /// Stored compressed.
    Cold,
    /// Stored decompressed.
    Hot,
}

impl std::fmt::Display for Temperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Temperature::Cold => write!(f, "cold"),
            Temperature::Hot => write!(f, "hot"),
        }
    }
}

/// Counter state for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    pub temperature: Temperature,
    pub count: u32,
}

impl CounterEntry {
    fn cold(count: u32) -> Self {
        Self {
            temperature: Temperature::Cold,
            count,
        }
    }

    fn hot(count: u32) -> Self {
        Self {
            temperature: Temperature::Hot,
            count,
        }
    }
}

/// Result of a cold-path observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColdObservation {
    pub count: u32,
    /// True only for the observation that brought the count to the threshold.
    pub crossed_threshold: bool,
}

/// Table sizes at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierSnapshot {
    pub cold_entries: usize,
    pub hot_entries: usize,
}

/// Concurrent hot/cold access counter.
pub struct FrequencyClassifier {
    entries: DashMap<BlockAddress, CounterEntry>,
    promotion_threshold: u32,
    hot_saturation: u32,
}

impl FrequencyClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            entries: DashMap::new(),
            promotion_threshold: config.promotion_threshold.max(1),
            hot_saturation: config.hot_saturation.max(1),
        }
    }

    pub fn promotion_threshold(&self) -> u32 {
        self.promotion_threshold
    }

    pub fn hot_saturation(&self) -> u32 {
        self.hot_saturation
    }

    /// Count a read served from a compressed representation.
    ///
    /// An address still counted as hot is moved to the cold table first: the
    /// stored bytes are the ground truth for its classification.
    pub fn observe_cold(&self, address: &BlockAddress) -> ColdObservation {
        let mut entry = self
            .entries
            .entry(*address)
            .or_insert(CounterEntry::cold(0));

        if entry.temperature == Temperature::Hot {
            *entry = CounterEntry::cold(0);
        }

        if entry.count >= self.promotion_threshold {
            return ColdObservation {
                count: entry.count,
                crossed_threshold: false,
            };
        }

        entry.count += 1;
        ColdObservation {
            count: entry.count,
            crossed_threshold: entry.count == self.promotion_threshold,
        }
    }

    /// Count a read served from a raw representation. Returns the new count.
    pub fn observe_hot(&self, address: &BlockAddress) -> u32 {
        // Saturated entries only take a shared shard lock.
        if let Some(entry) = self.entries.get(address) {
            if entry.temperature == Temperature::Hot && entry.count >= self.hot_saturation {
                return entry.count;
            }
        }

        let mut entry = self
            .entries
            .entry(*address)
            .or_insert(CounterEntry::hot(0));

        if entry.temperature == Temperature::Cold {
            *entry = CounterEntry::hot(0);
        }
        if entry.count < self.hot_saturation {
            entry.count += 1;
        }
        entry.count
    }

    /// Record a completed promotion: the address leaves the cold table and
    /// starts a fresh hot entry at 1.
    pub fn reset_and_move_to_hot(&self, address: &BlockAddress) -> Option<CounterEntry> {
        self.entries.insert(*address, CounterEntry::hot(1))
    }

    /// Record a completed demotion: the address leaves the hot table and
    /// starts a fresh cold entry at 1.
    pub fn reset_and_move_to_cold(&self, address: &BlockAddress) -> Option<CounterEntry> {
        self.entries.insert(*address, CounterEntry::cold(1))
    }

    /// Reset a cold entry to the base value so the threshold can be crossed
    /// again. Used when a promotion request was dropped or failed.
    pub fn rearm(&self, address: &BlockAddress) -> bool {
        match self.entries.get_mut(address) {
            Some(mut entry) if entry.temperature == Temperature::Cold => {
                entry.count = 0;
                true
            }
            _ => false,
        }
    }

    /// Scan the hot table once.
    ///
    /// Entries at or below `floor` are returned as demotion candidates and
    /// left in place until their demotion completes; all other hot entries
    /// restart at 1 so the next scan measures fresh traffic.
    pub fn sweep_hot(&self, floor: u32) -> Vec<BlockAddress> {
        let mut candidates = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.temperature != Temperature::Hot {
                continue;
            }
            if entry.count <= floor {
                candidates.push(*entry.key());
            } else {
                entry.count = 1;
            }
        }
        candidates
    }

    pub fn get(&self, address: &BlockAddress) -> Option<CounterEntry> {
        self.entries.get(address).map(|entry| *entry)
    }

    pub fn temperature_of(&self, address: &BlockAddress) -> Option<Temperature> {
        self.get(address).map(|entry| entry.temperature)
    }

    /// Forget an address entirely.
    pub fn remove(&self, address: &BlockAddress) -> Option<CounterEntry> {
        self.entries.remove(address).map(|(_, entry)| entry)
    }

    pub fn snapshot(&self) -> ClassifierSnapshot {
        let mut snapshot = ClassifierSnapshot::default();
        for entry in self.entries.iter() {
            match entry.temperature {
                Temperature::Cold => snapshot.cold_entries += 1,
                Temperature::Hot => snapshot.hot_entries += 1,
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FrequencyClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

//! In-process session state shared by the engine and workers.
//!
//! Holds what the ledger does not: games blacklisted this session, games the
//! engine already traded, and a cache of per-team exposure. Rebuilt empty on
//! restart; the ledger position check covers what persisted.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::warn;

/// Session-scoped duplicate and blacklist tracking.
#[derive(Debug, Default)]
pub struct SessionStore {
    traded: RwLock<HashSet<String>>,
    blacklist: RwLock<HashMap<String, String>>,
    exposure: RwLock<HashMap<(String, String), u32>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a game has taken on exposure this session.
    pub fn mark_traded(&self, game_id: &str) {
        self.traded.write().insert(game_id.to_string());
    }

    #[must_use]
    pub fn is_traded(&self, game_id: &str) -> bool {
        self.traded.read().contains(game_id)
    }

    /// Blacklists a game for the rest of the session.
    pub fn blacklist(&self, game_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(game_id = %game_id, reason = %reason, "Game blacklisted");
        self.blacklist.write().insert(game_id.to_string(), reason);
    }

    /// Returns the blacklist reason for a game, if any.
    #[must_use]
    pub fn blacklist_reason(&self, game_id: &str) -> Option<String> {
        self.blacklist.read().get(game_id).cloned()
    }

    #[must_use]
    pub fn is_blacklisted(&self, game_id: &str) -> bool {
        self.blacklist.read().contains_key(game_id)
    }

    /// Caches venue A contracts held for a (game, team).
    pub fn set_exposure(&self, game_id: &str, team: &str, contracts: u32) {
        let key = (game_id.to_string(), team.to_string());
        let mut exposure = self.exposure.write();
        if contracts == 0 {
            exposure.remove(&key);
        } else {
            exposure.insert(key, contracts);
        }
    }

    /// Returns the cached exposure for a (game, team).
    #[must_use]
    pub fn exposure(&self, game_id: &str, team: &str) -> u32 {
        self.exposure
            .read()
            .get(&(game_id.to_string(), team.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traded_and_blacklist() {
        let store = SessionStore::new();
        assert!(!store.is_traded("g1"));
        store.mark_traded("g1");
        assert!(store.is_traded("g1"));

        store.blacklist("g2", "mapping mismatch");
        assert!(store.is_blacklisted("g2"));
        assert!(!store.is_blacklisted("g1"));
        assert_eq!(store.blacklist_reason("g2").as_deref(), Some("mapping mismatch"));
    }

    #[test]
    fn test_exposure_cache() {
        let store = SessionStore::new();
        store.set_exposure("g1", "LAL", 10);
        assert_eq!(store.exposure("g1", "LAL"), 10);
        assert_eq!(store.exposure("g1", "BOS"), 0);
        store.set_exposure("g1", "LAL", 0);
        assert_eq!(store.exposure("g1", "LAL"), 0);
    }
}

//! Static game/team to market mapping.
//!
//! Loaded from a JSON array of [`GameMapping`] records. Used for paper runs
//! and tests; live deployments plug in a service that queries the venues.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use sportsarb_core::{GameMapping, MappingError, MappingService};

/// In-memory [`MappingService`].
#[derive(Debug, Default)]
pub struct StaticMappingService {
    mappings: RwLock<HashMap<(String, String, String), GameMapping>>,
    unavailable: RwLock<Option<String>>,
}

impl StaticMappingService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a service from mappings.
    #[must_use]
    pub fn from_mappings(mappings: impl IntoIterator<Item = GameMapping>) -> Self {
        let service = Self::new();
        for mapping in mappings {
            service.insert(mapping);
        }
        service
    }

    /// Loads mappings from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mappings: Vec<GameMapping> = serde_json::from_str(&raw)?;
        info!(
            path = %path.as_ref().display(),
            mappings = mappings.len(),
            "Loaded game mappings"
        );
        Ok(Self::from_mappings(mappings))
    }

    /// Adds or replaces a mapping.
    pub fn insert(&self, mapping: GameMapping) {
        let key = (
            mapping.sport.clone(),
            mapping.game_id.clone(),
            mapping.team.clone(),
        );
        self.mappings.write().insert(key, mapping);
    }

    /// Makes every lookup fail as if the service were down.
    pub fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.write() = reason;
    }
}

#[async_trait]
impl MappingService for StaticMappingService {
    async fn resolve(
        &self,
        sport: &str,
        game_id: &str,
        team: &str,
    ) -> Result<GameMapping, MappingError> {
        if let Some(reason) = self.unavailable.read().clone() {
            return Err(MappingError::Unavailable(reason));
        }
        self.mappings
            .read()
            .get(&(sport.to_string(), game_id.to_string(), team.to_string()))
            .cloned()
            .ok_or_else(|| MappingError::NotFound {
                sport: sport.to_string(),
                game_id: game_id.to_string(),
                team: team.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_mapping() -> GameMapping {
        GameMapping {
            sport: "nba".to_string(),
            game_id: "LAL-BOS-20261019".to_string(),
            team: "LAL".to_string(),
            venue_a_market: "pm-lal-bos-lal".to_string(),
            venue_b_market: "KXNBA-LALBOS-LAL".to_string(),
            venue_b_is_opponent: false,
        }
    }

    #[tokio::test]
    async fn test_resolve() {
        let service = StaticMappingService::from_mappings([create_test_mapping()]);
        let found = service.resolve("nba", "LAL-BOS-20261019", "LAL").await.unwrap();
        assert_eq!(found.venue_b_market, "KXNBA-LALBOS-LAL");

        let missing = service.resolve("nba", "LAL-BOS-20261019", "BOS").await;
        assert!(matches!(missing, Err(MappingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let service = StaticMappingService::from_mappings([create_test_mapping()]);
        service.set_unavailable(Some("timeout".to_string()));
        assert!(matches!(
            service.resolve("nba", "LAL-BOS-20261019", "LAL").await,
            Err(MappingError::Unavailable(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");
        let json = serde_json::to_string(&vec![create_test_mapping()]).unwrap();
        std::fs::write(&path, json).unwrap();

        let service = StaticMappingService::from_json_file(&path).unwrap();
        assert_eq!(service.mappings.read().len(), 1);
    }
}

//! Moves the production alias to a comparison winner

use crate::error::PipelineResult;
use crate::registry::ModelRegistry;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// What a promotion did to the alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionOutcome {
    /// The alias already pointed at the winner
    Unchanged { version: u64 },
    /// The alias was moved; `from` is `None` when it was previously unset
    Moved { from: Option<u64>, to: u64 },
}

impl PromotionOutcome {
    pub fn is_moved(&self) -> bool {
        matches!(self, PromotionOutcome::Moved { .. })
    }
}

pub struct Promoter {
    registry: Arc<dyn ModelRegistry>,
}

impl Promoter {
    pub fn new(registry: Arc<dyn ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Point `alias` at `winner`. Idempotent.
    pub fn promote(&self, alias: &str, winner: u64) -> PipelineResult<PromotionOutcome> {
        let previous = self.registry.get_version_by_alias(alias)?;
        if previous == Some(winner) {
            info!(alias = %alias, version = winner, "Alias already on winner, nothing to promote");
            return Ok(PromotionOutcome::Unchanged { version: winner });
        }

        self.registry.set_alias(alias, winner)?;
        info!(
            alias = %alias,
            previous = ?previous,
            new = winner,
            "Alias promoted"
        );
        Ok(PromotionOutcome::Moved {
            from: previous,
            to: winner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::types::artifact::paths;

    fn registry_with(versions: &[u64]) -> Arc<InMemoryRegistry> {
        let registry = Arc::new(InMemoryRegistry::new());
        for &v in versions {
            registry.upload_artifact(v, paths::MODEL, b"model").unwrap();
        }
        registry
    }

    #[test]
    fn test_promote_moves_then_is_idempotent() {
        let registry = registry_with(&[1, 2]);
        let promoter = Promoter::new(registry.clone());

        let first = promoter.promote("production", 2).unwrap();
        assert_eq!(first, PromotionOutcome::Moved { from: None, to: 2 });
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(2));

        let again = promoter.promote("production", 2).unwrap();
        assert_eq!(again, PromotionOutcome::Unchanged { version: 2 });
        assert!(!again.is_moved());

        let back = promoter.promote("production", 1).unwrap();
        assert_eq!(back, PromotionOutcome::Moved { from: Some(2), to: 1 });
    }

    #[test]
    fn test_promote_unknown_version_leaves_alias() {
        let registry = registry_with(&[1]);
        registry.set_alias("production", 1).unwrap();
        let promoter = Promoter::new(registry.clone());

        assert!(promoter.promote("production", 5).is_err());
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(1));
    }
}

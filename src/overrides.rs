use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::levels::{DecisionLevel, LevelKey, LevelTable};

/// Hand-maintained correction for a grouping the heuristics get wrong:
/// every level whose key is in `old_keys` becomes one level keyed
/// `new_key`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LevelOverride {
    pub old_keys: BTreeSet<LevelKey>,
    pub new_key: LevelKey,
}

/// simulation id -> corrections, e.g.
///
/// ```json
/// { "sim-42": [ { "old_keys": ["2 --> 5", "3 --> 5"], "new_key": "2,3 --> 5" } ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OverrideSet {
    simulations: BTreeMap<String, Vec<LevelOverride>>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read overrides from {}", path.display()))?;
        let set: OverrideSet = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse overrides in {}", path.display()))?;
        debug!(
            "Loaded overrides for {} simulations from {}",
            set.simulations.len(),
            path.display()
        );
        Ok(set)
    }

    pub fn insert(
        &mut self,
        simulation_id: impl Into<String>,
        old_keys: impl IntoIterator<Item = LevelKey>,
        new_key: LevelKey,
    ) {
        self.simulations
            .entry(simulation_id.into())
            .or_default()
            .push(LevelOverride {
                old_keys: old_keys.into_iter().collect(),
                new_key,
            });
    }

    pub fn for_simulation(&self, simulation_id: &str) -> &[LevelOverride] {
        self.simulations
            .get(simulation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Rewrites a computed level table. Keys that are no longer present
    /// are reported and skipped; an override matching nothing is a no-op.
    pub fn apply(&self, simulation_id: &str, mut table: LevelTable) -> LevelTable {
        for o in self.for_simulation(simulation_id) {
            for missing in o.old_keys.iter().filter(|k| table.get(k).is_none()) {
                warn!(
                    "Override for simulation {simulation_id}: level '{missing}' no longer exists, skipping it"
                );
            }

            let (matched, mut rest): (Vec<DecisionLevel>, Vec<DecisionLevel>) = table
                .into_levels()
                .into_iter()
                .partition(|l| o.old_keys.contains(&l.key) || l.key == o.new_key);
            if !matched.iter().any(|l| o.old_keys.contains(&l.key)) {
                rest.extend(matched);
                table = LevelTable::from_levels(rest);
                continue;
            }

            debug!(
                "Override for simulation {simulation_id}: {} levels -> '{}'",
                matched.len(),
                o.new_key
            );
            rest.push(DecisionLevel {
                key: o.new_key.clone(),
                level_num: matched.iter().filter_map(|l| l.level_num).min(),
                members: matched.iter().flat_map(|l| l.members.iter().copied()).collect(),
                performance_branch: matched.iter().any(|l| l.performance_branch),
            });
            table = LevelTable::from_levels(rest);
        }
        table
    }
}

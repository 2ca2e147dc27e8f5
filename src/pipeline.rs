use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::assemble::{assemble_levels, LevelRow};
use crate::error::ParseError;
use crate::extract::extract_graph;
use crate::graph::NodeRow;
use crate::levels::compute_levels;
use crate::overrides::OverrideSet;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    /// Emit one node row per (node, skill) instead of one per node.
    pub split_by_score: bool,
}

/// One simulation's already-fetched authoring XML.
#[derive(Debug, Clone)]
pub struct SimulationSource {
    pub id: String,
    pub xml: String,
}

impl SimulationSource {
    pub fn new(id: impl Into<String>, xml: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            xml: xml.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SimulationOutput {
    pub simulation_id: String,
    pub name: String,
    pub nodes: Vec<NodeRow>,
    pub rows: Vec<LevelRow>,
}

#[derive(Debug)]
pub struct SimulationFailure {
    pub simulation_id: String,
    pub error: ParseError,
}

/// Outcome of a batch, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outputs: Vec<SimulationOutput>,
    pub failures: Vec<SimulationFailure>,
}

impl BatchReport {
    pub fn rows(&self) -> impl Iterator<Item = &LevelRow> {
        self.outputs.iter().flat_map(|o| o.rows.iter())
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Extract, level, apply overrides and assemble one simulation.
pub fn process_simulation(
    source: &SimulationSource,
    config: &EngineConfig,
    overrides: &OverrideSet,
) -> Result<SimulationOutput, ParseError> {
    let graph = extract_graph(&source.id, &source.xml)?;

    let computed = compute_levels(graph.transitions(), &graph.performance_branch_nodes());
    let table = overrides.apply(&source.id, computed);
    let rows = assemble_levels(&graph, &table);

    Ok(SimulationOutput {
        simulation_id: graph.simulation_id.clone(),
        name: graph.name.clone(),
        nodes: graph.node_rows(config.split_by_score),
        rows,
    })
}

/// Processes simulations in parallel. A simulation that fails to parse is
/// recorded in the report and does not stop the others.
pub fn run_batch(
    sources: &[SimulationSource],
    config: &EngineConfig,
    overrides: &OverrideSet,
) -> BatchReport {
    info!("Processing {} simulations", sources.len());

    let results: Vec<Result<SimulationOutput, SimulationFailure>> = sources
        .par_iter()
        .map(|source| {
            process_simulation(source, config, overrides).map_err(|error| SimulationFailure {
                simulation_id: source.id.clone(),
                error,
            })
        })
        .collect();

    let mut report = BatchReport::default();
    for result in results {
        match result {
            Ok(output) => report.outputs.push(output),
            Err(failure) => {
                warn!(
                    "Skipping simulation {}: {}",
                    failure.simulation_id, failure.error
                );
                report.failures.push(failure);
            }
        }
    }

    info!(
        "Batch finished: {} succeeded, {} failed",
        report.outputs.len(),
        report.failures.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"
        <scenario>
          <info><description name="Good"/></info>
          <elements>
            <element id="1"><result>Start</result></element>
            <element id="2"><choice>Yes</choice></element>
          </elements>
          <scoring><score from="1" element="2" type="3"/></scoring>
        </scenario>
    "#;

    #[test]
    fn test_batch_continues_past_bad_simulation() {
        let sources = vec![
            SimulationSource::new("a", GOOD),
            SimulationSource::new("b", "<scenario>"),
            SimulationSource::new("c", GOOD),
        ];
        let report = run_batch(&sources, &EngineConfig::default(), &OverrideSet::new());

        let ids: Vec<&str> = report.outputs.iter().map(|o| o.simulation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].simulation_id, "b");
        assert_eq!(report.rows().count(), 2);
    }

    #[test]
    fn test_overrides_applied_before_assembly() {
        let mut overrides = OverrideSet::new();
        overrides.insert("a", ["1 --> 2".into()], "opening".into());

        let output = process_simulation(
            &SimulationSource::new("a", GOOD),
            &EngineConfig::default(),
            &overrides,
        )
        .unwrap();
        assert_eq!(output.rows[0].level_key.as_str(), "opening");
        assert_eq!(output.rows[0].scenario_label, "Start");
    }
}

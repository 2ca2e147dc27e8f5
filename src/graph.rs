pub mod node;
pub mod transition;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::trace;
use serde::Serialize;

pub use node::{DialogueNode, NodeId, SkillScore};
pub use transition::{DecisionType, Transition};

/// One simulation's dialogue graph: node-id -> DialogueNode plus the
/// deduplicated transitions between them.
#[derive(Debug, Clone, Default)]
pub struct SimGraph {
    pub simulation_id: String,
    pub name: String,
    pub nodes: BTreeMap<NodeId, DialogueNode>,
    transitions: Vec<Transition>,
    /// (from, to) -> position in `transitions`.
    transition_index: HashMap<(Option<NodeId>, Option<NodeId>), usize>,
}

/// One row of the extracted node relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRow {
    pub simulation_id: String,
    pub node_id: NodeId,
    pub x: f64,
    pub y: f64,
    pub section_id: Option<String>,
    pub choice_text: String,
    pub result_text: String,
    pub coaching_text: String,
    pub feedback_text: String,
    pub behavior: Option<String>,
    pub consequence: Option<String>,
    pub performance_branch: bool,
    pub skills: Vec<SkillScore>,
}

impl SimGraph {
    pub fn new(simulation_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            simulation_id: simulation_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&DialogueNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut DialogueNode {
        self.nodes.entry(id).or_insert_with(|| DialogueNode::new(id))
    }

    pub fn insert_node(&mut self, node: DialogueNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Adds a transition unless one with the same `from-to` key exists.
    /// A classified duplicate replaces an unclassified one.
    pub fn add_transition(&mut self, transition: Transition) {
        let ends = (transition.from_id, transition.to_id);
        match self.transition_index.get(&ends) {
            Some(&i) => {
                let existing = &mut self.transitions[i];
                if existing.decision_type == DecisionType::Other
                    && transition.decision_type.is_classified()
                {
                    existing.decision_type = transition.decision_type;
                } else {
                    trace!("dropping duplicate transition {}", transition.key());
                }
            }
            None => {
                self.transition_index.insert(ends, self.transitions.len());
                self.transitions.push(transition);
            }
        }
    }

    /// Ids of nodes that trigger a performance branch.
    pub fn performance_branch_nodes(&self) -> BTreeSet<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.performance_branch)
            .map(|n| n.id)
            .collect()
    }

    /// The node relation: one row per (node, skill) when `split_by_score`,
    /// one row per node otherwise. A node without skills yields exactly
    /// one row either way.
    pub fn node_rows(&self, split_by_score: bool) -> Vec<NodeRow> {
        let mut rows = Vec::new();
        for node in self.nodes.values() {
            let base = NodeRow {
                simulation_id: self.simulation_id.clone(),
                node_id: node.id,
                x: node.x,
                y: node.y,
                section_id: node.section_id.clone(),
                choice_text: node.choice_text.clone(),
                result_text: node.result_text.clone(),
                coaching_text: node.coaching_text.clone(),
                feedback_text: node.feedback_text.clone(),
                behavior: node.behavior.clone(),
                consequence: node.consequence.clone(),
                performance_branch: node.performance_branch,
                skills: Vec::new(),
            };
            if split_by_score && !node.skills.is_empty() {
                for skill in &node.skills {
                    rows.push(NodeRow {
                        skills: vec![skill.clone()],
                        ..base.clone()
                    });
                }
            } else {
                rows.push(NodeRow {
                    skills: node.skills.clone(),
                    ..base
                });
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str) -> SkillScore {
        SkillScore {
            skill_id: None,
            skill_name: name.to_string(),
            value: 1.0,
        }
    }

    #[test]
    fn test_duplicate_transition_kept_once() {
        let mut graph = SimGraph::new("sim", "Sim");
        graph.add_transition(Transition::new(1, 2, DecisionType::Other));
        graph.add_transition(Transition::new(1, 2, DecisionType::Optimal));
        graph.add_transition(Transition::new(1, 2, DecisionType::Critical));

        assert_eq!(graph.transitions().len(), 1);
        assert_eq!(graph.transitions()[0].decision_type, DecisionType::Optimal);
    }

    #[test]
    fn test_duplicates_collapse_in_large_graph() {
        let mut graph = SimGraph::new("sim", "Sim");
        for round in 0..2 {
            for from in 0..200 {
                graph.add_transition(Transition::new(from, from + 1, DecisionType::Optimal));
            }
            let dangling = Transition {
                from_id: None,
                to_id: Some(4),
                decision_type: if round == 0 {
                    DecisionType::Other
                } else {
                    DecisionType::Critical
                },
            };
            graph.add_transition(dangling);
        }

        assert_eq!(graph.transitions().len(), 201);
        let firsts: Vec<_> = graph.transitions().iter().take(3).map(Transition::key).collect();
        assert_eq!(firsts, ["0-1", "1-2", "2-3"]);
        let last = &graph.transitions()[200];
        assert_eq!(last.key(), "null-4");
        assert_eq!(last.decision_type, DecisionType::Critical);
    }

    #[test]
    fn test_node_rows_split_by_score() {
        let mut graph = SimGraph::new("sim", "Sim");
        graph.node_mut(1).skills = vec![skill("Empathy"), skill("Clarity")];
        graph.node_mut(2);

        let split = graph.node_rows(true);
        assert_eq!(split.len(), 3);
        assert_eq!(split.iter().filter(|r| r.node_id == 2).count(), 1);
        assert!(split.iter().all(|r| r.skills.len() <= 1));

        let whole = graph.node_rows(false);
        assert_eq!(whole.len(), 2);
        assert_eq!(whole[0].skills.len(), 2);
    }
}

//! Display metadata for computed levels: section, final level number,
//! scenario label, and choice numbering.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use serde::Serialize;

use crate::graph::{DecisionType, NodeId, SimGraph, Transition};
use crate::levels::{DecisionLevel, LevelKey, LevelTable};

/// One output row: a level member and one of its classified choices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelRow {
    pub simulation_id: String,
    pub section_id: Option<String>,
    /// `None` for levels no root reaches; keep those out of ordered
    /// displays.
    pub level_num: Option<u32>,
    pub level_key: LevelKey,
    /// May carry trailing spaces so that labels repeated within a section
    /// stay distinct as grouping keys.
    pub scenario_label: String,
    pub choice_num: u32,
    pub decision_type: DecisionType,
    pub choice_text: String,
    pub performance_branch: bool,
    pub skill_names: Vec<String>,
}

impl LevelRow {
    pub fn is_leveled(&self) -> bool {
        self.level_num.is_some()
    }
}

/// A level with its section, final number and members in layout order.
struct Placement<'a> {
    level: &'a DecisionLevel,
    section_id: Option<String>,
    level_num: Option<u32>,
    members: Vec<NodeId>,
}

fn layout_order(graph: &SimGraph, level: &DecisionLevel) -> Vec<NodeId> {
    let mut members: Vec<NodeId> = level.members.iter().copied().collect();
    members.sort_by(|a, b| match (graph.get(*a), graph.get(*b)) {
        (Some(x), Some(y)) => x.layout_cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
    members
}

/// The section of the member highest on the canvas, lowest id on ties.
fn section_of(graph: &SimGraph, level: &DecisionLevel) -> Option<String> {
    level
        .members
        .iter()
        .filter_map(|id| graph.get(*id))
        .min_by(|a, b| a.y.total_cmp(&b.y).then(a.id.cmp(&b.id)))
        .and_then(|node| node.section_id.clone())
}

/// Numbered levels re-ranked densely by their computed number.
fn dense_numbers(table: &LevelTable) -> HashMap<u32, u32> {
    let mut raw: Vec<u32> = table.levels().iter().filter_map(|l| l.level_num).collect();
    raw.sort_unstable();
    raw.dedup();
    raw.into_iter().zip(1..).collect()
}

fn place<'a>(graph: &SimGraph, table: &'a LevelTable) -> Vec<Placement<'a>> {
    let dense = dense_numbers(table);
    let mut placements: Vec<Placement> = table
        .levels()
        .iter()
        .map(|level| Placement {
            level,
            section_id: section_of(graph, level),
            level_num: level.level_num.and_then(|n| dense.get(&n).copied()),
            members: layout_order(graph, level),
        })
        .collect();
    // Stable: unleveled levels keep table order at the end.
    placements.sort_by_key(|p| (p.level_num.is_none(), p.level_num));
    placements
}

/// Best incoming transition per target: `(label priority, from, to)`,
/// lowest first.
type Incoming = HashMap<NodeId, (u8, NodeId, NodeId)>;

fn best_incoming(graph: &SimGraph) -> Incoming {
    let mut best: Incoming = HashMap::new();
    for t in graph.transitions() {
        let Some((from, to)) = t.endpoints() else {
            continue;
        };
        let candidate = (t.decision_type.label_priority(), from, to);
        best.entry(to)
            .and_modify(|b| *b = (*b).min(candidate))
            .or_insert(candidate);
    }
    best
}

/// The result text of the member reached by the best incoming transition
/// (optimal first, then lowest source id). Falls back to the members' own
/// text, then to a synthesized name.
fn scenario_label(graph: &SimGraph, incoming: &Incoming, placement: &Placement) -> String {
    let entry = placement
        .level
        .members
        .iter()
        .filter_map(|m| incoming.get(m))
        .min();

    entry
        .and_then(|&(_, _, to)| graph.get(to))
        .map(|node| node.result_text.clone())
        .filter(|text| !text.is_empty())
        .or_else(|| {
            placement
                .members
                .iter()
                .filter_map(|id| graph.get(*id))
                .map(|node| node.result_text.clone())
                .find(|text| !text.is_empty())
        })
        .unwrap_or_else(|| match placement.level_num {
            Some(n) => format!("Decision Level #{n}"),
            None => format!("Decision Level {}", placement.level.key),
        })
}

/// Classified outgoing transitions per source node, by target id.
fn choices_by_source(graph: &SimGraph) -> BTreeMap<NodeId, Vec<&Transition>> {
    let mut outgoing: BTreeMap<NodeId, Vec<&Transition>> = BTreeMap::new();
    for t in graph.transitions() {
        if let (Some(from), Some(_)) = (t.from_id, t.to_id) {
            if t.decision_type.is_classified() {
                outgoing.entry(from).or_default().push(t);
            }
        }
    }
    for list in outgoing.values_mut() {
        list.sort_by_key(|t| t.to_id);
    }
    outgoing
}

/// Turns a level table into output rows, ordered by level number with
/// unleveled levels last.
pub fn assemble_levels(graph: &SimGraph, table: &LevelTable) -> Vec<LevelRow> {
    let placements = place(graph, table);
    let outgoing = choices_by_source(graph);
    let incoming = best_incoming(graph);
    let mut label_uses: HashMap<(Option<String>, String), usize> = HashMap::new();
    let mut rows = Vec::new();

    for placement in &placements {
        let label = scenario_label(graph, &incoming, placement);
        let uses = label_uses
            .entry((placement.section_id.clone(), label.clone()))
            .or_default();
        let scenario_label = format!("{label}{}", " ".repeat(*uses));
        if *uses > 0 {
            debug!(
                "Label '{label}' repeated in section {:?}; padded with {uses} spaces",
                placement.section_id
            );
        }
        *uses += 1;

        let mut choices: Vec<(DecisionType, String)> = Vec::new();
        for member in &placement.members {
            for t in outgoing.get(member).into_iter().flatten() {
                let target = t.to_id.and_then(|id| graph.get(id));
                let choice_text = target.map(|n| n.choice_text.clone()).unwrap_or_default();
                let choice = (t.decision_type, choice_text);
                let position = match choices.iter().position(|c| *c == choice) {
                    Some(i) => i,
                    None => {
                        choices.push(choice.clone());
                        choices.len() - 1
                    }
                };

                rows.push(LevelRow {
                    simulation_id: graph.simulation_id.clone(),
                    section_id: placement.section_id.clone(),
                    level_num: placement.level_num,
                    level_key: placement.level.key.clone(),
                    scenario_label: scenario_label.clone(),
                    choice_num: position as u32 + 1,
                    decision_type: choice.0,
                    choice_text: choice.1,
                    performance_branch: placement.level.performance_branch,
                    skill_names: target
                        .map(|n| {
                            n.skills
                                .iter()
                                .map(|s| s.skill_name.clone())
                                .filter(|name| !name.is_empty())
                                .collect()
                        })
                        .unwrap_or_default(),
                });
            }
        }
    }

    info!(
        "Assembled {} rows for {} levels of simulation {}",
        rows.len(),
        placements.len(),
        graph.simulation_id
    );
    rows
}

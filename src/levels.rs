//! Decision levels: groups of decision nodes that represent the same
//! logical choice point, however the learner got there.
//!
//! Every decision node gets a key built from three neighbourhood
//! groupings, keys that converge on the same successors are merged, and
//! the resulting levels are numbered by breadth-first distance from the
//! roots of the transition graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::graph::{NodeId, Transition};

const ARROW: &str = "-->";

// ---------------------------------------------------------------------------
// Level keys
// ---------------------------------------------------------------------------

/// `"{members} --> {successors}"`, ids sorted numerically and joined with
/// commas, or a bare node id for a node that could not be grouped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelKey(String);

fn join_ids<'a>(ids: impl IntoIterator<Item = &'a NodeId>) -> String {
    ids.into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl LevelKey {
    pub fn single(id: NodeId) -> Self {
        LevelKey(id.to_string())
    }

    fn with_successor_side(members: &BTreeSet<NodeId>, successors: &str) -> Self {
        LevelKey(format!("{} {ARROW} {successors}", join_ids(members)))
    }

    pub fn from_parts(members: &BTreeSet<NodeId>, successors: &BTreeSet<NodeId>) -> Self {
        if successors.is_empty() {
            return LevelKey(join_ids(members));
        }
        Self::with_successor_side(members, &join_ids(successors))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_successors(&self) -> bool {
        self.0.contains(ARROW)
    }

    pub fn successor_side(&self) -> Option<&str> {
        self.0.split_once(ARROW).map(|(_, right)| right.trim())
    }

    /// Ids on the left-hand side. Unparseable fragments are ignored.
    pub fn member_ids(&self) -> BTreeSet<NodeId> {
        let left = self.0.split_once(ARROW).map_or(self.0.as_str(), |(l, _)| l);
        left.split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LevelKey {
    fn from(key: String) -> Self {
        LevelKey(key)
    }
}

impl From<&str> for LevelKey {
    fn from(key: &str) -> Self {
        LevelKey(key.to_string())
    }
}

// ---------------------------------------------------------------------------
// Edge adjacency
// ---------------------------------------------------------------------------

/// Successor and predecessor maps over the transitions with both ends
/// present.
#[derive(Debug, Clone, Default)]
pub struct EdgeSet {
    successors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    predecessors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    decisions: BTreeSet<NodeId>,
    nodes: BTreeSet<NodeId>,
}

impl EdgeSet {
    pub fn from_transitions(transitions: &[Transition]) -> Self {
        let mut edges = EdgeSet::default();
        for t in transitions {
            let Some((from, to)) = t.endpoints() else {
                trace!("discarding transition {}", t.key());
                continue;
            };
            edges.successors.entry(from).or_default().insert(to);
            edges.predecessors.entry(to).or_default().insert(from);
            edges.nodes.insert(from);
            edges.nodes.insert(to);
            if t.decision_type.is_classified() {
                edges.decisions.insert(from);
            }
        }
        edges
    }

    /// Nodes with at least one critical, suboptimal or optimal outgoing
    /// transition.
    pub fn decision_nodes(&self) -> &BTreeSet<NodeId> {
        &self.decisions
    }

    pub fn successors_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.successors.get(&id).into_iter().flatten().copied()
    }

    pub fn predecessors_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.predecessors.get(&id).into_iter().flatten().copied()
    }

    /// Nodes without any incoming transition.
    pub fn roots(&self) -> BTreeSet<NodeId> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| !self.predecessors.contains_key(n))
            .collect()
    }

    /// Decision nodes sharing an immediate next step with `d`.
    pub fn forward_group(&self, d: NodeId) -> BTreeSet<NodeId> {
        self.successors_of(d)
            .flat_map(|s| self.predecessors_of(s))
            .filter(|p| self.decisions.contains(p))
            .collect()
    }

    /// Decision nodes sharing an immediate previous step with `d`.
    pub fn backward_group(&self, d: NodeId) -> BTreeSet<NodeId> {
        self.predecessors_of(d)
            .flat_map(|p| self.successors_of(p))
            .filter(|q| self.decisions.contains(q))
            .collect()
    }

    fn successors_of_group(&self, group: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        group.iter().flat_map(|&m| self.successors_of(m)).collect()
    }

    fn group_key(&self, group: &BTreeSet<NodeId>, d: NodeId) -> LevelKey {
        if group.is_empty() {
            return LevelKey::single(d);
        }
        LevelKey::from_parts(group, &self.successors_of_group(group))
    }

    /// Picks the key for one decision node from its three groupings.
    ///
    /// The intersection of the forward and backward groupings wins when it
    /// is non-trivial; the backward grouping is used only when the forward
    /// one is trivial.
    pub fn resolve_key(&self, d: NodeId) -> LevelKey {
        let forward = self.forward_group(d);
        let backward = self.backward_group(d);
        let both: BTreeSet<NodeId> = forward.intersection(&backward).copied().collect();

        let a = self.group_key(&forward, d);
        let b = self.group_key(&backward, d);
        let c = self.group_key(&both, d);
        trace!("node {d}: A='{a}' B='{b}' C='{c}'");

        if c.has_successors() {
            c
        } else if b.has_successors() && !a.has_successors() {
            b
        } else if a.has_successors() {
            a
        } else {
            LevelKey::single(d)
        }
    }

    /// A key per decision node, before convergence merging.
    pub fn assign_keys(&self) -> BTreeMap<NodeId, LevelKey> {
        self.decisions
            .iter()
            .map(|&d| (d, self.resolve_key(d)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Convergence merge
// ---------------------------------------------------------------------------

/// Collapses keys that lead to the same successors into one key whose
/// members are the union of theirs.
///
/// Keys belonging to, or listing, a performance-branch node are left
/// alone. Running this on its own output changes nothing.
pub fn merge_convergent(
    keys: &BTreeMap<NodeId, LevelKey>,
    performance_branch: &BTreeSet<NodeId>,
) -> BTreeMap<NodeId, LevelKey> {
    let pinned: BTreeSet<&LevelKey> = keys
        .iter()
        .filter(|(d, key)| {
            performance_branch.contains(*d)
                || !key.member_ids().is_disjoint(performance_branch)
        })
        .map(|(_, key)| key)
        .collect();

    let mut by_successors: BTreeMap<&str, BTreeSet<&LevelKey>> = BTreeMap::new();
    for key in keys.values() {
        if pinned.contains(key) {
            continue;
        }
        if let Some(right) = key.successor_side() {
            by_successors.entry(right).or_default().insert(key);
        }
    }

    let mut replacements: HashMap<&LevelKey, LevelKey> = HashMap::new();
    for (right, group) in by_successors {
        if group.len() < 2 {
            continue;
        }
        let members: BTreeSet<NodeId> = group.iter().flat_map(|k| k.member_ids()).collect();
        let merged = LevelKey::with_successor_side(&members, right);
        debug!("Merging {} keys converging on [{right}] into '{merged}'", group.len());
        for key in group {
            replacements.insert(key, merged.clone());
        }
    }

    keys.iter()
        .map(|(&d, key)| {
            let key = replacements.get(key).unwrap_or(key);
            (d, key.clone())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionLevel {
    pub key: LevelKey,
    /// `None` when no root reaches the level.
    pub level_num: Option<u32>,
    pub members: BTreeSet<NodeId>,
    pub performance_branch: bool,
}

/// All decision levels of one simulation, ordered by their lowest member.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelTable {
    levels: Vec<DecisionLevel>,
    #[serde(skip)]
    by_key: HashMap<LevelKey, usize>,
    #[serde(skip)]
    by_node: HashMap<NodeId, usize>,
}

impl LevelTable {
    pub fn from_levels(mut levels: Vec<DecisionLevel>) -> Self {
        levels.sort_by(|a, b| {
            a.members
                .first()
                .cmp(&b.members.first())
                .then_with(|| a.key.cmp(&b.key))
        });
        let by_key = levels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.key.clone(), i))
            .collect();
        let by_node = levels
            .iter()
            .enumerate()
            .flat_map(|(i, l)| l.members.iter().map(move |&m| (m, i)))
            .collect();
        Self {
            levels,
            by_key,
            by_node,
        }
    }

    pub fn levels(&self) -> &[DecisionLevel] {
        &self.levels
    }

    pub fn into_levels(self) -> Vec<DecisionLevel> {
        self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn get(&self, key: &LevelKey) -> Option<&DecisionLevel> {
        self.by_key.get(key).map(|&i| &self.levels[i])
    }

    pub fn level_of(&self, node: NodeId) -> Option<&DecisionLevel> {
        self.by_node.get(&node).map(|&i| &self.levels[i])
    }

    /// Overwrites the number of the level keyed `key`. Returns false when
    /// no such level exists.
    pub fn set_level_num(&mut self, key: &LevelKey, level_num: Option<u32>) -> bool {
        match self.by_key.get(key) {
            Some(&i) => {
                self.levels[i].level_num = level_num;
                true
            }
            None => false,
        }
    }

    /// Numbered levels in level order; unleveled ones are left out.
    pub fn ordered(&self) -> Vec<&DecisionLevel> {
        let mut numbered: Vec<&DecisionLevel> =
            self.levels.iter().filter(|l| l.level_num.is_some()).collect();
        numbered.sort_by_key(|l| l.level_num);
        numbered
    }

    /// Breadth-first numbering from the roots. A level is numbered the
    /// first time any of its members is reached.
    fn number_from_roots(&mut self, edges: &EdgeSet) {
        let mut next_num = 1;
        let roots = edges.roots();
        self.number_reached(&roots, edges, &mut next_num);

        let mut seen = roots.clone();
        let mut frontier = roots;
        loop {
            let reached: BTreeSet<NodeId> = frontier
                .iter()
                .flat_map(|&n| edges.successors_of(n))
                .filter(|n| !seen.contains(n))
                .collect();
            if reached.is_empty() {
                break;
            }
            self.number_reached(&reached, edges, &mut next_num);
            seen.extend(reached.iter().copied());
            frontier = reached;
        }
    }

    /// Numbers every un-numbered level meeting `reached`. Levels hit in the
    /// same step are numbered in edge order among themselves.
    fn number_reached(&mut self, reached: &BTreeSet<NodeId>, edges: &EdgeSet, next_num: &mut u32) {
        let hit: Vec<usize> = self
            .levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.level_num.is_none() && !l.members.is_disjoint(reached))
            .map(|(i, _)| i)
            .collect();

        for i in self.edge_order(&hit, edges) {
            self.levels[i].level_num = Some(*next_num);
            *next_num += 1;
        }
    }

    /// Topological order of the levels at `hit` by the transitions between
    /// their members. Ties, and cycles, fall back to table order.
    fn edge_order(&self, hit: &[usize], edges: &EdgeSet) -> Vec<usize> {
        let owner: HashMap<NodeId, usize> = hit
            .iter()
            .enumerate()
            .flat_map(|(pos, &i)| self.levels[i].members.iter().map(move |&m| (m, pos)))
            .collect();

        let mut after: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); hit.len()];
        let mut pending = vec![0usize; hit.len()];
        for (&member, &pos) in &owner {
            for next in edges.successors_of(member).filter_map(|s| owner.get(&s).copied()) {
                if next != pos && after[pos].insert(next) {
                    pending[next] += 1;
                }
            }
        }

        let mut placed = vec![false; hit.len()];
        let mut order = Vec::with_capacity(hit.len());
        while order.len() < hit.len() {
            let free = (0..hit.len()).find(|&p| !placed[p] && pending[p] == 0);
            let Some(pos) = free.or_else(|| (0..hit.len()).find(|&p| !placed[p])) else {
                break;
            };
            if free.is_none() {
                trace!("cycle among levels reached together; falling back to table order");
            }
            placed[pos] = true;
            order.push(hit[pos]);
            for &next in &after[pos] {
                pending[next] = pending[next].saturating_sub(1);
            }
        }
        order
    }
}

/// Groups the decision nodes of one simulation into numbered levels.
///
/// Transitions with a missing endpoint are ignored. A graph without any
/// decision node yields an empty table.
pub fn compute_levels(
    transitions: &[Transition],
    performance_branch: &BTreeSet<NodeId>,
) -> LevelTable {
    let edges = EdgeSet::from_transitions(transitions);
    if edges.decision_nodes().is_empty() {
        debug!("No decision nodes; nothing to level");
        return LevelTable::default();
    }

    let keys = merge_convergent(&edges.assign_keys(), performance_branch);

    let mut grouped: BTreeMap<LevelKey, BTreeSet<NodeId>> = BTreeMap::new();
    for (d, key) in keys {
        grouped.entry(key).or_default().insert(d);
    }

    let levels = grouped
        .into_iter()
        .map(|(key, members)| DecisionLevel {
            performance_branch: !members.is_disjoint(performance_branch),
            key,
            level_num: None,
            members,
        })
        .collect();

    let mut table = LevelTable::from_levels(levels);
    table.number_from_roots(&edges);

    let unleveled = table.levels().iter().filter(|l| l.level_num.is_none()).count();
    info!(
        "Computed {} decision levels from {} decision nodes ({} unreachable)",
        table.len(),
        edges.decision_nodes().len(),
        unleveled
    );

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DecisionType::{self, *};

    fn edges(list: &[(NodeId, NodeId, DecisionType)]) -> Vec<Transition> {
        list.iter()
            .map(|&(from, to, kind)| Transition::new(from, to, kind))
            .collect()
    }

    fn ids(list: &[NodeId]) -> BTreeSet<NodeId> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_level_key_parts() {
        let key = LevelKey::from_parts(&ids(&[10, 2]), &ids(&[4]));
        assert_eq!(key.as_str(), "2,10 --> 4");
        assert_eq!(key.successor_side(), Some("4"));
        assert_eq!(key.member_ids(), ids(&[2, 10]));
        assert!(!LevelKey::single(3).has_successors());
        assert_eq!(LevelKey::single(3).member_ids(), ids(&[3]));
    }

    #[test]
    fn test_single_edge() {
        let table = compute_levels(&edges(&[(1, 2, Optimal)]), &BTreeSet::new());
        assert_eq!(table.len(), 1);
        let level = &table.levels()[0];
        assert_eq!(level.members, ids(&[1]));
        assert_eq!(level.level_num, Some(1));
        assert_eq!(level.key.as_str(), "1 --> 2");
    }

    #[test]
    fn test_diamond_merges_converging_branches() {
        let transitions = edges(&[
            (1, 2, Optimal),
            (1, 3, Suboptimal),
            (2, 4, Optimal),
            (3, 4, Critical),
        ]);
        let table = compute_levels(&transitions, &BTreeSet::new());

        assert_eq!(table.len(), 2);
        assert_eq!(table.level_of(1).unwrap().level_num, Some(1));
        let second = table.level_of(2).unwrap();
        assert_eq!(second.members, ids(&[2, 3]));
        assert_eq!(second.key.as_str(), "2,3 --> 4");
        assert_eq!(second.level_num, Some(2));
    }

    #[test]
    fn test_no_decision_nodes_is_empty() {
        let table = compute_levels(&edges(&[(1, 2, Other), (2, 3, Other)]), &BTreeSet::new());
        assert!(table.is_empty());
    }

    #[test]
    fn test_transitions_with_missing_side_discarded() {
        let mut transitions = edges(&[(1, 2, Optimal)]);
        transitions.push(Transition {
            from_id: None,
            to_id: Some(1),
            decision_type: Optimal,
        });
        let table = compute_levels(&transitions, &BTreeSet::new());
        // 1 stays a root because the dangling edge into it was dropped.
        assert_eq!(table.level_of(1).unwrap().level_num, Some(1));
    }

    /// Two separate parents whose children both lead to node 5.
    fn converging_from_two_roots() -> Vec<Transition> {
        edges(&[
            (1, 2, Optimal),
            (1, 7, Critical),
            (8, 3, Optimal),
            (8, 9, Critical),
            (2, 5, Optimal),
            (3, 5, Optimal),
        ])
    }

    #[test]
    fn test_convergence_merge_across_parents() {
        let edge_set = EdgeSet::from_transitions(&converging_from_two_roots());
        let keys = edge_set.assign_keys();
        assert_eq!(keys[&2].as_str(), "2 --> 5");
        assert_eq!(keys[&3].as_str(), "3 --> 5");

        let merged = merge_convergent(&keys, &BTreeSet::new());
        assert_eq!(merged[&2].as_str(), "2,3 --> 5");
        assert_eq!(merged[&3].as_str(), "2,3 --> 5");
        assert_eq!(merge_convergent(&merged, &BTreeSet::new()), merged);
    }

    #[test]
    fn test_performance_branch_node_not_merged() {
        let perf = ids(&[2]);
        let table = compute_levels(&converging_from_two_roots(), &perf);

        let pinned = table.level_of(2).unwrap();
        assert_eq!(pinned.members, ids(&[2]));
        assert!(pinned.performance_branch);
        let other = table.level_of(3).unwrap();
        assert_eq!(other.members, ids(&[3]));
        assert!(!other.performance_branch);
    }

    #[test]
    fn test_roots_share_first_numbers() {
        let table = compute_levels(&converging_from_two_roots(), &BTreeSet::new());
        assert_eq!(table.level_of(1).unwrap().level_num, Some(1));
        assert_eq!(table.level_of(8).unwrap().level_num, Some(2));
        assert_eq!(table.level_of(2).unwrap().level_num, Some(3));
    }

    #[test]
    fn test_cycle_without_root_is_unleveled() {
        let transitions = edges(&[
            (1, 2, Optimal),
            (10, 11, Optimal),
            (11, 10, Optimal),
        ]);
        let table = compute_levels(&transitions, &BTreeSet::new());
        assert_eq!(table.level_of(1).unwrap().level_num, Some(1));
        assert_eq!(table.level_of(10).unwrap().level_num, None);
        assert_eq!(table.level_of(11).unwrap().level_num, None);
        assert_eq!(table.ordered().len(), 1);
    }

    #[test]
    fn test_performance_shortcut_back_edge_terminates() {
        // 3 jumps back to 1; BFS must still stop.
        let transitions = edges(&[
            (1, 2, Optimal),
            (2, 3, Optimal),
            (3, 1, Critical),
            (3, 4, Optimal),
            (0, 1, Other),
        ]);
        let table = compute_levels(&transitions, &ids(&[3]));
        let nums: Vec<Option<u32>> = [1, 2, 3]
            .iter()
            .map(|&n| table.level_of(n).unwrap().level_num)
            .collect();
        assert_eq!(nums, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_levels_increase_along_chain() {
        let transitions = edges(&[
            (1, 2, Optimal),
            (1, 3, Critical),
            (2, 4, Optimal),
            (3, 4, Suboptimal),
            (4, 5, Optimal),
            (4, 6, Critical),
            (5, 7, Optimal),
        ]);
        let table = compute_levels(&transitions, &BTreeSet::new());
        for t in &transitions {
            let (from, to) = t.endpoints().unwrap();
            let (Some(a), Some(b)) = (table.level_of(from), table.level_of(to)) else {
                continue;
            };
            if a.key != b.key {
                assert!(b.level_num > a.level_num, "{from}->{to}");
            }
        }
    }

    #[test]
    fn test_levels_reached_together_follow_their_edges() {
        // 2 and 3 are both first reached from 1, but 3 -> 2.
        let transitions = edges(&[
            (1, 3, Optimal),
            (1, 2, Critical),
            (3, 2, Optimal),
            (2, 4, Optimal),
        ]);
        let table = compute_levels(&transitions, &BTreeSet::new());

        let num = |id| table.level_of(id).and_then(|l| l.level_num);
        assert_eq!(table.level_of(3).unwrap().key.as_str(), "3 --> 2");
        assert_eq!(table.level_of(2).unwrap().key.as_str(), "2 --> 4");
        assert_eq!(num(1), Some(1));
        assert_eq!(num(3), Some(2));
        assert_eq!(num(2), Some(3));
    }

    #[test]
    fn test_cycle_among_levels_reached_together_numbers_all() {
        let transitions = edges(&[
            (1, 2, Optimal),
            (1, 3, Critical),
            (2, 3, Optimal),
            (3, 2, Optimal),
            (2, 4, Optimal),
            (3, 5, Optimal),
        ]);
        let table = compute_levels(&transitions, &BTreeSet::new());

        let nums: BTreeSet<u32> = table.levels().iter().filter_map(|l| l.level_num).collect();
        assert_eq!(nums.len(), table.len());
        assert_eq!(table.level_of(1).and_then(|l| l.level_num), Some(1));
    }

    #[test]
    fn test_lookups_are_indexed_by_key_and_member() {
        let mut table = compute_levels(&edges(&[(1, 2, Optimal), (2, 3, Optimal)]), &BTreeSet::new());
        let key: LevelKey = "2 --> 3".into();

        assert_eq!(table.get(&key).map(|l| l.members.clone()), Some(ids(&[2])));
        assert_eq!(table.level_of(2).map(|l| &l.key), Some(&key));
        assert!(table.level_of(3).is_none());

        assert!(table.set_level_num(&key, Some(9)));
        assert_eq!(table.level_of(2).and_then(|l| l.level_num), Some(9));
        assert!(!table.set_level_num(&"7 --> 8".into(), Some(1)));
    }
}

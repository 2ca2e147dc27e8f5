use serde::Serialize;

use super::node::NodeId;

/// How the authoring tool classified a learner's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Critical,
    Suboptimal,
    Optimal,
    Other,
}

impl DecisionType {
    pub fn code(self) -> u8 {
        match self {
            DecisionType::Critical => 1,
            DecisionType::Suboptimal => 2,
            DecisionType::Optimal => 3,
            DecisionType::Other => 4,
        }
    }

    /// Accepts the symbolic names as well as the numeric codes.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "critical" => Some(DecisionType::Critical),
            "2" | "suboptimal" => Some(DecisionType::Suboptimal),
            "3" | "optimal" => Some(DecisionType::Optimal),
            "4" | "other" | "" => Some(DecisionType::Other),
            _ => None,
        }
    }

    /// Critical, suboptimal and optimal choices make their source node a
    /// decision node.
    pub fn is_classified(self) -> bool {
        self.code() <= 3
    }

    /// Rank used when choosing which incoming transition names a level.
    /// Optimal wins.
    pub fn label_priority(self) -> u8 {
        match self {
            DecisionType::Optimal => 1,
            DecisionType::Suboptimal => 2,
            DecisionType::Critical => 3,
            DecisionType::Other => 4,
        }
    }
}

/// A directed edge between two dialogue nodes.
///
/// Either side may be missing when the score block references an element
/// the export left out; those edges are kept here and dropped by the level
/// computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from_id: Option<NodeId>,
    pub to_id: Option<NodeId>,
    pub decision_type: DecisionType,
}

impl Transition {
    pub fn new(from_id: NodeId, to_id: NodeId, decision_type: DecisionType) -> Self {
        Self {
            from_id: Some(from_id),
            to_id: Some(to_id),
            decision_type,
        }
    }

    /// `"{from}-{to}"`, with `null` standing in for a missing side.
    pub fn key(&self) -> String {
        fn side(id: Option<NodeId>) -> String {
            id.map_or_else(|| "null".to_string(), |id| id.to_string())
        }
        format!("{}-{}", side(self.from_id), side(self.to_id))
    }

    pub fn endpoints(&self) -> Option<(NodeId, NodeId)> {
        Some((self.from_id?, self.to_id?))
    }
}

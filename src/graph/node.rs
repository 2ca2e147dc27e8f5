use serde::Serialize;

/// Authoring-tool element id.
pub type NodeId = i64;

/// One skill scored when a learner reaches a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillScore {
    /// Missing in some exports; carried through rather than dropped.
    pub skill_id: Option<String>,
    pub skill_name: String,
    pub value: f64,
}

/// A single authored dialogue screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DialogueNode {
    pub id: NodeId,
    /// Layout position. Only used as a deterministic tie-break.
    pub x: f64,
    pub y: f64,
    pub section_id: Option<String>,
    /// The answer the learner picked to arrive here.
    pub choice_text: String,
    /// What the simulation says back once the node is reached.
    pub result_text: String,
    pub coaching_text: String,
    pub feedback_text: String,
    pub behavior: Option<String>,
    pub consequence: Option<String>,
    pub skills: Vec<SkillScore>,
    /// The node triggers a performance branch, a shortcut back into an
    /// earlier part of the simulation.
    pub performance_branch: bool,
}

impl DialogueNode {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Display order: top of the canvas first, then left to right, then id.
    pub fn layout_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.y
            .total_cmp(&other.y)
            .then(self.x.total_cmp(&other.x))
            .then(self.id.cmp(&other.id))
    }
}

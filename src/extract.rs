//! Authoring XML -> [`SimGraph`].
//!
//! Only reads already-fetched document text; fetching and staging the XML
//! is the caller's business.

pub mod text;

use std::collections::HashMap;

use log::{debug, info, trace};
use roxmltree::{Document, Node};

use crate::error::ParseError;
use crate::graph::{DecisionType, DialogueNode, NodeId, SimGraph, SkillScore, Transition};
use text::clean_text;

/// Parses one simulation's authoring XML.
pub fn extract_graph(simulation_id: &str, xml: &str) -> Result<SimGraph, ParseError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if !root.has_tag_name("scenario") {
        return Err(ParseError::UnexpectedRoot {
            found: root.tag_name().name().to_string(),
        });
    }

    let info = child(root, "info").ok_or(ParseError::MissingElement {
        path: "scenario/info",
    })?;
    let description = child(info, "description").ok_or(ParseError::MissingElement {
        path: "scenario/info/description",
    })?;
    let name = simulation_name(description).ok_or(ParseError::MissingElement {
        path: "scenario/info/description/name",
    })?;

    let sections = SectionLookup::from_scenario(root);
    let catalogue = skill_catalogue(root);
    let mut graph = SimGraph::new(simulation_id, name);

    for element in root.descendants().filter(|n| n.has_tag_name("element")) {
        let node = parse_element(element, &sections)?;
        trace!("element {} at ({}, {})", node.id, node.x, node.y);
        graph.insert_node(node);
    }

    for score in root.descendants().filter(|n| n.has_tag_name("score")) {
        apply_score(&mut graph, score, &catalogue)?;
    }

    info!(
        "Extracted simulation {} ('{}'): {} nodes, {} transitions",
        graph.simulation_id,
        graph.name,
        graph.nodes.len(),
        graph.transitions().len()
    );

    Ok(graph)
}

// ---------------------------------------------------------------------------
// Document helpers
// ---------------------------------------------------------------------------

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| c.has_tag_name(tag))
}

/// All text under `node`, with nested `<br/>` elements kept as breaks.
fn inner_text(node: Node) -> String {
    let mut raw = String::new();
    for d in node.descendants() {
        if d.is_text() {
            raw.push_str(d.text().unwrap_or_default());
        } else if d.has_tag_name("br") {
            raw.push_str("<br>");
        }
    }
    clean_text(&raw)
}

fn child_text(node: Node, tag: &str) -> String {
    child(node, tag).map(inner_text).unwrap_or_default()
}

/// Two export shapes exist: `<description><name>..</name></description>`
/// and `<description name=".."/>`.
fn simulation_name(description: Node) -> Option<String> {
    child(description, "name")
        .map(inner_text)
        .filter(|name| !name.is_empty())
        .or_else(|| description.attribute("name").map(clean_text))
}

fn parse_id(
    node: Node,
    element: &'static str,
    attribute: &'static str,
) -> Result<Option<NodeId>, ParseError> {
    match node.attribute(attribute).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ParseError::InvalidAttribute {
                element,
                attribute,
                value: raw.to_string(),
            }),
    }
}

fn parse_number(
    node: Node,
    element: &'static str,
    attribute: &'static str,
) -> Result<f64, ParseError> {
    match node.attribute(attribute).map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(raw) => raw.parse().map_err(|_| ParseError::InvalidAttribute {
            element,
            attribute,
            value: raw.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Sections and skills
// ---------------------------------------------------------------------------

/// Section reference -> section id.
///
/// Older exports key sections by `refId`, newer ones by `ref`; the
/// presence of any `ref` attribute decides which one the document uses.
struct SectionLookup {
    by_ref: HashMap<String, String>,
}

impl SectionLookup {
    fn from_scenario(root: Node) -> Self {
        let sections: Vec<Node> = root
            .descendants()
            .filter(|n| n.has_tag_name("section"))
            .collect();
        let key_attr = if sections.iter().any(|s| s.has_attribute("ref")) {
            "ref"
        } else {
            "refId"
        };
        debug!("Section lookup keyed on '{key_attr}' ({} sections)", sections.len());

        let by_ref = sections
            .iter()
            .filter_map(|s| {
                let key = s.attribute(key_attr)?;
                let id = s.attribute("id").unwrap_or(key);
                Some((key.to_string(), id.to_string()))
            })
            .collect();
        Self { by_ref }
    }

    fn resolve(&self, element: Node) -> Option<String> {
        let reference = element
            .attribute("sectionRef")
            .or_else(|| element.attribute("section"))?;
        let resolved = self.by_ref.get(reference).cloned();
        if resolved.is_none() {
            debug!("Unknown section reference '{reference}'");
        }
        resolved
    }
}

/// Skill id -> skill name, from the optional `<skills>` block.
fn skill_catalogue(root: Node) -> HashMap<String, String> {
    root.descendants()
        .filter(|n| n.has_tag_name("skill"))
        .filter_map(|s| Some((s.attribute("id")?.to_string(), s.attribute("name")?.to_string())))
        .collect()
}

// ---------------------------------------------------------------------------
// Elements and score blocks
// ---------------------------------------------------------------------------

fn parse_element(element: Node, sections: &SectionLookup) -> Result<DialogueNode, ParseError> {
    let id = parse_id(element, "element", "id")?.ok_or(ParseError::InvalidAttribute {
        element: "element",
        attribute: "id",
        value: String::new(),
    })?;

    Ok(DialogueNode {
        id,
        x: parse_number(element, "element", "x")?,
        y: parse_number(element, "element", "y")?,
        section_id: sections.resolve(element),
        choice_text: child_text(element, "choice"),
        result_text: child_text(element, "result"),
        coaching_text: child_text(element, "coaching"),
        performance_branch: child(element, "performanceBranch").is_some(),
        ..DialogueNode::new(id)
    })
}

/// A `<score>` block names the element a choice leads to, the element the
/// choice was made on, the decision type, and what the choice scores.
fn apply_score(
    graph: &mut SimGraph,
    score: Node,
    catalogue: &HashMap<String, String>,
) -> Result<(), ParseError> {
    let to_id = parse_id(score, "score", "element")?;
    let from_id = parse_id(score, "score", "from")?;
    let raw_type = score.attribute("type").unwrap_or_default();
    let decision_type = DecisionType::parse(raw_type).ok_or(ParseError::InvalidAttribute {
        element: "score",
        attribute: "type",
        value: raw_type.to_string(),
    })?;

    graph.add_transition(Transition {
        from_id,
        to_id,
        decision_type,
    });

    let Some(node) = to_id.and_then(|id| graph.nodes.get_mut(&id)) else {
        debug!(
            "Score block {:?}->{:?} references no known element",
            from_id, to_id
        );
        return Ok(());
    };

    for skill in score.children().filter(|c| c.has_tag_name("skillScore")) {
        let skill_id = skill
            .attribute("skill")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let skill_name = skill
            .attribute("name")
            .map(clean_text)
            .or_else(|| skill_id.as_ref().and_then(|id| catalogue.get(id).cloned()))
            .unwrap_or_default();
        let parsed = SkillScore {
            skill_id,
            skill_name,
            value: parse_number(skill, "skillScore", "value")?,
        };
        let known = node
            .skills
            .iter()
            .any(|s| s.skill_id == parsed.skill_id && s.skill_name == parsed.skill_name);
        if !known {
            node.skills.push(parsed);
        }
    }

    if node.feedback_text.is_empty() {
        node.feedback_text = child_text(score, "feedback");
    }
    if let Some(behavior) = child(score, "behavior") {
        if node.behavior.is_none() {
            node.behavior = Some(inner_text(behavior));
            node.consequence = behavior.attribute("consequence").map(clean_text);
        }
    }

    Ok(())
}

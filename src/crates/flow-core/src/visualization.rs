//! Runtime-state graph rendering — DOT, Mermaid, and ASCII.
//!
//! Adapted from the teacher's generic `StateGraph` visualizer: same three
//! output formats and the same escaping/sanitizing helpers, but rendering
//! a flow's *current FSM state* per node rather than a static compiled
//! graph. This is deliberately a different surface from
//! [`crate::visual`]'s `to_visual`/`from_visual`, which round-trips a
//! flow's static *definition* for editor tooling; this module answers "what
//! is happening right now" rather than "what could happen".
//!
//! Used by [`crate::engine::FlowEngine::visualize`].

use std::collections::HashMap;

use crate::definition::FlowDefinition;
use crate::fsm::{NodeState, RuntimeNode};

/// Output format for [`render_runtime_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    /// DOT format for Graphviz.
    Dot,
    /// Mermaid diagram format.
    Mermaid,
    /// Simple ASCII art.
    Ascii,
}

fn state_color_dot(state: NodeState) -> &'static str {
    match state {
        NodeState::Idle => "lightgray",
        NodeState::Ready => "lightyellow",
        NodeState::Running => "gold",
        NodeState::Completed => "palegreen",
        NodeState::Failed => "lightcoral",
        NodeState::Blocked => "plum",
    }
}

fn state_color_mermaid(state: NodeState) -> (&'static str, &'static str) {
    match state {
        NodeState::Idle => ("#F0F0F0", "#666"),
        NodeState::Ready => ("#FFF8DC", "#B8860B"),
        NodeState::Running => ("#FFD700", "#B8860B"),
        NodeState::Completed => ("#90EE90", "#228B22"),
        NodeState::Failed => ("#FFB6C1", "#DC143C"),
        NodeState::Blocked => ("#DDA0DD", "#8B008B"),
    }
}

/// Render the flow's definition and current per-node FSM state as a graph
/// in the requested format.
pub fn render_runtime_state(
    definition: &FlowDefinition,
    nodes: &HashMap<String, RuntimeNode>,
    format: VisualizationFormat,
) -> String {
    match format {
        VisualizationFormat::Dot => render_dot(definition, nodes),
        VisualizationFormat::Mermaid => render_mermaid(definition, nodes),
        VisualizationFormat::Ascii => render_ascii(definition, nodes),
    }
}

fn render_dot(definition: &FlowDefinition, nodes: &HashMap<String, RuntimeNode>) -> String {
    let mut out = String::new();
    out.push_str("digraph G {\n");
    out.push_str("    rankdir=TB;\n");
    out.push_str("    node [shape=box, style=rounded];\n");
    out.push_str(&format!("    labelloc=\"t\";\n    label=\"{}\";\n", escape_dot(&definition.flow)));

    for node in &definition.nodes {
        let state = nodes.get(&node.id).map(|n| n.state()).unwrap_or(NodeState::Idle);
        out.push_str(&format!(
            "    \"{}\" [label=\"{}\\n({:?})\", style=\"rounded,filled\", fillcolor={}];\n",
            escape_dot(&node.id),
            escape_dot(node.label.as_deref().unwrap_or(&node.id)),
            state,
            state_color_dot(state)
        ));
    }

    for edge in &definition.edges {
        for target in edge.to.as_vec() {
            let label = edge.predicate.as_deref().unwrap_or("");
            if label.is_empty() {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", escape_dot(&edge.from_), escape_dot(&target)));
            } else {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"{}\", style=dashed];\n",
                    escape_dot(&edge.from_),
                    escape_dot(&target),
                    escape_dot(label)
                ));
            }
        }
    }

    out.push_str("}\n");
    out
}

fn render_mermaid(definition: &FlowDefinition, nodes: &HashMap<String, RuntimeNode>) -> String {
    let mut out = String::new();
    out.push_str("graph TD\n");
    out.push_str(&format!("    title[\"{}\"]\n", escape_mermaid(&definition.flow)));

    for node in &definition.nodes {
        let id = sanitize_id(&node.id);
        let state = nodes.get(&node.id).map(|n| n.state()).unwrap_or(NodeState::Idle);
        let label = format!("{}\\n({:?})", node.label.as_deref().unwrap_or(&node.id), state);
        out.push_str(&format!("    {id}[\"{}\"]\n", escape_mermaid(&label)));
        let (fill, stroke) = state_color_mermaid(state);
        out.push_str(&format!("    style {id} fill:{fill},stroke:{stroke},stroke-width:2px\n"));
    }

    for edge in &definition.edges {
        for target in edge.to.as_vec() {
            if let Some(predicate) = &edge.predicate {
                out.push_str(&format!(
                    "    {} -.\"{}\"..-> {}\n",
                    sanitize_id(&edge.from_),
                    escape_mermaid(predicate),
                    sanitize_id(&target)
                ));
            } else {
                out.push_str(&format!("    {} --> {}\n", sanitize_id(&edge.from_), sanitize_id(&target)));
            }
        }
    }

    out
}

fn render_ascii(definition: &FlowDefinition, nodes: &HashMap<String, RuntimeNode>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Flow: {}\n", definition.flow));
    out.push_str("================\n\n");

    for node in &definition.nodes {
        let state = nodes.get(&node.id).map(|n| n.state()).unwrap_or(NodeState::Idle);
        out.push_str(&format!("[{}] ({:?})\n", node.id, state));
        for edge in definition.edges.iter().filter(|e| e.from_ == node.id) {
            for target in edge.to.as_vec() {
                out.push_str(&format!("  -> {target}\n"));
            }
        }
    }

    out
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

fn sanitize_id(s: &str) -> String {
    s.replace('-', "_").replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EdgeDefinition, EdgeTargets, EdgeCondition, NodeDefinition, NodeType};
    use crate::fsm::RuntimeNode;
    use std::collections::HashSet;

    fn sample() -> (FlowDefinition, HashMap<String, RuntimeNode>) {
        let def = FlowDefinition::new(
            "demo",
            vec![NodeDefinition::new("start", NodeType::Start), NodeDefinition::new("end", NodeType::End)],
            vec![EdgeDefinition {
                id: None,
                from_: "start".into(),
                to: EdgeTargets::One("end".into()),
                condition: EdgeCondition::Always,
                predicate: None,
                instruction: None,
                priority: 0,
                label: None,
            }],
        );
        let mut nodes = HashMap::new();
        nodes.insert("start".to_string(), RuntimeNode::new("start", HashSet::new(), 0));
        nodes.insert("end".to_string(), RuntimeNode::new("end", HashSet::new(), 0));
        (def, nodes)
    }

    #[test]
    fn dot_contains_digraph_and_nodes() {
        let (def, nodes) = sample();
        let dot = render_runtime_state(&def, &nodes, VisualizationFormat::Dot);
        assert!(dot.contains("digraph G"));
        assert!(dot.contains("start"));
        assert!(dot.contains("end"));
    }

    #[test]
    fn mermaid_contains_graph_td_and_styles() {
        let (def, nodes) = sample();
        let mermaid = render_runtime_state(&def, &nodes, VisualizationFormat::Mermaid);
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("style"));
    }

    #[test]
    fn ascii_lists_nodes_and_edges() {
        let (def, nodes) = sample();
        let ascii = render_runtime_state(&def, &nodes, VisualizationFormat::Ascii);
        assert!(ascii.contains("[start]"));
        assert!(ascii.contains("-> end"));
    }
}

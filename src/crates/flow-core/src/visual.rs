//! Visual-builder adapter: a flat `{nodes[], edges[]}` representation
//! that front-end flow editors can render directly, bidirectionally
//! convertible with [`FlowDefinition`].
//!
//! Grounded on `svelteflow.py`'s `to_svelteflow`/`from_svelteflow`: every
//! [`crate::definition::EdgeTargets::Many`] fans out into one visual edge
//! per target on the way out, and on the way back in, visual edges sharing
//! `(source, condition, predicate, instruction, priority)` are regrouped
//! into a single fan-out [`crate::definition::EdgeDefinition`] — the same
//! grouping key the Python `defaultdict`-based regrouping used.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::actions::ActionDefinition;
use crate::definition::{
    EdgeCondition, EdgeDefinition, EdgeTargets, FlowDefinition, FlowMetadata, NodeDefinition, NodePosition, NodeType,
};
use crate::error::Result;

/// One node as a visual-builder editor would render it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub position: NodePosition,
    pub data: VisualNodeData,
}

/// The `data` payload of a [`VisualNode`] — everything a builder UI needs
/// to render and edit a node's configuration panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualNodeData {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub agent_ref: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub pre_actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub post_actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_visual_condition() -> EdgeCondition {
    EdgeCondition::OnSuccess
}

/// One edge as a visual-builder editor would render it — always a single
/// source/target pair; fan-out is expressed as multiple `VisualEdge`s with
/// the same `source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    pub data: VisualEdgeData,
}

/// The `data` payload of a [`VisualEdge`], matching `svelteflow.py`'s
/// nesting of routing fields under `data` (mirroring [`VisualNodeData`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualEdgeData {
    #[serde(default = "default_visual_condition")]
    pub condition: EdgeCondition,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub priority: i64,
}

/// The complete flat representation handed to/from a visual flow builder —
/// just `{nodes[], edges[]}`, matching the wire shape in the engine's
/// external-interfaces section exactly (no `flow` name or flow-level
/// `metadata`: a browser editor only ever renders the graph shape, and the
/// flow's identity/settings are supplied separately by the caller of
/// [`from_visual`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualFlow {
    pub nodes: Vec<VisualNode>,
    pub edges: Vec<VisualEdge>,
}

/// Convert a [`FlowDefinition`] into its flat visual-builder representation.
/// Fan-out edges (multiple targets) expand into one [`VisualEdge`] per
/// target, each carrying an auto-generated id (`"{from}__{to}__{index}"`)
/// when the source definition didn't already carry one. The flow's name,
/// description and metadata are dropped — they have no place in the flat
/// wire shape and are reattached by [`from_visual`]'s caller.
pub fn to_visual(definition: &FlowDefinition) -> VisualFlow {
    let nodes = definition
        .nodes
        .iter()
        .map(|n| VisualNode {
            id: n.id.clone(),
            node_type: n.node_type,
            position: n.position,
            data: VisualNodeData {
                label: n.label.clone(),
                agent_ref: n.agent_ref.clone(),
                instruction: n.instruction.clone(),
                max_retries: n.max_retries,
                config: n.config.clone(),
                pre_actions: n.pre_actions.clone(),
                post_actions: n.post_actions.clone(),
                metadata: n.metadata.clone(),
            },
        })
        .collect();

    let mut edges = Vec::new();
    for edge in &definition.edges {
        for (i, target) in edge.to.as_vec().into_iter().enumerate() {
            let id = edge
                .id
                .clone()
                .map(|base| if i == 0 { base } else { format!("{base}__{i}") })
                .unwrap_or_else(|| format!("{}__{}__{}", edge.from_, target, i));
            edges.push(VisualEdge {
                id,
                source: edge.from_.clone(),
                target,
                label: edge.label.clone(),
                data: VisualEdgeData {
                    condition: edge.condition,
                    predicate: edge.predicate.clone(),
                    instruction: edge.instruction.clone(),
                    priority: edge.priority,
                },
            });
        }
    }

    VisualFlow { nodes, edges }
}

/// Grouping key used to regroup visual edges back into fan-out
/// [`EdgeDefinition`]s — matches `svelteflow.py::from_svelteflow`'s
/// `defaultdict` key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupKey {
    source: String,
    condition: EdgeCondition,
    predicate: Option<String>,
    instruction: Option<String>,
    priority: i64,
}

/// Convert a flat visual-builder representation back into a validated
/// [`FlowDefinition`] named `flow_name`, regrouping same-key edges into
/// fan-out targets. Flow-level `metadata` isn't part of the visual wire
/// shape, so the result carries [`FlowMetadata::default`] — callers that
/// need to preserve non-default settings (parallelism cap, retry defaults,
/// …) should overwrite `metadata` on the returned definition themselves.
pub fn from_visual(visual: VisualFlow, flow_name: impl Into<String>) -> Result<FlowDefinition> {
    let nodes: Vec<NodeDefinition> = visual
        .nodes
        .into_iter()
        .map(|n| NodeDefinition {
            id: n.id,
            node_type: n.node_type,
            label: n.data.label,
            agent_ref: n.data.agent_ref,
            instruction: n.data.instruction,
            max_retries: n.data.max_retries,
            config: n.data.config,
            pre_actions: n.data.pre_actions,
            post_actions: n.data.post_actions,
            metadata: n.data.metadata,
            position: n.position,
        })
        .collect();

    let mut groups: Vec<(GroupKey, Vec<String>, Option<String>)> = Vec::new();
    for edge in visual.edges {
        let key = GroupKey {
            source: edge.source.clone(),
            condition: edge.data.condition,
            predicate: edge.data.predicate.clone(),
            instruction: edge.data.instruction.clone(),
            priority: edge.data.priority,
        };
        if let Some(existing) = groups.iter_mut().find(|(k, _, _)| *k == key) {
            existing.1.push(edge.target);
        } else {
            groups.push((key, vec![edge.target], edge.label));
        }
    }

    let edges = groups
        .into_iter()
        .map(|(key, targets, label)| EdgeDefinition {
            id: None,
            from_: key.source,
            to: if targets.len() == 1 {
                EdgeTargets::One(targets.into_iter().next().unwrap())
            } else {
                EdgeTargets::Many(targets)
            },
            condition: key.condition,
            predicate: key.predicate,
            instruction: key.instruction,
            priority: key.priority,
            label,
        })
        .collect();

    let definition = FlowDefinition {
        flow: flow_name.into(),
        version: "1.0".to_string(),
        description: String::new(),
        created_at: None,
        updated_at: None,
        metadata: FlowMetadata::default(),
        nodes,
        edges,
    };
    definition.validate()?;
    Ok(definition)
}

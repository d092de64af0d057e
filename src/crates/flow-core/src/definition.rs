//! Flow Definition — the declarative, persistable description of a flow.
//!
//! Mirrors the JSON schema summarised in the flow engine's external
//! interfaces: a [`FlowDefinition`] is a flat list of [`NodeDefinition`]s
//! and [`EdgeDefinition`]s plus flow-level [`FlowMetadata`]. Validation of
//! structural invariants (unique node ids, edges referencing real nodes,
//! `agent` nodes carrying an `agent_ref`, `on_condition` edges carrying a
//! `predicate`) happens in [`FlowDefinition::validate`], called by every
//! constructor path (`serde` deserialisation does not validate by itself).
//!
//! Field naming follows the wire format exactly: `from`/`to` on edges are
//! reserved words in Rust, so the struct field is named `from_` and
//! renamed on the wire via `#[serde(rename = "from")]` — the same
//! workaround the Python source used for the same reason.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Node variants the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Virtual entry point; carries no agent, forwards the initial task.
    Start,
    /// Virtual terminal point; carries no agent, returns its input.
    End,
    /// Wraps a registered [`crate::agent::Agent`].
    Agent,
    /// Multi-agent voting/consensus node; materialised like `Agent`.
    Decision,
    /// Human-in-the-loop choice node; materialised like `Agent`.
    InteractiveDecision,
    /// Full human escalation node; materialised like `Agent`.
    Human,
}

impl NodeType {
    /// `true` for node types that require `agent_ref` to be present.
    pub fn requires_agent_ref(self) -> bool {
        matches!(
            self,
            NodeType::Agent | NodeType::Decision | NodeType::InteractiveDecision | NodeType::Human
        )
    }
}

/// UI position hint for visual flow builders. Ignored at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Default for NodePosition {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

/// Definition of a single node in the flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique node identifier within the flow.
    pub id: String,
    /// Node kind; determines materialisation and invariants.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Human-readable label for UI.
    #[serde(default)]
    pub label: Option<String>,
    /// Registered agent name; required when `node_type` is `agent`-like.
    #[serde(default)]
    pub agent_ref: Option<String>,
    /// Optional prompt override for this node.
    #[serde(default)]
    pub instruction: Option<String>,
    /// Maximum retry attempts on failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Type-specific configuration (e.g. decision question/options).
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Actions run before node execution, in order.
    #[serde(default)]
    pub pre_actions: Vec<crate::actions::ActionDefinition>,
    /// Actions run after node execution, in order.
    #[serde(default)]
    pub post_actions: Vec<crate::actions::ActionDefinition>,
    /// Arbitrary metadata forwarded to the runtime node.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// UI position hint; ignored at runtime.
    #[serde(default)]
    pub position: NodePosition,
}

fn default_max_retries() -> u32 {
    3
}

impl NodeDefinition {
    /// Construct a minimal node definition with defaults filled in.
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: None,
            agent_ref: None,
            instruction: None,
            max_retries: default_max_retries(),
            config: serde_json::Map::new(),
            pre_actions: Vec::new(),
            post_actions: Vec::new(),
            metadata: serde_json::Map::new(),
            position: NodePosition::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.node_type.requires_agent_ref() && self.agent_ref.is_none() {
            return Err(FlowError::MissingAgentRef {
                node: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Firing condition for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Unconditional: fires regardless of outcome.
    Always,
    /// Fires only if the source completed without error.
    OnSuccess,
    /// Fires only if the source failed.
    OnError,
    /// Fires only if the source timed out.
    OnTimeout,
    /// Fires only if `predicate` evaluates to `true` against the source's result.
    OnCondition,
}

/// One or more target node ids — fan-out is a plain list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeTargets {
    /// Single target (the common case).
    One(String),
    /// Fan-out to multiple targets.
    Many(Vec<String>),
}

impl EdgeTargets {
    /// Normalise to a plain `Vec<String>` regardless of wire shape.
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            EdgeTargets::One(s) => vec![s.clone()],
            EdgeTargets::Many(v) => v.clone(),
        }
    }
}

/// Definition of a directed edge (transition) between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Optional UI-facing edge id.
    #[serde(default)]
    pub id: Option<String>,
    /// Source node id.
    #[serde(rename = "from")]
    pub from_: String,
    /// Target node id(s).
    pub to: EdgeTargets,
    /// Firing condition.
    #[serde(default = "default_condition")]
    pub condition: EdgeCondition,
    /// CEL-like predicate expression; required when `condition == on_condition`.
    #[serde(default)]
    pub predicate: Option<String>,
    /// Optional prompt override for target node(s).
    #[serde(default)]
    pub instruction: Option<String>,
    /// Higher priority transitions are evaluated first.
    #[serde(default)]
    pub priority: i64,
    /// Optional UI label.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_condition() -> EdgeCondition {
    EdgeCondition::OnSuccess
}

impl EdgeDefinition {
    fn validate(&self) -> Result<()> {
        if self.condition == EdgeCondition::OnCondition
            && self.predicate.as_deref().unwrap_or("").is_empty()
        {
            return Err(FlowError::MissingPredicate {
                edge_from: self.from_.clone(),
            });
        }
        Ok(())
    }
}

/// Vector index backend requested for execution memory's semantic search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VectorIndexType {
    /// Brute-force flat L2 index.
    #[default]
    Flat,
    /// Brute-force flat inner-product index.
    FlatIP,
    /// Approximate index; currently served by the same flat scan as `Flat`
    /// (no HNSW crate is in the dependency corpus — see DESIGN.md).
    Hnsw,
}

/// Flow-level configuration and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMetadata {
    /// Maximum concurrent node executions.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Default retry count applied where a node doesn't override it.
    #[serde(default = "default_max_retries_meta")]
    pub default_max_retries: u32,
    /// Maximum workflow execution time, in seconds.
    #[serde(default)]
    pub execution_timeout: Option<f64>,
    /// Maximum length for truncated log output.
    #[serde(default)]
    pub truncation_length: Option<usize>,
    /// Whether to record results in execution memory.
    #[serde(default = "default_true")]
    pub enable_execution_memory: bool,
    /// Optional embedding model identifier for semantic search.
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Dimension of embedding vectors.
    #[serde(default = "default_vector_dimension")]
    pub vector_dimension: usize,
    /// Vector index backend.
    #[serde(default)]
    pub vector_index_type: VectorIndexType,
}

fn default_max_parallel_tasks() -> usize {
    10
}
fn default_max_retries_meta() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_vector_dimension() -> usize {
    384
}

impl Default for FlowMetadata {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            default_max_retries: default_max_retries_meta(),
            execution_timeout: None,
            truncation_length: None,
            enable_execution_memory: true,
            embedding_model: None,
            vector_dimension: default_vector_dimension(),
            vector_index_type: VectorIndexType::default(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Complete, persistable definition of a flow — the root of the JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Flow identifier, unique within a persistence namespace.
    pub flow: String,
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Last-saved timestamp; set by the loader on every save.
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Flow-level configuration.
    #[serde(default)]
    pub metadata: FlowMetadata,
    /// Node definitions, in declaration order.
    pub nodes: Vec<NodeDefinition>,
    /// Edge definitions.
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl FlowDefinition {
    /// Construct a new, unvalidated flow definition. Call [`Self::validate`]
    /// (or go through [`crate::persistence`]) before materialising it.
    pub fn new(flow: impl Into<String>, nodes: Vec<NodeDefinition>, edges: Vec<EdgeDefinition>) -> Self {
        Self {
            flow: flow.into(),
            version: default_version(),
            description: String::new(),
            created_at: None,
            updated_at: None,
            metadata: FlowMetadata::default(),
            nodes,
            edges,
        }
    }

    /// Validate every structural invariant from §3: unique node ids, every
    /// edge endpoint resolves to a real node, `agent` nodes carry
    /// `agent_ref`, `on_condition` edges carry a non-empty `predicate`.
    ///
    /// Trivially-detectable cycles (a self-loop, or a new edge that would
    /// close a cycle reachable purely through already-declared edges) are
    /// logged and skipped rather than rejected — per §3's invariant that
    /// the DAG constraint only applies "for the purpose of execution" and
    /// is enforced best-effort at wire time, not as a hard load-time error.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(FlowError::DuplicateNodeId(node.id.clone()));
            }
            node.validate()?;
        }

        let node_ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();

        for edge in &self.edges {
            edge.validate()?;

            if !node_ids.contains(edge.from_.as_str()) {
                return Err(FlowError::UnknownNodeReference {
                    edge_from: edge.from_.clone(),
                    reference: edge.from_.clone(),
                });
            }
            for target in edge.to.as_vec() {
                if !node_ids.contains(target.as_str()) {
                    return Err(FlowError::UnknownNodeReference {
                        edge_from: edge.from_.clone(),
                        reference: target,
                    });
                }
            }
        }

        self.skip_trivial_cycles();

        Ok(())
    }

    /// Best-effort cycle detection: for each edge, check whether its target
    /// can already reach its source through the rest of the graph (which
    /// would make the new edge close a cycle). Matches are logged as
    /// warnings; nothing is rejected — see [`Self::validate`]'s doc comment.
    fn skip_trivial_cycles(&self) {
        for edge in &self.edges {
            for target in edge.to.as_vec() {
                if target == edge.from_ {
                    tracing::warn!(node = %edge.from_, "self-loop edge skipped at wire-time");
                    continue;
                }
                if self.reaches(&target, &edge.from_) {
                    tracing::warn!(
                        from = %edge.from_,
                        to = %target,
                        "edge would close a cycle; skipped at wire-time"
                    );
                }
            }
        }
    }

    /// Breadth-first reachability check over the declared edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            for edge in &self.edges {
                if edge.from_ == current {
                    for target in edge.to.as_vec() {
                        queue.push_back(target);
                    }
                }
            }
        }
        false
    }
}

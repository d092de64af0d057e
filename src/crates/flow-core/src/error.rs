//! Error types for flow definition, materialisation, and execution.
//!
//! Errors fall into the categories laid out by the engine's error-handling
//! design: *definition* errors (invalid JSON, dangling node references) and
//! *materialisation* errors (`AgentNotFound`, `InvalidPredicate`) are fatal
//! at load time; *action* and *agent* errors are recovered per-node by the
//! engine and never reach a caller directly; *run* errors (`Timeout`,
//! `IterationCapExceeded`) are fatal to a single `run()` call.
//!
//! # Examples
//!
//! ```rust
//! use flow_core::error::FlowError;
//!
//! let err = FlowError::UnknownNodeReference {
//!     edge_from: "start".to_string(),
//!     reference: "missing_node".to_string(),
//! };
//! assert!(err.to_string().contains("missing_node"));
//! ```

use thiserror::Error;

/// Result type used throughout `flow-core`.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while defining, loading, materialising, or running a flow.
#[derive(Error, Debug)]
pub enum FlowError {
    /// The JSON/YAML payload could not be parsed into a `FlowDefinition`.
    #[error("invalid flow definition: {0}")]
    InvalidDefinition(String),

    /// An edge's `from` or `to` referenced a node ID that does not exist.
    #[error("edge from '{edge_from}' references unknown node '{reference}'")]
    UnknownNodeReference {
        /// Source node of the offending edge.
        edge_from: String,
        /// The dangling node id.
        reference: String,
    },

    /// A node of type `agent` was declared without `agent_ref`.
    #[error("node '{node}' has type 'agent' but no agent_ref")]
    MissingAgentRef {
        /// Offending node id.
        node: String,
    },

    /// An `on_condition` edge was declared without a `predicate`.
    #[error("edge from '{edge_from}' has condition 'on_condition' but no predicate")]
    MissingPredicate {
        /// Source node of the offending edge.
        edge_from: String,
    },

    /// A node declared a type not in the known set.
    #[error("node '{node}' has unknown type '{node_type}'")]
    UnknownNodeType {
        /// Offending node id.
        node: String,
        /// The unrecognised type string.
        node_type: String,
    },

    /// Two or more nodes shared the same id.
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    /// `to_engine` could not resolve an `agent_ref` against the registry or `extra_agents`.
    #[error("agent '{0}' not found in extra_agents or agent_registry")]
    AgentNotFound(String),

    /// A predicate expression failed to compile.
    #[error("invalid predicate expression '{expression}': {reason}")]
    InvalidPredicate {
        /// The source expression text.
        expression: String,
        /// Why the compiler rejected it.
        reason: String,
    },

    /// An action configuration referenced an unregistered action type tag.
    #[error("unknown action type '{0}'")]
    UnknownActionType(String),

    /// A `validate` action failed with `on_failure = raise`.
    #[error("validation failed for node '{node}': {reason}")]
    ValidationFailed {
        /// Node the validating action ran on.
        node: String,
        /// Validator failure detail.
        reason: String,
    },

    /// The FSM was asked to perform a transition not legal from its current state.
    #[error("illegal transition '{event}' for node '{node}' in state {state:?}")]
    IllegalTransition {
        /// Node the transition was attempted on.
        node: String,
        /// Current FSM state.
        state: crate::fsm::NodeState,
        /// Event that was rejected.
        event: &'static str,
    },

    /// `run()` exceeded its configured `execution_timeout`.
    #[error("workflow execution exceeded timeout of {0:?}")]
    Timeout(std::time::Duration),

    /// `run()` exceeded its iteration cap without completing.
    #[error("workflow exceeded max iterations ({0}); possible infinite loop")]
    IterationCapExceeded(usize),

    /// No entry nodes could be determined for a run.
    #[error("no entry point agents found; specify entry_point or add nodes with no dependencies")]
    NoEntryPoint,

    /// JSON (de)serialisation error, surfaced from persistence operations.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialisation error, surfaced from persistence operations.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File-system I/O error from the loader.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key-value persistence backend returned an error or a missing key.
    #[error("KV store error: {0}")]
    KvStore(String),

    /// Catch-all for collaborator (`Agent`) errors; carries the stringified cause.
    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Build an [`FlowError::Other`] from any displayable error, used when
    /// wrapping an `Agent::ask` failure before it is recorded on a node.
    pub fn agent_failed(err: impl std::fmt::Display) -> Self {
        FlowError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_node_reference_error() {
        let err = FlowError::UnknownNodeReference {
            edge_from: "start".into(),
            reference: "ghost".into(),
        };
        assert_eq!(
            err.to_string(),
            "edge from 'start' references unknown node 'ghost'"
        );
    }

    #[test]
    fn wraps_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: FlowError = json_err.into();
        assert!(matches!(err, FlowError::Serialization(_)));
    }
}

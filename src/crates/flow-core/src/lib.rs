//! # flow-core — FSM-driven parallel execution engine for declarative multi-agent flows
//!
//! `flow-core` loads a declarative [`FlowDefinition`] (nodes, edges,
//! lifecycle actions) and executes it: each node runs a per-node finite
//! state machine, edges fire based on success/failure/timeout or a
//! sandboxed predicate expression, and independent nodes run concurrently
//! under a configurable parallelism cap.
//!
//! ## Module organization
//!
//! - [`definition`] — the persistable flow schema (`FlowDefinition`,
//!   `NodeDefinition`, `EdgeDefinition`) and its load-time validation.
//! - [`fsm`] — the six-state per-node machine (`idle -> ready -> running ->
//!   {completed, failed}`, plus `blocked`) and its transition table.
//! - [`predicate`] — the sandboxed, fail-safe expression language used by
//!   `on_condition` edges.
//! - [`actions`] — the seven built-in lifecycle actions (`log`, `notify`,
//!   `webhook`, `metric`, `set_context`, `validate`, `transform`) and their
//!   tag-based registry.
//! - [`memory`] — append-only execution memory with optional semantic
//!   search over recorded node results.
//! - [`engine`] — the [`engine::FlowEngine`] orchestrator: scheduling,
//!   transition processing, prompt construction, and result aggregation.
//! - [`persistence`] — loading/saving flow definitions (files, JSON/YAML,
//!   or a pluggable [`persistence::KvStore`]) and materialising them into a
//!   runnable engine.
//! - [`visual`] — the flat `{nodes[], edges[]}` adapter used by visual flow
//!   builders.
//! - [`visualization`] — DOT/Mermaid/ASCII rendering of a flow's *current*
//!   runtime FSM state (distinct from [`visual`]'s static definition
//!   round-trip).
//! - [`error`] — the crate-wide [`error::FlowError`] and [`error::Result`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use flow_core::definition::FlowDefinition;
//! use flow_core::engine::{Agent, FlowEngine, StaticAgentRegistry};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let definition = flow_core::persistence::load_from_file("flow.json")?;
//! let registry = Arc::new(StaticAgentRegistry::new().register("summarizer", my_agent));
//! let engine = FlowEngine::new(definition, registry, &HashMap::new())?;
//! let result = engine.run(&serde_json::json!({"topic": "rust"}), &HashMap::new()).await?;
//! ```

pub mod actions;
pub mod definition;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod memory;
pub mod persistence;
pub mod predicate;
pub mod visual;
pub mod visualization;

pub use actions::{Action, ActionContext, ActionDefinition};
pub use definition::{EdgeCondition, EdgeDefinition, FlowDefinition, FlowMetadata, NodeDefinition, NodeType};
pub use engine::{Agent, AgentRegistry, Answer, FlowEngine, FlowTransition, RunResult, RunStatus, StaticAgentRegistry};
pub use error::{FlowError, Result};
pub use fsm::{Event, NodeState, RuntimeNode};
pub use memory::{AgentResult, Embedder, ExecutionMemory};
pub use persistence::{InMemoryKvStore, KvStore};
pub use predicate::{compile as compile_predicate, CompiledPredicate};
pub use visual::{to_visual, from_visual, VisualEdge, VisualFlow, VisualNode};
pub use visualization::VisualizationFormat;

//! Flow orchestrator: schedules nodes, enforces parallelism limits, drives
//! the per-node FSM, evaluates transition predicates, and aggregates a
//! final [`RunResult`].
//!
//! Grounded on `fsm.py::AgentsFlow.run_flow` and its private helpers:
//! reset-then-schedule-entry-nodes, a loop of
//! (timeout check -> ready nodes -> parallel execute -> process
//! transitions -> stuck check), `_execute_single_agent`'s
//! configure-once-then-ask-under-semaphore pattern, and
//! `_process_transitions`'s retry-before-propagate logic. `_would_create_cycle`
//! becomes [`FlowEngine::would_create_cycle`]; `_build_agent_prompt`'s
//! default template becomes [`FlowTransition::build_prompt`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::{Mutex, Semaphore};

use crate::actions::{self, ActionContext};
use crate::definition::{EdgeCondition, FlowDefinition, NodeType};
use crate::error::{FlowError, Result};
use crate::fsm::{Event, NodeState, RuntimeNode};
use crate::memory::ExecutionMemory;
use crate::predicate::{self, Activation, CompiledPredicate};

/// A collaborator capable of executing a node's work.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Lazily perform any one-time setup (API client warm-up, credential
    /// loading). Called at most once per agent per `run()`, guarded by a
    /// per-agent lock — mirrors `_ensure_agent_ready`.
    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    /// Run the agent against `prompt` with the shared flow context visible
    /// for read, returning a JSON-encodable result.
    async fn ask(&self, prompt: &str, ctx: &HashMap<String, Json>) -> Result<Json>;
}

/// Resolves `agent_ref` names to live [`Agent`]s. The engine consults
/// `extra_agents` (supplied at `run()` time) before the registry, matching
/// `loader.py::_resolve_agent`'s priority order.
pub trait AgentRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Agent>>;
}

/// An [`AgentRegistry`] backed by a plain map, useful for tests and small
/// deployments that don't need a dynamic lookup service.
#[derive(Default)]
pub struct StaticAgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl StaticAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(name.into(), agent);
        self
    }
}

impl AgentRegistry for StaticAgentRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }
}

/// A materialised, directed transition between two nodes, derived from an
/// [`crate::definition::EdgeDefinition`] at `to_engine` time.
#[derive(Debug, Clone)]
pub struct FlowTransition {
    pub from: String,
    pub to: String,
    pub condition: EdgeCondition,
    pub predicate: Option<Arc<CompiledPredicate>>,
    pub instruction: Option<String>,
    pub priority: i64,
}

impl FlowTransition {
    /// `true` if this transition should fire given the source node's
    /// terminal state and result. `on_condition` transitions evaluate
    /// their predicate fail-safe (see [`crate::predicate`]); all others are
    /// pure state checks.
    pub fn should_activate(&self, state: NodeState, result: &Json, ctx: &HashMap<String, Json>) -> bool {
        match self.condition {
            EdgeCondition::Always => true,
            EdgeCondition::OnSuccess => state == NodeState::Completed,
            EdgeCondition::OnError => state == NodeState::Failed,
            EdgeCondition::OnTimeout => false,
            EdgeCondition::OnCondition => {
                let Some(predicate) = &self.predicate else {
                    return false;
                };
                let activation = Activation::new(result, state == NodeState::Failed, ctx);
                predicate.evaluate(&activation)
            }
        }
    }

    /// Build the prompt for the target node, matching
    /// `FlowTransition.build_prompt`: a static `instruction` is returned
    /// verbatim (no task/result wrapping); otherwise the default template
    /// is the original task plus the source node's result under a
    /// `--- <agent_name> ---` delimiter — the original task is always
    /// available, per §4.4.
    pub fn build_prompt(&self, initial_task: &Json, source_result: &Json) -> String {
        if let Some(instruction) = &self.instruction {
            return instruction.clone();
        }
        format!(
            "Task: {}\n\nContext from previous agents:\n--- {} ---\n{}",
            pretty(initial_task),
            self.from,
            pretty(source_result)
        )
    }
}

fn pretty(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Per-node execution trace entry in the final [`RunResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionInfo {
    pub node_name: String,
    pub agent_ref: Option<String>,
    pub state: NodeState,
    pub retry_count: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Why a `run()` loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every dispatched node completed successfully.
    Completed,
    /// Some dispatched nodes completed and some exhausted their retries and
    /// failed; matches `fsm.py::run_flow`'s `"partial"` outcome.
    Partial,
    /// Every dispatched node exhausted its retries and failed.
    Failed,
    /// `execution_timeout` elapsed before completion.
    TimedOut,
    /// The iteration cap was hit without progress — likely a cycle or
    /// unreachable node, distinct from a hard [`FlowError::IterationCapExceeded`]
    /// in that it is reported in the result rather than raised, matching
    /// `fsm.py`'s non-fatal "workflow stuck" exit path.
    Stuck,
}

/// Aggregate outcome of one `run()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub responses: HashMap<String, Json>,
    pub agents: Vec<AgentExecutionInfo>,
    pub errors: Vec<String>,
    pub execution_log: Vec<String>,
    pub total_time_ms: u64,
    /// Set only when [`FlowEngine::run_with_synthesis`] was used and the
    /// synthesis agent returned a summary.
    #[serde(default)]
    pub summary: Option<String>,
}

/// Answer to a post-hoc question asked against the memory of the last
/// completed `run()`, matching `fsm.py::AgentsFlow.ask`'s "search memory,
/// build context, let an agent answer" pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: Json,
    /// Node names whose recorded results were used as context.
    pub supporting_node_names: Vec<String>,
}

/// FSM-driven orchestrator over one [`FlowDefinition`].
pub struct FlowEngine {
    definition: FlowDefinition,
    registry: Arc<dyn AgentRegistry>,
    transitions: Vec<FlowTransition>,
    nodes: Mutex<HashMap<String, RuntimeNode>>,
    configured: Mutex<HashSet<String>>,
    shared_context: Mutex<HashMap<String, Json>>,
    memory: Mutex<ExecutionMemory>,
    semaphore: Arc<Semaphore>,
}

impl FlowEngine {
    /// Materialise a [`FlowDefinition`] into a runnable engine. Resolves
    /// every `agent_ref` against `extra_agents` first, then `registry` —
    /// matching `loader.py::_resolve_agent`'s priority order — and fails
    /// fast with [`FlowError::AgentNotFound`] if neither has it.
    pub fn new(
        definition: FlowDefinition,
        registry: Arc<dyn AgentRegistry>,
        extra_agents: &HashMap<String, Arc<dyn Agent>>,
    ) -> Result<Self> {
        definition.validate()?;

        for node in &definition.nodes {
            if let Some(agent_ref) = &node.agent_ref {
                if !extra_agents.contains_key(agent_ref) && registry.get(agent_ref).is_none() {
                    return Err(FlowError::AgentNotFound(agent_ref.clone()));
                }
            }
        }

        let mut dependencies: HashMap<String, HashSet<String>> =
            definition.nodes.iter().map(|n| (n.id.clone(), HashSet::new())).collect();
        for edge in &definition.edges {
            for target in edge.to.as_vec() {
                dependencies.entry(target).or_default().insert(edge.from_.clone());
            }
        }

        let mut nodes = HashMap::new();
        for node in &definition.nodes {
            let max_retries = node.max_retries.max(definition.metadata.default_max_retries);
            nodes.insert(
                node.id.clone(),
                RuntimeNode::new(node.id.clone(), dependencies.remove(&node.id).unwrap_or_default(), max_retries),
            );
        }

        let mut transitions = Vec::new();
        for edge in &definition.edges {
            let predicate = match &edge.predicate {
                Some(expr) => Some(Arc::new(predicate::compile(expr).map_err(|e| FlowError::InvalidPredicate {
                    expression: expr.clone(),
                    reason: e.to_string(),
                })?)),
                None => None,
            };
            for target in edge.to.as_vec() {
                transitions.push(FlowTransition {
                    from: edge.from_.clone(),
                    to: target,
                    condition: edge.condition,
                    predicate: predicate.clone(),
                    instruction: edge.instruction.clone(),
                    priority: edge.priority,
                });
            }
        }
        transitions.sort_by(|a, b| b.priority.cmp(&a.priority));

        let max_parallel = definition.metadata.max_parallel_tasks.max(1);
        let index_type = definition.metadata.vector_index_type;

        Ok(Self {
            definition,
            registry,
            transitions,
            nodes: Mutex::new(nodes),
            configured: Mutex::new(HashSet::new()),
            shared_context: Mutex::new(HashMap::new()),
            memory: Mutex::new(ExecutionMemory::new(index_type)),
            semaphore: Arc::new(Semaphore::new(max_parallel)),
        })
    }

    fn resolve_agent(&self, agent_ref: &str, extra_agents: &HashMap<String, Arc<dyn Agent>>) -> Option<Arc<dyn Agent>> {
        extra_agents.get(agent_ref).cloned().or_else(|| self.registry.get(agent_ref))
    }

    /// Nodes with no dependencies, matching `_get_entry_agents`' default.
    async fn entry_nodes(&self) -> Vec<String> {
        let nodes = self.nodes.lock().await;
        nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Run the flow to completion (or timeout/stuck) against `initial_task`.
    pub async fn run(&self, initial_task: &Json, extra_agents: &HashMap<String, Arc<dyn Agent>>) -> Result<RunResult> {
        self.run_inner(initial_task, extra_agents).await
    }

    /// Run the flow, then synthesize a `RunResult.summary` by concatenating
    /// every agent's content under `--- <node_name> ---` headers and
    /// invoking `synthesis_agent` with `synthesis_prompt` prepended (or the
    /// concatenation alone if no prompt is given). Matches the original's
    /// optional `generate_summary`/`synthesis_prompt` run parameters; the
    /// synthesizing LLM-like client is a caller-supplied [`Agent`] since
    /// concrete agent implementations are out of scope for this crate.
    pub async fn run_with_synthesis(
        &self,
        initial_task: &Json,
        extra_agents: &HashMap<String, Arc<dyn Agent>>,
        synthesis_agent: &Arc<dyn Agent>,
        synthesis_prompt: Option<&str>,
    ) -> Result<RunResult> {
        let mut result = self.run_inner(initial_task, extra_agents).await?;

        let mut sections = Vec::new();
        for agent in &result.agents {
            if let Some(content) = result.responses.get(&agent.node_name) {
                sections.push(format!("--- {} ---\n{}", agent.node_name, pretty(content)));
            }
        }
        let body = sections.join("\n\n");
        let prompt = match synthesis_prompt {
            Some(p) if !body.is_empty() => format!("{p}\n---\n{body}"),
            Some(p) => p.to_string(),
            None => body,
        };

        let ctx = self.shared_context.lock().await.clone();
        let summary = synthesis_agent.ask(&prompt, &ctx).await?;
        result.summary = Some(pretty(&summary));
        Ok(result)
    }

    async fn run_inner(&self, initial_task: &Json, extra_agents: &HashMap<String, Arc<dyn Agent>>) -> Result<RunResult> {
        {
            let mut nodes = self.nodes.lock().await;
            for node in nodes.values_mut() {
                node.reset();
            }
            self.configured.lock().await.clear();
            self.memory.lock().await.clear();
            self.shared_context.lock().await.clear();
        }

        let mut execution_log = Vec::new();
        let mut errors = Vec::new();
        let start = Instant::now();
        let timeout = self
            .definition
            .metadata
            .execution_timeout
            .map(Duration::from_secs_f64);

        let entry = self.entry_nodes().await;
        if entry.is_empty() {
            return Err(FlowError::NoEntryPoint);
        }

        {
            let mut nodes = self.nodes.lock().await;
            for id in &entry {
                if let Some(n) = nodes.get_mut(id) {
                    n.apply(Event::Schedule)?;
                }
            }
        }
        execution_log.push(format!("scheduled entry nodes: {}", entry.join(", ")));

        let max_iterations = self.definition.nodes.len().saturating_mul(4).max(50);
        let mut iterations = 0usize;
        let mut stalled_rounds = 0usize;
        let status;

        loop {
            if let Some(limit) = timeout {
                if start.elapsed() > limit {
                    status = RunStatus::TimedOut;
                    errors.push(format!("execution timed out after {limit:?}"));
                    break;
                }
            }

            iterations += 1;
            if iterations > max_iterations {
                status = RunStatus::Stuck;
                errors.push("workflow stuck: iteration cap reached without completion".to_string());
                break;
            }

            let ready = self.ready_nodes().await;
            if ready.is_empty() {
                if self.has_active_nodes().await {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    continue;
                }
                if self.all_reachable_terminal(&entry).await {
                    status = self.aggregate_status().await;
                    break;
                }
                stalled_rounds += 1;
                if stalled_rounds > 3 {
                    status = RunStatus::Stuck;
                    errors.push("workflow stuck: no ready nodes and none active".to_string());
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }
            stalled_rounds = 0;

            for id in &ready {
                let mut nodes = self.nodes.lock().await;
                if let Some(n) = nodes.get_mut(id) {
                    n.apply(Event::Start)?;
                }
            }

            let results = self.execute_parallel(&ready, initial_task, extra_agents).await;
            for (id, outcome) in &results {
                execution_log.push(format!("{id}: {outcome}"));
            }

            self.process_transitions(&ready, &mut execution_log, &mut errors).await?;
        }

        let (responses, agents) = self.collect_results().await;
        Ok(RunResult {
            status,
            responses,
            agents,
            errors,
            execution_log,
            total_time_ms: start.elapsed().as_millis() as u64,
            summary: None,
        })
    }

    async fn ready_nodes(&self) -> Vec<String> {
        let nodes = self.nodes.lock().await;
        let completed: HashSet<String> = nodes
            .values()
            .filter(|n| n.state() == NodeState::Completed)
            .map(|n| n.id.clone())
            .collect();
        nodes
            .values()
            .filter(|n| n.is_ready(&completed))
            .map(|n| n.id.clone())
            .collect()
    }

    async fn has_active_nodes(&self) -> bool {
        let nodes = self.nodes.lock().await;
        nodes.values().any(|n| matches!(n.state(), NodeState::Running | NodeState::Blocked))
    }

    async fn all_reachable_terminal(&self, entry: &[String]) -> bool {
        let nodes = self.nodes.lock().await;
        let mut reachable: HashSet<String> = entry.iter().cloned().collect();
        let mut frontier: Vec<String> = entry.to_vec();
        while let Some(id) = frontier.pop() {
            for t in self.transitions.iter().filter(|t| t.from == id) {
                if reachable.insert(t.to.clone()) {
                    frontier.push(t.to.clone());
                }
            }
        }
        reachable.iter().all(|id| {
            nodes
                .get(id)
                .map(|n| n.state().is_terminal() || n.state() == NodeState::Idle)
                .unwrap_or(true)
        })
    }

    /// Aggregate final `RunStatus` from dispatched nodes' terminal states,
    /// matching `fsm.py::run_flow`'s completed/partial/failed rule: all
    /// dispatched nodes completed -> `Completed`; all failed -> `Failed`;
    /// a mix -> `Partial`. Nodes never reached (still `Idle`) don't count.
    async fn aggregate_status(&self) -> RunStatus {
        let nodes = self.nodes.lock().await;
        let mut any_completed = false;
        let mut any_failed = false;
        for n in nodes.values() {
            match n.state() {
                NodeState::Completed => any_completed = true,
                NodeState::Failed => any_failed = true,
                _ => {}
            }
        }
        match (any_completed, any_failed) {
            (_, false) => RunStatus::Completed,
            (false, true) => RunStatus::Failed,
            (true, true) => RunStatus::Partial,
        }
    }

    async fn execute_parallel(
        &self,
        ready: &[String],
        initial_task: &Json,
        extra_agents: &HashMap<String, Arc<dyn Agent>>,
    ) -> Vec<(String, String)> {
        let futures = ready.iter().map(|id| self.execute_single(id, initial_task, extra_agents));
        futures::future::join_all(futures).await
    }

    async fn execute_single(
        &self,
        node_id: &str,
        initial_task: &Json,
        extra_agents: &HashMap<String, Arc<dyn Agent>>,
    ) -> (String, String) {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        let node_def = self.definition.nodes.iter().find(|n| n.id == node_id);
        let Some(node_def) = node_def else {
            return (node_id.to_string(), "missing node definition".to_string());
        };

        let started_at = Utc::now();

        let prompt = self.build_prompt(node_id, node_def.instruction.as_deref(), initial_task).await;

        if let Err(e) = self.run_pre_actions(node_def, node_id, &prompt).await {
            let finished_at = Utc::now();
            let mut nodes = self.nodes.lock().await;
            if let Some(n) = nodes.get_mut(node_id) {
                let _ = n.apply(Event::Fail);
                n.duration = Some((finished_at - started_at).to_std().unwrap_or_default());
                n.error = Some(e.to_string());
            }
            return (node_id.to_string(), format!("failed: {e}"));
        }

        let outcome: Result<Json> = match node_def.node_type {
            NodeType::Start => Ok(initial_task.clone()),
            NodeType::End => {
                let ctx = self.shared_context.lock().await;
                Ok(ctx.get(node_id).cloned().unwrap_or(initial_task.clone()))
            }
            NodeType::Agent | NodeType::Decision | NodeType::InteractiveDecision | NodeType::Human => {
                match node_def.agent_ref.as_deref() {
                    Some(agent_ref) => {
                        match self.resolve_agent(agent_ref, extra_agents) {
                            Some(agent) => self.run_agent(agent_ref, agent, &prompt).await,
                            None => Err(FlowError::AgentNotFound(agent_ref.to_string())),
                        }
                    }
                    None => Err(FlowError::MissingAgentRef { node: node_id.to_string() }),
                }
            }
        };

        let finished_at = Utc::now();

        self.run_pre_post_actions(node_def, node_id, &outcome, &prompt).await;

        let (event, log_line, error_text) = match &outcome {
            Ok(_) => (Event::Succeed, "completed".to_string(), None),
            Err(e) => (Event::Fail, format!("failed: {e}"), Some(e.to_string())),
        };

        {
            let mut nodes = self.nodes.lock().await;
            if let Some(n) = nodes.get_mut(node_id) {
                let _ = n.apply(event);
                n.duration = Some((finished_at - started_at).to_std().unwrap_or_default());
                match &outcome {
                    Ok(v) => n.result = Some(v.clone()),
                    Err(e) => n.error = Some(e.to_string()),
                }
            }
        }

        if self.definition.metadata.enable_execution_memory {
            let mut memory = self.memory.lock().await;
            let retry_count = self.nodes.lock().await.get(node_id).map(|n| n.retry_count).unwrap_or(0);
            memory.add_result(
                node_id,
                node_def.agent_ref.clone(),
                outcome.as_ref().ok().cloned().unwrap_or(Json::Null),
                outcome.is_ok(),
                error_text,
                started_at,
                finished_at,
                retry_count,
                true,
            );
        }

        (node_id.to_string(), log_line)
    }

    async fn build_prompt(&self, node_id: &str, override_instruction: Option<&str>, initial_task: &Json) -> String {
        if let Some(instruction) = override_instruction {
            return format!("Task: {instruction}\n---\n{}", pretty(initial_task));
        }
        let activating = self.transitions.iter().find(|t| t.to == node_id);
        match activating {
            Some(transition) => {
                let nodes = self.nodes.lock().await;
                let source_result = nodes
                    .get(&transition.from)
                    .and_then(|n| n.result.clone())
                    .unwrap_or_else(|| initial_task.clone());
                transition.build_prompt(initial_task, &source_result)
            }
            None => format!("Task: {}", pretty(initial_task)),
        }
    }

    async fn run_agent(&self, agent_ref: &str, agent: Arc<dyn Agent>, prompt: &str) -> Result<Json> {
        {
            let mut configured = self.configured.lock().await;
            if !configured.contains(agent_ref) {
                agent.configure().await?;
                configured.insert(agent_ref.to_string());
            }
        }
        let ctx = self.shared_context.lock().await.clone();
        agent.ask(prompt, &ctx).await
    }

    /// Run a node's `pre_actions` against its built prompt, matching
    /// `fsm.py`'s pre-execution hook. Only `validate` with
    /// `on_failure = raise` propagates; every other action's failure is
    /// logged and swallowed by [`actions::run_actions`]'s own semantics.
    async fn run_pre_actions(&self, node_def: &crate::definition::NodeDefinition, node_id: &str, prompt: &str) -> Result<()> {
        let mut shared = self.shared_context.lock().await;
        let payload = Json::String(prompt.to_string());
        let mut ctx = ActionContext {
            node_name: node_id,
            result: Some(&payload),
            prompt: Some(prompt),
            error: None,
            shared_context: &mut shared,
        };
        actions::run_actions(&node_def.pre_actions, &mut ctx).await
    }

    async fn run_pre_post_actions(
        &self,
        node_def: &crate::definition::NodeDefinition,
        node_id: &str,
        outcome: &Result<Json>,
        prompt: &str,
    ) {
        let mut shared = self.shared_context.lock().await;
        let result = outcome.as_ref().ok();
        let error = outcome.as_ref().err().map(|e| e.to_string());
        let mut ctx = ActionContext {
            node_name: node_id,
            result,
            prompt: Some(prompt),
            error: error.as_deref(),
            shared_context: &mut shared,
        };
        if let Err(e) = actions::run_actions(&node_def.post_actions, &mut ctx).await {
            tracing::warn!(node = node_id, %e, "post-action failed");
        }
    }

    async fn process_transitions(
        &self,
        just_ran: &[String],
        execution_log: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        for id in just_ran {
            let (state, result, retry_count, max_retries, already_processed) = {
                let nodes = self.nodes.lock().await;
                let Some(n) = nodes.get(id) else { continue };
                (n.state(), n.result.clone(), n.retry_count, n.max_retries, n.transitions_processed)
            };

            if already_processed || !state.is_terminal() {
                continue;
            }

            if state == NodeState::Failed && retry_count < max_retries {
                let mut nodes = self.nodes.lock().await;
                if let Some(n) = nodes.get_mut(id) {
                    n.apply(Event::Retry)?;
                    execution_log.push(format!("{id}: retrying ({}/{})", n.retry_count, max_retries));
                }
                continue;
            }

            if state == NodeState::Failed {
                errors.push(format!("{id}: exhausted retries"));
            }

            {
                let mut nodes = self.nodes.lock().await;
                if let Some(n) = nodes.get_mut(id) {
                    n.transitions_processed = true;
                }
            }

            let result = result.unwrap_or(Json::Null);
            let ctx = self.shared_context.lock().await.clone();

            for transition in self.transitions.iter().filter(|t| t.from == *id) {
                if !transition.should_activate(state, &result, &ctx) {
                    continue;
                }
                if self.would_create_cycle(&transition.from, &transition.to).await {
                    tracing::warn!(from = %transition.from, to = %transition.to, "skipping transition that would create a cycle");
                    continue;
                }
                let mut nodes = self.nodes.lock().await;
                if let Some(target) = nodes.get_mut(&transition.to) {
                    if target.state() == NodeState::Idle {
                        let completed: HashSet<String> = nodes
                            .values()
                            .filter(|n| n.state() == NodeState::Completed)
                            .map(|n| n.id.clone())
                            .collect();
                        let ready = nodes.get(&transition.to).map(|n| n.is_ready(&completed)).unwrap_or(false);
                        if ready {
                            nodes.get_mut(&transition.to).unwrap().apply(Event::Schedule)?;
                            execution_log.push(format!("{} -> {} activated", transition.from, transition.to));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// DFS from `to` back toward `from` over already-completed/scheduled
    /// transitions; mirrors `_would_create_cycle`.
    async fn would_create_cycle(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let nodes = self.nodes.lock().await;
        let Some(target) = nodes.get(to) else { return false };
        target.dependencies.contains(from) && self.reaches_via_dependencies(&nodes, from, to)
    }

    fn reaches_via_dependencies(&self, nodes: &HashMap<String, RuntimeNode>, from: &str, to: &str) -> bool {
        let mut stack = vec![to.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(n) = nodes.get(&current) {
                for dep in &n.dependencies {
                    stack.push(dep.clone());
                }
            }
        }
        false
    }

    async fn collect_results(&self) -> (HashMap<String, Json>, Vec<AgentExecutionInfo>) {
        let nodes = self.nodes.lock().await;
        let mut responses = HashMap::new();
        let mut agents = Vec::new();
        for node in nodes.values() {
            if let Some(result) = &node.result {
                responses.insert(node.id.clone(), result.clone());
            }
            agents.push(AgentExecutionInfo {
                node_name: node.id.clone(),
                agent_ref: self
                    .definition
                    .nodes
                    .iter()
                    .find(|n| n.id == node.id)
                    .and_then(|n| n.agent_ref.clone()),
                state: node.state(),
                retry_count: node.retry_count,
                duration_ms: node.duration.map(|d| d.as_millis() as u64).unwrap_or(0),
                error: node.error.clone(),
            });
        }
        (responses, agents)
    }

    /// Single-shot convenience query: run the flow and return just the
    /// terminal `end`-node (or last-completed) response, used for
    /// request/response-style callers that don't need the full trace.
    pub async fn run_to_end(&self, task: &Json, extra_agents: &HashMap<String, Arc<dyn Agent>>) -> Result<Json> {
        let result = self.run(task, extra_agents).await?;
        let end_node = self.definition.nodes.iter().find(|n| matches!(n.node_type, NodeType::End));
        if let Some(end_node) = end_node {
            if let Some(value) = result.responses.get(&end_node.id) {
                return Ok(value.clone());
            }
        }
        result
            .responses
            .into_values()
            .last()
            .ok_or_else(|| FlowError::Other("run produced no responses".to_string()))
    }

    /// Answer `question` against the results recorded in execution memory
    /// during the last completed `run()`. Prefers semantic search (if an
    /// embedder was configured on the memory); otherwise falls back to a
    /// plain substring scan over each result's stringified content, and
    /// finally to the full set of recorded results, matching `fsm.py::ask`'s
    /// textual-search fallback. The matched context becomes `answerer`'s
    /// prompt — the LLM-backed answering collaborator itself is out of
    /// scope for this crate.
    pub async fn ask(&self, question: &str, answerer: &Arc<dyn Agent>) -> Result<Answer> {
        let memory = self.memory.lock().await;
        let semantic_hits = memory.search_semantic(question, 5);

        let (supporting, context) = if !semantic_hits.is_empty() {
            let names = semantic_hits.iter().map(|(r, _)| r.node_name.clone()).collect();
            let context = semantic_hits
                .iter()
                .map(|(r, score)| format!("--- {} (score {:.3}) ---\n{}", r.node_name, score, pretty(&r.result)))
                .collect::<Vec<_>>()
                .join("\n\n");
            (names, context)
        } else {
            let needle = question.to_lowercase();
            let textual: Vec<&crate::memory::AgentResult> = memory
                .all()
                .iter()
                .filter(|r| pretty(&r.result).to_lowercase().contains(&needle))
                .collect();
            let chosen = if textual.is_empty() { memory.all().iter().collect() } else { textual };
            let names = chosen.iter().map(|r| r.node_name.clone()).collect();
            let context = chosen
                .iter()
                .map(|r| format!("--- {} ---\n{}", r.node_name, pretty(&r.result)))
                .collect::<Vec<_>>()
                .join("\n\n");
            (names, context)
        };
        drop(memory);

        let prompt = format!("Question: {question}\n---\n{context}");
        let ctx = self.shared_context.lock().await.clone();
        let answer = answerer.ask(&prompt, &ctx).await?;
        Ok(Answer {
            question: question.to_string(),
            answer,
            supporting_node_names: supporting,
        })
    }

    /// Render the current runtime FSM state as Mermaid or DOT, reusing the
    /// teacher's rendering approach from `visualization.rs` but over
    /// per-node FSM state rather than a static graph.
    pub async fn visualize(&self, format: crate::visualization::VisualizationFormat) -> String {
        let nodes = self.nodes.lock().await;
        crate::visualization::render_runtime_state(&self.definition, &nodes, format)
    }

    /// Lightweight engine statistics: node counts by state plus memory size.
    pub async fn stats(&self) -> HashMap<String, Json> {
        let nodes = self.nodes.lock().await;
        let mut by_state: HashMap<String, usize> = HashMap::new();
        for n in nodes.values() {
            *by_state.entry(format!("{:?}", n.state())).or_insert(0) += 1;
        }
        let memory_len = self.memory.lock().await.len();
        let mut out = HashMap::new();
        out.insert("nodes_by_state".to_string(), serde_json::to_value(by_state).unwrap_or(Json::Null));
        out.insert("memory_entries".to_string(), Json::from(memory_len));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EdgeDefinition, EdgeTargets, FlowMetadata, NodeDefinition};

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn ask(&self, prompt: &str, _ctx: &HashMap<String, Json>) -> Result<Json> {
            Ok(Json::String(format!("echo:{prompt}")))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        async fn ask(&self, _prompt: &str, _ctx: &HashMap<String, Json>) -> Result<Json> {
            Err(FlowError::Other("boom".to_string()))
        }
    }

    fn linear_definition() -> FlowDefinition {
        let mut metadata = FlowMetadata::default();
        metadata.max_parallel_tasks = 2;
        FlowDefinition {
            flow: "linear".to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            created_at: None,
            updated_at: None,
            metadata,
            nodes: vec![
                NodeDefinition::new("start", NodeType::Start),
                {
                    let mut n = NodeDefinition::new("worker", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
                NodeDefinition::new("end", NodeType::End),
            ],
            edges: vec![
                EdgeDefinition {
                    id: None,
                    from_: "start".to_string(),
                    to: EdgeTargets::One("worker".to_string()),
                    condition: EdgeCondition::Always,
                    predicate: None,
                    instruction: None,
                    priority: 0,
                    label: None,
                },
                EdgeDefinition {
                    id: None,
                    from_: "worker".to_string(),
                    to: EdgeTargets::One("end".to_string()),
                    condition: EdgeCondition::OnSuccess,
                    predicate: None,
                    instruction: None,
                    priority: 0,
                    label: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn runs_a_linear_flow_to_completion() {
        let def = linear_definition();
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(EchoAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::String("hi".into()), &HashMap::new()).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.responses.contains_key("worker"));
    }

    #[tokio::test]
    async fn failing_agent_without_retries_surfaces_error() {
        let mut def = linear_definition();
        def.nodes[1].max_retries = 0;
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(FailingAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::Null, &HashMap::new()).await.unwrap();
        assert!(!result.errors.is_empty());
    }

    #[tokio::test]
    async fn unknown_agent_ref_fails_at_construction() {
        let def = linear_definition();
        let registry = Arc::new(StaticAgentRegistry::new());
        let err = FlowEngine::new(def, registry, &HashMap::new()).unwrap_err();
        assert!(matches!(err, FlowError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn pre_action_set_context_runs_before_agent_invocation() {
        use crate::actions::{ActionDefinition, SetContextActionDef};

        let mut def = linear_definition();
        def.nodes[1].pre_actions.push(ActionDefinition::SetContext(SetContextActionDef {
            key: "seen_prompt".into(),
            path: String::new(),
        }));
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(EchoAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::String("hi".into()), &HashMap::new()).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        let shared = engine.shared_context.lock().await;
        assert!(shared.get("seen_prompt").is_some());
    }

    #[tokio::test]
    async fn pre_action_validate_raise_fails_node_before_agent_runs() {
        use crate::actions::{ActionDefinition, OnValidationFailure, ValidateActionDef};

        let mut def = linear_definition();
        def.nodes[1].max_retries = 0;
        def.nodes[1].pre_actions.push(ActionDefinition::Validate(ValidateActionDef {
            schema: serde_json::json!({"type": "number"}),
            on_failure: OnValidationFailure::Raise,
            fallback: None,
        }));
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(EchoAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::String("hi".into()), &HashMap::new()).await.unwrap();
        assert!(!result.errors.is_empty());
        assert!(!result.responses.contains_key("worker"));
    }

    #[tokio::test]
    async fn run_to_end_returns_end_node_response() {
        let def = linear_definition();
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(EchoAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let value = engine.run_to_end(&Json::String("hi".into()), &HashMap::new()).await.unwrap();
        assert!(value.as_str().unwrap_or("").starts_with("echo:"));
    }

    #[tokio::test]
    async fn ask_answers_from_last_run_s_memory() {
        let def = linear_definition();
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(EchoAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        engine.run(&Json::String("hi".into()), &HashMap::new()).await.unwrap();

        let answerer: Arc<dyn Agent> = Arc::new(EchoAgent);
        let answer = engine.ask("what did worker produce?", &answerer).await.unwrap();
        assert_eq!(answer.question, "what did worker produce?");
        assert!(answer.supporting_node_names.contains(&"worker".to_string()));
        assert!(answer.answer.as_str().unwrap_or("").starts_with("echo:"));
    }

    #[tokio::test]
    async fn run_with_synthesis_attaches_summary() {
        let def = linear_definition();
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(EchoAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let synthesizer: Arc<dyn Agent> = Arc::new(EchoAgent);
        let result = engine
            .run_with_synthesis(&Json::String("hi".into()), &HashMap::new(), &synthesizer, Some("Summarize:"))
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.summary.unwrap().starts_with("echo:"));
    }

    fn edge(from: &str, to: EdgeTargets, condition: EdgeCondition, predicate: Option<&str>, priority: i64) -> EdgeDefinition {
        EdgeDefinition {
            id: None,
            from_: from.to_string(),
            to,
            condition,
            predicate: predicate.map(|p| p.to_string()),
            instruction: None,
            priority,
            label: None,
        }
    }

    struct ConstAgent(Json);

    #[async_trait]
    impl Agent for ConstAgent {
        async fn ask(&self, _prompt: &str, _ctx: &HashMap<String, Json>) -> Result<Json> {
            Ok(self.0.clone())
        }
    }

    /// S2 — conditional routing: a classifier picks `category_a`, only the
    /// matching `on_condition` branch runs, the other stays `idle`.
    #[tokio::test]
    async fn conditional_routing_activates_only_matching_branch() {
        let def = FlowDefinition {
            flow: "routing".to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            created_at: None,
            updated_at: None,
            metadata: FlowMetadata::default(),
            nodes: vec![
                NodeDefinition::new("start", NodeType::Start),
                {
                    let mut n = NodeDefinition::new("classifier", NodeType::Agent);
                    n.agent_ref = Some("classifier".to_string());
                    n
                },
                {
                    let mut n = NodeDefinition::new("handler_a", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
                {
                    let mut n = NodeDefinition::new("handler_b", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
            ],
            edges: vec![
                edge("start", EdgeTargets::One("classifier".to_string()), EdgeCondition::Always, None, 0),
                edge(
                    "classifier",
                    EdgeTargets::One("handler_a".to_string()),
                    EdgeCondition::OnCondition,
                    Some("result == \"category_a\""),
                    0,
                ),
                edge(
                    "classifier",
                    EdgeTargets::One("handler_b".to_string()),
                    EdgeCondition::OnCondition,
                    Some("result == \"category_b\""),
                    0,
                ),
            ],
        };

        let registry = Arc::new(
            StaticAgentRegistry::new()
                .register("classifier", Arc::new(ConstAgent(Json::String("category_a".to_string()))))
                .register("echo", Arc::new(EchoAgent)),
        );
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::Null, &HashMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let handler_a = result.agents.iter().find(|a| a.node_name == "handler_a").unwrap();
        let handler_b = result.agents.iter().find(|a| a.node_name == "handler_b").unwrap();
        assert_eq!(handler_a.state, NodeState::Completed);
        assert_eq!(handler_b.state, NodeState::Idle);
    }

    /// S3 — fan-out: both siblings run, the join node completes exactly
    /// once, and every node appears in the execution log.
    #[tokio::test]
    async fn fan_out_runs_both_siblings_and_joins_once() {
        let def = FlowDefinition {
            flow: "fanout".to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            created_at: None,
            updated_at: None,
            metadata: FlowMetadata::default(),
            nodes: vec![
                NodeDefinition::new("start", NodeType::Start),
                {
                    let mut n = NodeDefinition::new("a", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
                {
                    let mut n = NodeDefinition::new("b", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
                NodeDefinition::new("end", NodeType::End),
            ],
            edges: vec![
                edge("start", EdgeTargets::Many(vec!["a".to_string(), "b".to_string()]), EdgeCondition::Always, None, 0),
                edge("a", EdgeTargets::One("end".to_string()), EdgeCondition::Always, None, 0),
                edge("b", EdgeTargets::One("end".to_string()), EdgeCondition::Always, None, 0),
            ],
        };

        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(EchoAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::String("hi".into()), &HashMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.agents.len(), 4);
        let a = result.agents.iter().find(|x| x.node_name == "a").unwrap();
        let b = result.agents.iter().find(|x| x.node_name == "b").unwrap();
        let end = result.agents.iter().find(|x| x.node_name == "end").unwrap();
        assert_eq!(a.state, NodeState::Completed);
        assert_eq!(b.state, NodeState::Completed);
        assert_eq!(end.state, NodeState::Completed);
        for id in ["start", "a", "b", "end"] {
            assert!(result.execution_log.iter().any(|line| line.starts_with(id)), "missing log entry for {id}");
        }
    }

    struct FlakyAgent {
        remaining_failures: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        async fn ask(&self, _prompt: &str, _ctx: &HashMap<String, Json>) -> Result<Json> {
            use std::sync::atomic::Ordering;
            if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok() {
                return Err(FlowError::Other("transient".to_string()));
            }
            Ok(Json::String("recovered".to_string()))
        }
    }

    /// S4 — retry then success: one failure, then a success, within
    /// `max_retries = 2`; the final log entry's `retry_count` is 1.
    #[tokio::test]
    async fn retry_then_success_reaches_completion() {
        let mut def = linear_definition();
        def.nodes[1].max_retries = 2;
        let registry = Arc::new(
            StaticAgentRegistry::new()
                .register("echo", Arc::new(FlakyAgent { remaining_failures: std::sync::atomic::AtomicU32::new(1) })),
        );
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::String("hi".into()), &HashMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let worker = result.agents.iter().find(|a| a.node_name == "worker").unwrap();
        assert_eq!(worker.state, NodeState::Completed);
        assert_eq!(worker.retry_count, 1);
    }

    /// S5 — terminal failure: the agent always fails; retries exhaust and
    /// the run reports `partial` because `start` still completed.
    #[tokio::test]
    async fn terminal_failure_after_exhausting_retries_is_partial() {
        let mut def = linear_definition();
        def.nodes[1].max_retries = 1;
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(FailingAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::String("hi".into()), &HashMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Partial);
        let worker = result.agents.iter().find(|a| a.node_name == "worker").unwrap();
        assert_eq!(worker.state, NodeState::Failed);
        assert_eq!(worker.retry_count, 1);
        assert!(result.errors.iter().any(|e| e.contains("exhausted retries")));
    }

    struct SlowAgent;

    #[async_trait]
    impl Agent for SlowAgent {
        async fn ask(&self, _prompt: &str, _ctx: &HashMap<String, Json>) -> Result<Json> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Json::Null)
        }
    }

    /// S6 — a tight `execution_timeout` fails the run without panicking,
    /// while the slow in-flight worker is allowed to finish on its own.
    #[tokio::test]
    async fn execution_timeout_ends_the_run() {
        let mut def = linear_definition();
        def.metadata.execution_timeout = Some(0.01);
        let registry = Arc::new(StaticAgentRegistry::new().register("echo", Arc::new(SlowAgent)));
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::Null, &HashMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::TimedOut);
        assert!(result.errors.iter().any(|e| e.contains("timed out")));
    }

    /// S7 — predicate over a structured record: only the branch whose
    /// dotted-path condition matches the classifier's record fires.
    #[tokio::test]
    async fn predicate_over_structured_record_selects_one_branch() {
        let def = FlowDefinition {
            flow: "pizza-or-sushi".to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            created_at: None,
            updated_at: None,
            metadata: FlowMetadata::default(),
            nodes: vec![
                NodeDefinition::new("start", NodeType::Start),
                {
                    let mut n = NodeDefinition::new("classifier", NodeType::Decision);
                    n.agent_ref = Some("classifier".to_string());
                    n
                },
                {
                    let mut n = NodeDefinition::new("pizza", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
                {
                    let mut n = NodeDefinition::new("sushi", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
            ],
            edges: vec![
                edge("start", EdgeTargets::One("classifier".to_string()), EdgeCondition::Always, None, 0),
                edge(
                    "classifier",
                    EdgeTargets::One("pizza".to_string()),
                    EdgeCondition::OnCondition,
                    Some("result.final_decision == \"pizza\""),
                    0,
                ),
                edge(
                    "classifier",
                    EdgeTargets::One("sushi".to_string()),
                    EdgeCondition::OnCondition,
                    Some("result.final_decision == \"sushi\""),
                    0,
                ),
            ],
        };

        let record = serde_json::json!({"final_decision": "pizza", "confidence": 0.95});
        let registry = Arc::new(
            StaticAgentRegistry::new()
                .register("classifier", Arc::new(ConstAgent(record)))
                .register("echo", Arc::new(EchoAgent)),
        );
        let engine = FlowEngine::new(def, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::Null, &HashMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let pizza = result.agents.iter().find(|a| a.node_name == "pizza").unwrap();
        let sushi = result.agents.iter().find(|a| a.node_name == "sushi").unwrap();
        assert_eq!(pizza.state, NodeState::Completed);
        assert_eq!(sushi.state, NodeState::Idle);
    }

    /// S8 — a visual round-trip of the S2 fixture materialises and runs
    /// identically, picking the same winning branch.
    #[tokio::test]
    async fn visual_round_trip_executes_identically() {
        let original = FlowDefinition {
            flow: "routing".to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            created_at: None,
            updated_at: None,
            metadata: FlowMetadata::default(),
            nodes: vec![
                NodeDefinition::new("start", NodeType::Start),
                {
                    let mut n = NodeDefinition::new("classifier", NodeType::Agent);
                    n.agent_ref = Some("classifier".to_string());
                    n
                },
                {
                    let mut n = NodeDefinition::new("handler_a", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
                {
                    let mut n = NodeDefinition::new("handler_b", NodeType::Agent);
                    n.agent_ref = Some("echo".to_string());
                    n
                },
            ],
            edges: vec![
                edge("start", EdgeTargets::One("classifier".to_string()), EdgeCondition::Always, None, 0),
                edge(
                    "classifier",
                    EdgeTargets::One("handler_a".to_string()),
                    EdgeCondition::OnCondition,
                    Some("result == \"category_a\""),
                    0,
                ),
                edge(
                    "classifier",
                    EdgeTargets::One("handler_b".to_string()),
                    EdgeCondition::OnCondition,
                    Some("result == \"category_b\""),
                    0,
                ),
            ],
        };

        let visual = crate::visual::to_visual(&original);
        let roundtripped = crate::visual::from_visual(visual, "routing").unwrap();

        let registry = Arc::new(
            StaticAgentRegistry::new()
                .register("classifier", Arc::new(ConstAgent(Json::String("category_a".to_string()))))
                .register("echo", Arc::new(EchoAgent)),
        );
        let engine = FlowEngine::new(roundtripped, registry, &HashMap::new()).unwrap();
        let result = engine.run(&Json::Null, &HashMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        let handler_a = result.agents.iter().find(|a| a.node_name == "handler_a").unwrap();
        let handler_b = result.agents.iter().find(|a| a.node_name == "handler_b").unwrap();
        assert_eq!(handler_a.state, NodeState::Completed);
        assert_eq!(handler_b.state, NodeState::Idle);
    }
}

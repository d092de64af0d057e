//! Per-node finite state machine.
//!
//! Grounded on `fsm.py`'s `AgentTaskMachine` (a `python-statemachine`
//! definition): `idle -> ready -> running -> {completed, failed}`, with
//! `failed` able to loop back to `ready` via `retry` and any state able to
//! move to `blocked` and back. The Rust port keeps the same six states and
//! the same transition names but replaces the state machine library with a
//! hand-rolled `match` over `(NodeState, Event)`, since no state-machine
//! crate is present anywhere in the dependency corpus.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Lifecycle state of a single node during one `run()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not yet considered; dependencies may still be unresolved.
    Idle,
    /// Dependencies satisfied; eligible for scheduling.
    Ready,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error and retries exhausted.
    Failed,
    /// Waiting on an external event (e.g. human-in-the-loop).
    Blocked,
}

impl NodeState {
    /// `true` once the node is done (successfully or not) for this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Failed)
    }
}

/// Transition events accepted by [`RuntimeNode::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `idle -> ready`: dependencies satisfied.
    Schedule,
    /// `ready -> running`: execution begun.
    Start,
    /// `running -> completed`.
    Succeed,
    /// `running -> failed`.
    Fail,
    /// any -> `blocked`.
    Block,
    /// `blocked -> ready`.
    Unblock,
    /// `failed -> ready`, incrementing `retry_count`.
    Retry,
}

impl Event {
    fn name(self) -> &'static str {
        match self {
            Event::Schedule => "schedule",
            Event::Start => "start",
            Event::Succeed => "succeed",
            Event::Fail => "fail",
            Event::Block => "block",
            Event::Unblock => "unblock",
            Event::Retry => "retry",
        }
    }
}

/// Runtime bookkeeping for one node across a single `run()` call.
///
/// Holds everything the scheduler and transition processor need: the FSM
/// state itself, dependency ids (for readiness checks), retry bookkeeping,
/// and the last execution's result/error/timing so transitions and the
/// final `RunResult` can read them back.
#[derive(Debug, Clone)]
pub struct RuntimeNode {
    /// Node id this tracks.
    pub id: String,
    /// Current FSM state.
    state: NodeState,
    /// Ids of nodes that must complete before this one can be scheduled.
    pub dependencies: HashSet<String>,
    /// Number of retry attempts used so far.
    pub retry_count: u32,
    /// Maximum retry attempts allowed.
    pub max_retries: u32,
    /// Set once outgoing transitions from this node have been evaluated,
    /// so a completed/failed node is only processed once per terminal visit.
    pub transitions_processed: bool,
    /// Last successful result, if any.
    pub result: Option<serde_json::Value>,
    /// Last failure message, if any.
    pub error: Option<String>,
    /// Wall-clock time spent in `running`, set when a run finishes.
    pub duration: Option<Duration>,
}

impl RuntimeNode {
    /// Construct a fresh node in `idle` state with zeroed counters.
    pub fn new(id: impl Into<String>, dependencies: HashSet<String>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            state: NodeState::Idle,
            dependencies,
            retry_count: 0,
            max_retries,
            transitions_processed: false,
            result: None,
            error: None,
            duration: None,
        }
    }

    /// Current FSM state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Reset to `idle` for a new `run()`, keeping static config
    /// (`dependencies`, `max_retries`) but clearing per-run data.
    pub fn reset(&mut self) {
        self.state = NodeState::Idle;
        self.retry_count = 0;
        self.transitions_processed = false;
        self.result = None;
        self.error = None;
        self.duration = None;
    }

    /// Apply a transition event, returning an error if illegal from the
    /// current state. On success, updates `state` in place.
    pub fn apply(&mut self, event: Event) -> Result<()> {
        use NodeState::*;
        let next = match (self.state, event) {
            (Idle, Event::Schedule) => Ready,
            (Ready, Event::Start) => Running,
            (Running, Event::Succeed) => Completed,
            (Running | Ready | Idle, Event::Fail) => Failed,
            (Failed, Event::Retry) if self.retry_count < self.max_retries => {
                self.retry_count += 1;
                Ready
            }
            (Idle | Ready, Event::Block) => Blocked,
            (Blocked, Event::Unblock) => Ready,
            (state, event) => {
                return Err(FlowError::IllegalTransition {
                    node: self.id.clone(),
                    state,
                    event: event.name(),
                })
            }
        };
        self.state = next;
        Ok(())
    }

    /// `true` if every dependency id in `completed` is satisfied and this
    /// node is still idle.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.state == NodeState::Idle && self.dependencies.iter().all(|d| completed.contains(d))
    }

    /// `true` if retries remain after a failure.
    pub fn can_retry(&self) -> bool {
        self.state == NodeState::Failed && self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> RuntimeNode {
        RuntimeNode::new("n1", HashSet::new(), 2)
    }

    #[test]
    fn happy_path_to_completion() {
        let mut n = node();
        n.apply(Event::Schedule).unwrap();
        n.apply(Event::Start).unwrap();
        n.apply(Event::Succeed).unwrap();
        assert_eq!(n.state(), NodeState::Completed);
        assert!(n.state().is_terminal());
    }

    #[test]
    fn failure_then_retry_then_success() {
        let mut n = node();
        n.apply(Event::Schedule).unwrap();
        n.apply(Event::Start).unwrap();
        n.apply(Event::Fail).unwrap();
        assert!(n.can_retry());
        n.apply(Event::Retry).unwrap();
        assert_eq!(n.state(), NodeState::Ready);
        assert_eq!(n.retry_count, 1);
        n.apply(Event::Start).unwrap();
        n.apply(Event::Succeed).unwrap();
        assert_eq!(n.state(), NodeState::Completed);
    }

    #[test]
    fn retry_exhausted_is_illegal() {
        let mut n = RuntimeNode::new("n1", HashSet::new(), 1);
        n.apply(Event::Schedule).unwrap();
        n.apply(Event::Start).unwrap();
        n.apply(Event::Fail).unwrap();
        n.apply(Event::Retry).unwrap();
        n.apply(Event::Start).unwrap();
        n.apply(Event::Fail).unwrap();
        assert!(!n.can_retry());
        let err = n.apply(Event::Retry).unwrap_err();
        assert!(matches!(err, FlowError::IllegalTransition { .. }));
    }

    #[test]
    fn fail_allowed_directly_from_ready_and_idle() {
        let mut ready = node();
        ready.apply(Event::Schedule).unwrap();
        ready.apply(Event::Fail).unwrap();
        assert_eq!(ready.state(), NodeState::Failed);

        let mut idle = node();
        idle.apply(Event::Fail).unwrap();
        assert_eq!(idle.state(), NodeState::Failed);
    }

    #[test]
    fn illegal_transition_from_idle_to_completed() {
        let mut n = node();
        let err = n.apply(Event::Succeed).unwrap_err();
        assert!(matches!(err, FlowError::IllegalTransition { .. }));
    }

    #[test]
    fn block_and_unblock_round_trip() {
        let mut n = node();
        n.apply(Event::Schedule).unwrap();
        n.apply(Event::Block).unwrap();
        assert_eq!(n.state(), NodeState::Blocked);
        n.apply(Event::Unblock).unwrap();
        assert_eq!(n.state(), NodeState::Ready);
    }

    #[test]
    fn readiness_requires_all_dependencies_complete() {
        let deps: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let n = RuntimeNode::new("n1", deps, 0);
        let mut completed = HashSet::new();
        completed.insert("a".to_string());
        assert!(!n.is_ready(&completed));
        completed.insert("b".to_string());
        assert!(n.is_ready(&completed));
    }

    #[test]
    fn reset_clears_per_run_state_but_keeps_config() {
        let mut n = RuntimeNode::new("n1", HashSet::new(), 3);
        n.apply(Event::Schedule).unwrap();
        n.apply(Event::Start).unwrap();
        n.apply(Event::Fail).unwrap();
        n.error = Some("boom".into());
        n.reset();
        assert_eq!(n.state(), NodeState::Idle);
        assert_eq!(n.retry_count, 0);
        assert!(n.error.is_none());
        assert_eq!(n.max_retries, 3);
    }
}

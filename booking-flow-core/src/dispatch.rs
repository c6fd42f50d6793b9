//! Step Dispatch Loop
//!
//! Runs the handler for `current_step`, persists, and repeats until a
//! handler halts or the iteration bound is hit. Handlers move the record
//! between steps themselves; the loop only follows where they leave it.
//!
//! An unknown step or a step without a registered handler stops the loop
//! with a warning. Nothing here panics on bad handler output.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::StoreError;
use crate::guards::{GuardEvaluator, GuardSnapshot};
use crate::record::EventRecord;
use crate::step::Step;

/// Audit reason written when a detour stage has nothing left to clarify
pub const DETOUR_RESOLVED_REASON: &str = "detour_already_resolved";

/// What one stage handler produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupResult {
    pub action: String,
    pub payload: JsonValue,
    /// Stop dispatching for this turn and reply with this result
    pub halt: bool,
}

impl GroupResult {
    pub fn halt(action: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            action: action.into(),
            payload,
            halt: true,
        }
    }

    pub fn proceed(action: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            action: action.into(),
            payload,
            halt: false,
        }
    }
}

/// Business logic for one stage
pub trait StepHandler: Send + Sync {
    fn handle(&self, record: &mut EventRecord, guard: &GuardSnapshot) -> GroupResult;
}

impl<F> StepHandler for F
where
    F: Fn(&mut EventRecord, &GuardSnapshot) -> GroupResult + Send + Sync,
{
    fn handle(&self, record: &mut EventRecord, guard: &GuardSnapshot) -> GroupResult {
        self(record, guard)
    }
}

/// Stage handlers by step
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: BTreeMap<Step, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: Step, handler: impl StepHandler + 'static) -> &mut Self {
        self.handlers.insert(step, Arc::new(handler));
        self
    }

    pub fn get(&self, step: Step) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(&step)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "step", rename_all = "snake_case")]
pub enum DispatchTermination {
    /// A handler returned `halt = true`
    Halted,
    /// `max_iterations` handler runs without a halt
    BoundExceeded,
    /// `current_step` held a value outside 1..=7
    UnknownStep(u8),
    MissingHandler(Step),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub termination: DispatchTermination,
    /// Halting result, or the last non-halting one if the loop stopped
    /// for another reason
    pub result: Option<GroupResult>,
    pub iterations: usize,
    /// Steps whose handler ran, in order
    pub visited: Vec<Step>,
}

impl DispatchOutcome {
    pub fn halted(&self) -> bool {
        self.termination == DispatchTermination::Halted
    }
}

pub struct DispatchLoop<'a> {
    registry: &'a StepRegistry,
    guards: &'a GuardEvaluator,
    config: &'a DispatchConfig,
}

impl<'a> DispatchLoop<'a> {
    pub fn new(
        registry: &'a StepRegistry,
        guards: &'a GuardEvaluator,
        config: &'a DispatchConfig,
    ) -> Self {
        Self {
            registry,
            guards,
            config,
        }
    }

    /// Dispatch until halt, with at most `max_iterations` passes.
    ///
    /// Each pass evaluates the entry guard, runs the handler and saves the
    /// record. Only store failures are errors.
    pub fn run(
        &self,
        record: &mut EventRecord,
        store: &dyn crate::store::RecordStore,
    ) -> Result<DispatchOutcome, StoreError> {
        let mut outcome = DispatchOutcome {
            termination: DispatchTermination::BoundExceeded,
            result: None,
            iterations: 0,
            visited: Vec::new(),
        };

        for _ in 0..self.config.max_iterations {
            let Some(step) = record.step() else {
                warn!(
                    event_id = %record.event_id,
                    current_step = record.current_step,
                    "Unknown step, stopping dispatch"
                );
                outcome.termination = DispatchTermination::UnknownStep(record.current_step);
                return Ok(outcome);
            };

            let guard = self.guards.evaluate_entry(record, step);

            if self.config.skip_resolved_detours
                && guard.guarded
                && !guard.required()
                && record.has_pending_caller()
            {
                if let Some(caller) = record.return_to_caller(DETOUR_RESOLVED_REASON) {
                    debug!(
                        event_id = %record.event_id,
                        from_step = step.number(),
                        caller = caller.number(),
                        "Detour already resolved, returning to caller"
                    );
                    store.save(record)?;
                    outcome.iterations += 1;
                    continue;
                }
            }

            let Some(handler) = self.registry.get(step) else {
                warn!(
                    event_id = %record.event_id,
                    step = %step,
                    "No handler registered, stopping dispatch"
                );
                outcome.termination = DispatchTermination::MissingHandler(step);
                return Ok(outcome);
            };

            let result = handler.handle(record, &guard);
            outcome.iterations += 1;
            outcome.visited.push(step);
            store.save(record)?;

            debug!(
                event_id = %record.event_id,
                step = step.number(),
                action = %result.action,
                halt = result.halt,
                next_step = record.current_step,
                "Stage handled"
            );

            let halt = result.halt;
            outcome.result = Some(result);
            if halt {
                outcome.termination = DispatchTermination::Halted;
                return Ok(outcome);
            }
        }

        warn!(
            event_id = %record.event_id,
            max_iterations = self.config.max_iterations,
            visited = ?outcome.visited,
            "Dispatch bound exceeded without a halting result"
        );
        Ok(outcome)
    }
}

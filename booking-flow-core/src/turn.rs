//! Turn Pipeline
//!
//! One inbound message, start to finish:
//!
//! 1. snapshot the record and advance the turn counter
//! 2. absorb pipeline-owned facts (requirements, requested date, window,
//!    contact details)
//! 3. run the atomic turn planner when the message carries several
//!    intents, deferred ones are waiting, or it owns the single intent
//! 4. classify the change against the pre-turn snapshot, falling back to
//!    what the planner executed, and route it
//! 5. dispatch stage handlers unless routing says nothing needs to run
//! 6. age the open choice prompt and persist

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::change::{detect_changes, ChangeSet, ChangeType};
use crate::config::FlowConfig;
use crate::dispatch::{DispatchLoop, DispatchOutcome, GroupResult, StepRegistry};
use crate::error::FlowError;
use crate::facts::{DateFact, ExtractedFacts};
use crate::guards::GuardEvaluator;
use crate::planner::execute::IntentApplier;
use crate::planner::intents::Intent;
use crate::planner::questions::default_question;
use crate::planner::{AtomicTurnPlanner, PlannerResult};
use crate::record::EventRecord;
use crate::router::{apply_decision, route, NextStepDecision};
use crate::step::Step;
use crate::store::RecordStore;

/// Everything that happened while processing one message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub event_id: Uuid,
    pub turn: u64,
    pub changes: ChangeSet,
    /// Highest-priority change, the one that was routed
    pub change: Option<ChangeType>,
    pub decision: Option<NextStepDecision>,
    pub plan: Option<PlannerResult>,
    pub dispatch: Option<DispatchOutcome>,
    pub reply: GroupResult,
    pub current_step: u8,
    pub caller_stack: Vec<Step>,
    pub choice_expired: bool,
}

pub struct TurnPipeline {
    config: FlowConfig,
    registry: StepRegistry,
    guards: GuardEvaluator,
    planner: AtomicTurnPlanner,
}

impl TurnPipeline {
    pub fn new(config: FlowConfig, registry: StepRegistry) -> Self {
        Self {
            guards: GuardEvaluator::new(config.guards.clone()),
            planner: AtomicTurnPlanner::new(config.planner.clone(), config.choice.clone()),
            config,
            registry,
        }
    }

    /// Route planner execution through a custom applier
    pub fn with_applier(mut self, applier: Arc<dyn IntentApplier>) -> Self {
        self.planner = self.planner.with_applier(applier);
        self
    }

    /// Load (or start) the conversation, process one message, return the
    /// updated record with the outcome
    pub fn handle_message(
        &self,
        store: &dyn RecordStore,
        event_id: Uuid,
        facts: &ExtractedFacts,
    ) -> Result<(EventRecord, TurnOutcome), FlowError> {
        let mut record = match store.load(event_id)? {
            Some(record) => record,
            None => {
                info!(event_id = %event_id, "Starting new booking conversation");
                EventRecord::new(event_id)
            }
        };
        let outcome = self.process_turn(&mut record, facts, store)?;
        Ok((record, outcome))
    }

    pub fn process_turn(
        &self,
        record: &mut EventRecord,
        facts: &ExtractedFacts,
        store: &dyn RecordStore,
    ) -> Result<TurnOutcome, FlowError> {
        let previous = record.clone();
        let turn = record.begin_turn();
        record.latest_facts = facts.clone();

        let planner_engaged = AtomicTurnPlanner::should_engage(record, facts);
        absorb_facts(record, facts, planner_engaged);

        let plan = if planner_engaged {
            let plan = self.planner.plan_turn(record, facts);
            absorb_unclaimed_window(record, facts, &plan);
            store.save(record)?;
            Some(plan)
        } else {
            None
        };

        let changes = detect_changes(&previous, facts);
        let change = changes
            .primary()
            .or_else(|| plan.as_ref().and_then(PlannerResult::executed_change))
            .or_else(|| {
                // replayed intents can move requirements without a fresh fact
                (record.requirements_hash != previous.requirements_hash)
                    .then_some(ChangeType::Requirements)
            });

        let decision = match (change, record.step()) {
            (Some(change), Some(from)) => {
                let decision = route(record, change, from);
                apply_decision(record, &decision, change, self.config.routing.caller_policy);
                Some(decision)
            }
            (Some(change), None) => {
                warn!(
                    event_id = %record.event_id,
                    current_step = record.current_step,
                    change = %change,
                    "Unknown step, change not routed"
                );
                None
            }
            (None, _) => None,
        };

        let run_stages = decision
            .as_ref()
            .map_or(true, |d| d.maybe_run_dependent_stage);
        let dispatch = if run_stages {
            let dispatch = DispatchLoop::new(&self.registry, &self.guards, &self.config.dispatch)
                .run(record, store)?;
            Some(dispatch)
        } else {
            debug!(
                event_id = %record.event_id,
                skip_reason = ?decision.as_ref().and_then(|d| d.skip_reason),
                "No stage re-evaluation needed"
            );
            None
        };

        let reply = match dispatch.as_ref().and_then(|d| d.result.clone()) {
            Some(result) => result,
            None => acknowledgement(record, decision.as_ref(), plan.as_ref()),
        };

        let choice_expired = record.tick_choice_context();
        if choice_expired {
            debug!(event_id = %record.event_id, "Choice prompt expired");
        }
        store.save(record)?;

        info!(
            event_id = %record.event_id,
            turn,
            change = ?change,
            current_step = record.current_step,
            caller = ?record.caller_step(),
            planner = plan.is_some(),
            "Turn processed"
        );

        Ok(TurnOutcome {
            event_id: record.event_id,
            turn,
            changes,
            change,
            decision,
            plan,
            dispatch,
            reply,
            current_step: record.current_step,
            caller_stack: record.caller_stack.clone(),
            choice_expired,
        })
    }
}

/// Write the facts the pipeline owns. While the planner is engaged it owns
/// participants, the room, the time window and every date it can turn into
/// an intent, so a deferred or rolled-back intent leaves no trace here.
fn absorb_facts(record: &mut EventRecord, facts: &ExtractedFacts, planner_engaged: bool) {
    let mut structural = facts.clone();
    if planner_engaged {
        structural.participants = None;
        structural.room = None;
        structural.time_window = None;
    }
    if structural.has_structural() {
        record.requirements = structural.merged_requirements(&record.requirements);
        record.refresh_requirements_hash();
    }

    match facts.date_fact() {
        Some(DateFact::Parsed(date)) if record.date_confirmed && record.chosen_date == Some(date) => {}
        Some(DateFact::Parsed(date))
            if planner_engaged && !record.excluded_dates.contains(&date) => {}
        Some(DateFact::Parsed(_)) | Some(DateFact::Unparseable(_)) => {
            record.requested_date = facts.date.clone();
        }
        None => {}
    }

    if let Some(window) = facts.date_window {
        record.date_window = Some(window);
    }
    if let Some(client) = &facts.client {
        record.client = record.client.overlaid(client);
    }
}

/// A stated time window travels with the date intent; without one it is
/// stored directly.
fn absorb_unclaimed_window(
    record: &mut EventRecord,
    facts: &ExtractedFacts,
    plan: &PlannerResult,
) {
    let Some(stated) = facts.time_window else {
        return;
    };
    let queued = plan
        .deferred
        .iter()
        .filter(|d| d.reason.is_retryable())
        .map(|d| &d.intent);
    let claimed = plan.executed.iter().chain(queued).any(
        |intent| matches!(intent, Intent::ConfirmDate { window: Some(w), .. } if *w == stated),
    );
    if !claimed && record.requirements.time_window != Some(stated) {
        record.requirements.time_window = Some(stated);
        record.refresh_requirements_hash();
    }
}

fn acknowledgement(
    record: &EventRecord,
    decision: Option<&NextStepDecision>,
    plan: Option<&PlannerResult>,
) -> GroupResult {
    let action = decision
        .and_then(|d| d.skip_reason)
        .map_or("acknowledged", |skip| skip.as_str());
    let message = plan
        .map(|p| p.message.clone())
        .unwrap_or_else(|| default_question(record.step()).to_string());
    GroupResult::halt(
        action,
        json!({
            "message": message,
            "step": record.current_step,
        }),
    )
}

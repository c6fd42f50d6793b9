//! DAG Router
//!
//! Maps (current step, change category, hash state) to the next step.
//! `route` is pure; `apply_decision` performs the record mutation.
//!
//! | From step        | Category     | Next step        | Caller write | Re-eval | Skip reason               |
//! |------------------|--------------|------------------|--------------|---------|---------------------------|
//! | >= 3             | Date         | 2                | from, if none pending | yes | -                    |
//! | >= 4             | Room         | 3                | from, if none pending | yes | -                    |
//! | >= 4, mismatch   | Requirements | 3                | from, if none pending | yes | -                    |
//! | any, hash match  | Requirements | caller else from | -            | no      | `requirements_hash_match` |
//! | 4, 5             | Products     | 4                | -            | yes     | `products_only`           |
//! | 5                | Commercial   | 5                | -            | yes     | -                         |
//! | 7                | Deposit      | 7                | -            | yes     | -                         |
//! | 7                | SiteVisit    | 7                | -            | yes     | `site_visit_reschedule`   |
//! | any              | ClientInfo   | from             | -            | no      | `client_info_update`      |
//!
//! Any other combination stays on `from` and re-evaluates it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::canonical_hash::hashes_match;
use crate::change::ChangeType;
use crate::config::CallerPolicy;
use crate::record::EventRecord;
use crate::step::Step;

/// Why a decision short-circuits or narrows the normal re-evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RequirementsHashMatch,
    ProductsOnly,
    SiteVisitReschedule,
    ClientInfoUpdate,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::RequirementsHashMatch => "requirements_hash_match",
            SkipReason::ProductsOnly => "products_only",
            SkipReason::SiteVisitReschedule => "site_visit_reschedule",
            SkipReason::ClientInfoUpdate => "client_info_update",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing outcome for one classified change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStepDecision {
    pub next_step: Step,
    /// The stage at `next_step` has to run this turn
    pub maybe_run_dependent_stage: bool,
    /// Return address to record; only set when leaving `from` with no
    /// caller already pending
    pub updated_caller_step: Option<Step>,
    pub skip_reason: Option<SkipReason>,
    pub needs_reevaluation: bool,
    /// Step interrupted by a dependency detour, regardless of whether a
    /// caller was already pending. The stack policy records every one.
    pub detour_from: Option<Step>,
    /// Control goes back to the pending caller
    pub returns_to_caller: bool,
}

impl NextStepDecision {
    fn stay(from: Step, needs_reevaluation: bool, skip_reason: Option<SkipReason>) -> Self {
        Self {
            next_step: from,
            maybe_run_dependent_stage: needs_reevaluation,
            updated_caller_step: None,
            skip_reason,
            needs_reevaluation,
            detour_from: None,
            returns_to_caller: false,
        }
    }

    fn detour(record: &EventRecord, from: Step, target: Step) -> Self {
        Self {
            next_step: target,
            maybe_run_dependent_stage: true,
            updated_caller_step: if record.has_pending_caller() || target == from {
                None
            } else {
                Some(from)
            },
            skip_reason: None,
            needs_reevaluation: true,
            detour_from: (target != from).then_some(from),
            returns_to_caller: false,
        }
    }
}

/// Decide where a change sends the conversation
pub fn route(record: &EventRecord, change: ChangeType, from_step: Step) -> NextStepDecision {
    let from = from_step.number();

    let decision = match change {
        ChangeType::Date if from >= 3 => {
            NextStepDecision::detour(record, from_step, Step::DateConfirmation)
        }
        ChangeType::Room if from >= 4 => {
            NextStepDecision::detour(record, from_step, Step::RoomAvailability)
        }
        ChangeType::Requirements => {
            if hashes_match(
                record.requirements_hash.as_deref(),
                record.room_eval_hash.as_deref(),
            ) {
                let caller = record.caller_step();
                NextStepDecision {
                    next_step: caller.unwrap_or(from_step),
                    maybe_run_dependent_stage: false,
                    updated_caller_step: None,
                    skip_reason: Some(SkipReason::RequirementsHashMatch),
                    needs_reevaluation: false,
                    detour_from: None,
                    returns_to_caller: caller.is_some(),
                }
            } else if from >= 4 {
                NextStepDecision::detour(record, from_step, Step::RoomAvailability)
            } else {
                NextStepDecision::stay(from_step, true, None)
            }
        }
        ChangeType::Products if from == 4 || from == 5 => NextStepDecision {
            next_step: Step::Offer,
            maybe_run_dependent_stage: true,
            updated_caller_step: None,
            skip_reason: Some(SkipReason::ProductsOnly),
            needs_reevaluation: true,
            detour_from: None,
            returns_to_caller: false,
        },
        ChangeType::Commercial if from == 5 => NextStepDecision::stay(from_step, true, None),
        ChangeType::Deposit if from == 7 => NextStepDecision::stay(from_step, true, None),
        ChangeType::SiteVisit if from == 7 => {
            NextStepDecision::stay(from_step, true, Some(SkipReason::SiteVisitReschedule))
        }
        ChangeType::ClientInfo => {
            NextStepDecision::stay(from_step, false, Some(SkipReason::ClientInfoUpdate))
        }
        ChangeType::Date
        | ChangeType::Room
        | ChangeType::Products
        | ChangeType::Commercial
        | ChangeType::Deposit
        | ChangeType::SiteVisit => NextStepDecision::stay(from_step, true, None),
    };

    debug!(
        event_id = %record.event_id,
        change = %change,
        from_step = from,
        next_step = decision.next_step.number(),
        caller = ?decision.updated_caller_step,
        skip_reason = ?decision.skip_reason,
        "Routed change"
    );

    decision
}

/// Apply a routing decision: record return addresses under `policy`,
/// move `current_step`, and audit the transition.
pub fn apply_decision(
    record: &mut EventRecord,
    decision: &NextStepDecision,
    change: ChangeType,
    policy: CallerPolicy,
) {
    if let Some(interrupted) = decision.detour_from {
        record.push_caller(interrupted, policy);
    }

    let reason = match decision.skip_reason {
        Some(skip) => format!("{change}:{skip}"),
        None => change.to_string(),
    };

    if decision.returns_to_caller {
        record.return_to_caller(reason);
    } else {
        record.move_to(decision.next_step, reason);
    }
}

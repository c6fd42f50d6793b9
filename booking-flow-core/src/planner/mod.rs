//! Atomic Turn Planner
//!
//! Handles messages that carry several independent intents at once
//! ("Friday in room Alpine, and add lunch for 20"). Each turn runs through
//! fixed phases:
//!
//! 1. **Parsing** - capability parsers classify facts as verifiable
//!    intents or needs-input items
//! 2. **Classifying** - open pending intents from earlier turns join the
//!    fresh ones unless a fresh intent supersedes them
//! 3. **Deciding** - combo execution if a complete date and a bookable
//!    flagged room arrive together, bounded execution otherwise
//! 4. **Executing** - prerequisites are checked against projected state;
//!    at most `max_verifiable_per_turn` units run, the rest are deferred
//! 5. **Composing** - one follow-up question is chosen by priority
//!
//! Deferred intents are appended to the record's pending queue and
//! replayed on later turns. Intents that failed to execute are appended
//! already resolved.

pub mod dag_guard;
pub mod execute;
pub mod intents;
pub mod parsers;
pub mod questions;
pub mod telemetry;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::change::ChangeType;
use crate::config::{ChoiceConfig, PlannerConfig};
use crate::facts::ExtractedFacts;
use crate::record::{ChoiceKind, EventRecord};

use dag_guard::{check_prerequisites, ProjectedState};
use execute::{apply_atomically, ApplyError, IntentApplier, RecordApplier};
use intents::{DeferralReason, Intent, NeedsInput, NeedsInputKind, NeedsInputReason};
use questions::NextQuestion;
use telemetry::TurnTelemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Parsing,
    Classifying,
    Deciding,
    Executing,
    Composing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Date and room confirmed together, all or nothing
    Combo,
    /// Up to the per-turn limit, one intent at a time
    Bounded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredIntent {
    pub intent: Intent,
    pub reason: DeferralReason,
    /// Queue position if the intent is (still) pending
    pub pending_seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannerResult {
    pub mode: ExecutionMode,
    pub combined_confirmation: bool,
    pub executed: Vec<Intent>,
    pub deferred: Vec<DeferredIntent>,
    pub deferred_count: usize,
    pub needs_input: Vec<NeedsInput>,
    pub question: NextQuestion,
    /// Client-facing summary of what happened plus the question
    pub message: String,
    pub telemetry: TurnTelemetry,
}

impl PlannerResult {
    /// Highest-priority change among the executed intents
    pub fn executed_change(&self) -> Option<ChangeType> {
        self.executed.iter().map(Intent::change_type).min()
    }
}

struct Candidate {
    intent: Intent,
    /// Set for intents replayed from the pending queue
    replayed: Option<u64>,
}

pub struct AtomicTurnPlanner {
    config: PlannerConfig,
    choice: ChoiceConfig,
    applier: Arc<dyn IntentApplier>,
}

impl AtomicTurnPlanner {
    pub fn new(config: PlannerConfig, choice: ChoiceConfig) -> Self {
        Self {
            config,
            choice,
            applier: Arc::new(RecordApplier),
        }
    }

    pub fn with_applier(mut self, applier: Arc<dyn IntentApplier>) -> Self {
        self.applier = applier;
        self
    }

    /// The planner takes over for multi-intent messages, whenever deferred
    /// intents are waiting, and for any single intent it owns outright:
    /// choice answers, product changes and billing details.
    pub fn should_engage(record: &EventRecord, facts: &ExtractedFacts) -> bool {
        facts.is_multi_intent()
            || record.open_pending().next().is_some()
            || facts.choice_selection.is_some()
            || !facts.products.is_empty()
            || facts.billing.is_some()
    }

    pub fn plan_turn(&self, record: &mut EventRecord, facts: &ExtractedFacts) -> PlannerResult {
        // ── Parsing ──
        enter(record, TurnPhase::Parsing);
        let parsed = parsers::parse_facts(record, facts);
        let mut needs_input = parsed.needs_input;
        if parsed.choice_resolved {
            record.close_choice();
        }

        // ── Classifying ──
        enter(record, TurnPhase::Classifying);
        let open: Vec<(u64, Intent)> = record
            .open_pending()
            .map(|p| (p.seq, p.intent.clone()))
            .collect();
        let mut superseded = 0;
        let mut candidates = Vec::new();
        for (seq, intent) in open {
            if parsed.verifiable.iter().any(|fresh| fresh.supersedes(&intent)) {
                record.resolve_pending(seq);
                superseded += 1;
            } else {
                candidates.push(Candidate {
                    intent,
                    replayed: Some(seq),
                });
            }
        }
        let replayed = candidates.len();
        candidates.extend(parsed.verifiable.into_iter().map(|intent| Candidate {
            intent,
            replayed: None,
        }));
        // stable: replayed intents keep precedence within a rank
        candidates.sort_by_key(|c| c.intent.execution_rank());

        // ── Deciding ──
        enter(record, TurnPhase::Deciding);
        let combo = if self.config.combo_enabled {
            find_combo(record, &candidates)
        } else {
            None
        };
        let mode = if combo.is_some() {
            ExecutionMode::Combo
        } else {
            ExecutionMode::Bounded
        };

        // ── Executing ──
        enter(record, TurnPhase::Executing);
        let mut executed = Vec::new();
        let mut deferred = Vec::new();
        let mut projected = ProjectedState::from_record(record);
        let mut budget = self.config.max_verifiable_per_turn;
        let mut combined_confirmation = false;
        let mut handled = vec![false; candidates.len()];

        if let Some((date_idx, room_idx)) = combo {
            handled[date_idx] = true;
            handled[room_idx] = true;
            budget = budget.saturating_sub(1);

            let pair = [&candidates[date_idx], &candidates[room_idx]];
            let intents = [&pair[0].intent, &pair[1].intent];
            match apply_atomically(self.applier.as_ref(), record, &intents) {
                Ok(()) => {
                    combined_confirmation = true;
                    for cand in pair {
                        projected.absorb(&cand.intent);
                        complete(record, cand, &mut executed);
                    }
                }
                Err(e) => {
                    warn!(
                        event_id = %record.event_id,
                        error = %e,
                        "Combo execution failed, rolled back"
                    );
                    for cand in pair {
                        defer(record, cand, DeferralReason::ComboRolledBack, &mut deferred);
                    }
                    needs_input.push(question_for_failure(&e));
                }
            }
        }

        for (idx, cand) in candidates.iter().enumerate() {
            if handled[idx] {
                continue;
            }
            if let Err(reason) = check_prerequisites(&cand.intent, &projected) {
                defer(record, cand, reason, &mut deferred);
                needs_input.extend(reason.blocking_question());
                continue;
            }
            if budget == 0 {
                defer(record, cand, DeferralReason::CombinedLimitReached, &mut deferred);
                continue;
            }
            match apply_atomically(self.applier.as_ref(), record, &[&cand.intent]) {
                Ok(()) => {
                    budget -= 1;
                    projected.absorb(&cand.intent);
                    complete(record, cand, &mut executed);
                }
                Err(e) => {
                    warn!(
                        event_id = %record.event_id,
                        intent = ?cand.intent.kind(),
                        error = %e,
                        "Intent execution failed"
                    );
                    defer(record, cand, DeferralReason::ExecutionFailed, &mut deferred);
                    needs_input.push(question_for_failure(&e));
                }
            }
        }

        // ── Composing ──
        enter(record, TurnPhase::Composing);
        let question = questions::next_question(record, &needs_input, &self.config.question_priority);
        if question.kind == Some(NeedsInputKind::DateChoice)
            && !record.date_candidates.is_empty()
            && record.choice_context.is_none()
        {
            let options = record
                .date_candidates
                .iter()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .collect();
            record.open_choice(ChoiceKind::DateOption, options, self.choice.ttl_turns);
        }

        let message = compose_message(&executed, &deferred, combined_confirmation, &question);

        let telemetry = TurnTelemetry {
            turn: record.turn,
            mode,
            executed: executed.iter().map(Intent::kind).collect(),
            deferred: deferred.iter().map(|d| (d.intent.kind(), d.reason)).collect(),
            needs_input: needs_input.iter().map(|n| n.kind).collect(),
            replayed,
            superseded,
            combined_confirmation,
            question: question.kind,
        };
        telemetry.emit(record.event_id);

        PlannerResult {
            mode,
            combined_confirmation,
            deferred_count: deferred.len(),
            executed,
            deferred,
            needs_input,
            question,
            message,
            telemetry,
        }
    }
}

fn enter(record: &EventRecord, phase: TurnPhase) {
    debug!(event_id = %record.event_id, turn = record.turn, phase = ?phase, "Planner phase");
}

/// Indices of a complete date and a room flagged bookable for it
fn find_combo(record: &EventRecord, candidates: &[Candidate]) -> Option<(usize, usize)> {
    let flagged = record
        .pending_room
        .as_ref()
        .filter(|p| p.status.is_bookable())?;
    let date_idx = candidates.iter().position(|c| {
        matches!(c.intent, Intent::ConfirmDate { .. }) && !c.intent.is_partial_date()
    })?;
    let room_idx = candidates.iter().position(
        |c| matches!(&c.intent, Intent::SelectRoom { room_id } if *room_id == flagged.room_id),
    )?;
    Some((date_idx, room_idx))
}

fn complete(record: &mut EventRecord, cand: &Candidate, executed: &mut Vec<Intent>) {
    if let Some(seq) = cand.replayed {
        record.resolve_pending(seq);
    }
    executed.push(cand.intent.clone());
}

fn defer(
    record: &mut EventRecord,
    cand: &Candidate,
    reason: DeferralReason,
    deferred: &mut Vec<DeferredIntent>,
) {
    let pending_seq = match (cand.replayed, reason.is_retryable()) {
        (Some(seq), true) => Some(seq),
        (Some(seq), false) => {
            record.resolve_pending(seq);
            None
        }
        (None, true) => Some(record.enqueue_pending(cand.intent.clone(), reason)),
        (None, false) => {
            let seq = record.enqueue_pending(cand.intent.clone(), reason);
            record.resolve_pending(seq);
            None
        }
    };
    deferred.push(DeferredIntent {
        intent: cand.intent.clone(),
        reason,
        pending_seq,
    });
}

fn question_for_failure(error: &ApplyError) -> NeedsInput {
    match error {
        ApplyError::DateUnavailable(date) => {
            NeedsInput::new(NeedsInputKind::Availability, NeedsInputReason::DateUnavailable)
                .with_detail(date.format("%Y-%m-%d").to_string())
        }
        ApplyError::RoomUnavailable(room) => {
            NeedsInput::new(NeedsInputKind::Availability, NeedsInputReason::RoomUnavailable)
                .with_detail(room.clone())
        }
        ApplyError::ProductNotFound(name) => {
            NeedsInput::new(NeedsInputKind::ProductFollowup, NeedsInputReason::ProductNotFound)
                .with_detail(name.clone())
        }
        ApplyError::Rejected(reason) => {
            NeedsInput::new(NeedsInputKind::Availability, NeedsInputReason::IntentRejected)
                .with_detail(reason.clone())
        }
    }
}

fn compose_message(
    executed: &[Intent],
    deferred: &[DeferredIntent],
    combined_confirmation: bool,
    question: &NextQuestion,
) -> String {
    let mut parts = Vec::new();

    if combined_confirmation {
        let date = executed.iter().find_map(|i| match i {
            Intent::ConfirmDate { date, .. } => Some(date.format("%d.%m.%Y").to_string()),
            _ => None,
        });
        let room = executed.iter().find_map(|i| match i {
            Intent::SelectRoom { room_id } => Some(room_id.as_str()),
            _ => None,
        });
        if let (Some(date), Some(room)) = (date, room) {
            parts.push(format!("I have reserved {room} for {date}."));
        }
    } else if !executed.is_empty() {
        let done: Vec<_> = executed.iter().map(Intent::describe).collect();
        parts.push(format!("Noted: {}.", done.join(", ")));
    }

    let later = deferred
        .iter()
        .filter(|d| d.reason == DeferralReason::CombinedLimitReached)
        .count();
    if later > 0 {
        parts.push(format!(
            "I will take care of the remaining {later} request{} next.",
            if later == 1 { "" } else { "s" }
        ));
    }

    parts.push(question.text.clone());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{ProductAction, ProductChange};
    use crate::record::{RoomStatus, TimeWindow};
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    struct RejectRooms;

    impl IntentApplier for RejectRooms {
        fn apply(&self, record: &mut EventRecord, intent: &Intent) -> Result<(), ApplyError> {
            match intent {
                Intent::SelectRoom { room_id } => Err(ApplyError::RoomUnavailable(room_id.clone())),
                other => RecordApplier.apply(record, other),
            }
        }
    }

    fn planner() -> AtomicTurnPlanner {
        AtomicTurnPlanner::new(PlannerConfig::default(), ChoiceConfig::default())
    }

    fn record() -> EventRecord {
        let mut rec = EventRecord::new(Uuid::new_v4());
        rec.begin_turn();
        rec
    }

    fn full_window() -> TimeWindow {
        TimeWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )
    }

    fn date_and_room() -> ExtractedFacts {
        ExtractedFacts {
            date: Some("2026-03-14".into()),
            time_window: Some(full_window()),
            room: Some("alpine".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_combo_confirms_date_and_room_together() {
        let mut rec = record();
        rec.flag_room("alpine", RoomStatus::Available);

        let result = planner().plan_turn(&mut rec, &date_and_room());

        assert_eq!(result.mode, ExecutionMode::Combo);
        assert!(result.combined_confirmation);
        assert_eq!(result.executed.len(), 2);
        assert_eq!(result.deferred_count, 0);
        assert!(rec.date_confirmed);
        assert_eq!(rec.locked_room_id.as_deref(), Some("alpine"));
        assert!(result.message.starts_with("I have reserved alpine for 14.03.2026."));
    }

    #[test]
    fn test_combo_failure_rolls_back_both() {
        let mut rec = record();
        rec.flag_room("alpine", RoomStatus::Option);
        let before = rec.clone();

        let result = planner()
            .with_applier(Arc::new(RejectRooms))
            .plan_turn(&mut rec, &date_and_room());

        assert!(!result.combined_confirmation);
        assert!(result.executed.is_empty());
        assert!(result
            .deferred
            .iter()
            .all(|d| d.reason == DeferralReason::ComboRolledBack));
        assert_eq!(rec.chosen_date, before.chosen_date);
        assert!(!rec.date_confirmed);
        assert!(rec.locked_room_id.is_none());
        assert_eq!(rec.open_pending().count(), 2);
        assert_eq!(result.question.reason, Some(NeedsInputReason::RoomUnavailable));
    }

    #[test]
    fn test_partial_window_blocks_combo() {
        let mut rec = record();
        rec.flag_room("alpine", RoomStatus::Available);
        let facts = ExtractedFacts {
            time_window: None,
            ..date_and_room()
        };

        let result = planner().plan_turn(&mut rec, &facts);

        assert_eq!(result.mode, ExecutionMode::Bounded);
        assert_eq!(result.executed.len(), 1);
        assert_eq!(result.question.kind, Some(NeedsInputKind::Time));
    }

    #[test]
    fn test_bounded_defers_beyond_limit() {
        let mut rec = record();
        let facts = ExtractedFacts {
            participants: Some(30),
            ..date_and_room()
        };

        let result = planner().plan_turn(&mut rec, &facts);

        assert_eq!(result.mode, ExecutionMode::Bounded);
        assert_eq!(result.executed.len(), 1);
        assert!(matches!(result.executed[0], Intent::ConfirmDate { .. }));
        assert_eq!(result.deferred_count, 2);
        assert!(result
            .deferred
            .iter()
            .all(|d| d.reason == DeferralReason::CombinedLimitReached));
        assert_eq!(rec.open_pending().count(), 2);
        assert!(result.message.contains("remaining 2 requests"));
    }

    #[test]
    fn test_legacy_limit_executes_three() {
        let mut rec = record();
        let facts = ExtractedFacts {
            participants: Some(30),
            ..date_and_room()
        };
        let planner = AtomicTurnPlanner::new(PlannerConfig::legacy(), ChoiceConfig::default());

        let result = planner.plan_turn(&mut rec, &facts);

        assert_eq!(result.executed.len(), 3);
        assert_eq!(result.deferred_count, 0);
        assert_eq!(rec.requirements.participants, Some(30));
        assert_eq!(rec.locked_room_id.as_deref(), Some("alpine"));
    }

    #[test]
    fn test_deferred_intents_replay_in_order() {
        let mut rec = record();
        let facts = ExtractedFacts {
            participants: Some(30),
            ..date_and_room()
        };
        let planner = planner();
        planner.plan_turn(&mut rec, &facts);

        rec.begin_turn();
        let second = planner.plan_turn(&mut rec, &ExtractedFacts::default());
        assert_eq!(second.telemetry.replayed, 2);
        assert!(matches!(second.executed[0], Intent::SetParticipants { count: 30 }));
        assert_eq!(rec.open_pending().count(), 1);

        rec.begin_turn();
        let third = planner.plan_turn(&mut rec, &ExtractedFacts::default());
        assert!(matches!(third.executed[0], Intent::SelectRoom { .. }));
        assert_eq!(rec.open_pending().count(), 0);
        assert_eq!(rec.pending_intents.len(), 2);
    }

    #[test]
    fn test_fresh_intent_supersedes_pending() {
        let mut rec = record();
        let facts = ExtractedFacts {
            participants: Some(30),
            ..date_and_room()
        };
        let planner = planner();
        planner.plan_turn(&mut rec, &facts);

        rec.begin_turn();
        let update = ExtractedFacts {
            participants: Some(45),
            ..Default::default()
        };
        let result = planner.plan_turn(&mut rec, &update);

        assert_eq!(result.telemetry.superseded, 1);
        assert!(matches!(result.executed[0], Intent::SetParticipants { count: 45 }));
        assert_eq!(rec.requirements.participants, Some(45));
    }

    #[test]
    fn test_prerequisites_defer_with_question() {
        let mut rec = record();
        let facts = ExtractedFacts {
            room: Some("alpine".into()),
            products: vec![ProductChange {
                action: ProductAction::Add,
                name: "lunch".into(),
                quantity: Some(20),
            }],
            ..Default::default()
        };

        let result = planner().plan_turn(&mut rec, &facts);

        assert!(result.executed.is_empty());
        let reasons: Vec<_> = result.deferred.iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![
                DeferralReason::RoomRequiresDate,
                DeferralReason::ProductRequiresRoom
            ]
        );
        assert_eq!(result.question.kind, Some(NeedsInputKind::Availability));
        assert_eq!(rec.open_pending().count(), 2);
    }

    #[test]
    fn test_date_choice_opens_prompt() {
        let mut rec = record();
        rec.date_candidates = vec![
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 16).unwrap(),
        ];
        let facts = ExtractedFacts {
            room: Some("alpine".into()),
            participants: Some(20),
            ..Default::default()
        };

        let result = planner().plan_turn(&mut rec, &facts);

        assert_eq!(result.question.kind, Some(NeedsInputKind::DateChoice));
        let ctx = rec.choice_context.as_ref().unwrap();
        assert_eq!(ctx.kind, ChoiceKind::DateOption);
        assert_eq!(ctx.options, vec!["2026-03-14", "2026-03-16"]);
    }

    #[test]
    fn test_failed_execution_is_recorded_resolved() {
        let mut rec = record();
        let facts = ExtractedFacts {
            products: vec![ProductChange {
                action: ProductAction::Remove,
                name: "projector".into(),
                quantity: None,
            }],
            participants: Some(12),
            ..Default::default()
        };
        rec.lock_room("alpine");
        let planner = AtomicTurnPlanner::new(PlannerConfig::legacy(), ChoiceConfig::default());

        let result = planner.plan_turn(&mut rec, &facts);

        assert_eq!(result.executed.len(), 1);
        assert_eq!(result.deferred[0].reason, DeferralReason::ExecutionFailed);
        assert_eq!(result.deferred[0].pending_seq, None);
        assert_eq!(rec.pending_intents.len(), 1);
        assert_eq!(rec.pending_intents[0].reason, DeferralReason::ExecutionFailed);
        assert_eq!(rec.open_pending().count(), 0);
        assert_eq!(result.question.reason, Some(NeedsInputReason::ProductNotFound));
        assert!(result.message.contains("projector is not on the booking"));
    }

    #[test]
    fn test_rejected_intent_asks_instead_of_vanishing() {
        struct BackendDown;

        impl IntentApplier for BackendDown {
            fn apply(&self, record: &mut EventRecord, intent: &Intent) -> Result<(), ApplyError> {
                match intent {
                    Intent::SelectRoom { .. } => {
                        Err(ApplyError::Rejected("room backend offline".into()))
                    }
                    other => RecordApplier.apply(record, other),
                }
            }
        }

        let mut rec = record();
        rec.confirm_date(NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        let facts = ExtractedFacts {
            room: Some("alpine".into()),
            participants: Some(12),
            ..Default::default()
        };
        let planner = AtomicTurnPlanner::new(PlannerConfig::legacy(), ChoiceConfig::default())
            .with_applier(Arc::new(BackendDown));

        let result = planner.plan_turn(&mut rec, &facts);

        assert_eq!(result.deferred[0].reason, DeferralReason::ExecutionFailed);
        assert_eq!(result.needs_input.len(), 1);
        assert_eq!(result.question.reason, Some(NeedsInputReason::IntentRejected));
        assert!(result.question.text.contains("room backend offline"));
        assert_eq!(rec.open_pending().count(), 0);
        assert!(rec.locked_room_id.is_none());
    }

    #[test]
    fn test_single_owned_intents_engage_the_planner() {
        let rec = record();
        let answer = ExtractedFacts {
            choice_selection: Some(1),
            ..Default::default()
        };
        let product = ExtractedFacts {
            products: vec![ProductChange {
                action: ProductAction::Add,
                name: "lunch".into(),
                quantity: Some(20),
            }],
            ..Default::default()
        };
        let size = ExtractedFacts {
            participants: Some(20),
            ..Default::default()
        };
        assert!(AtomicTurnPlanner::should_engage(&rec, &answer));
        assert!(AtomicTurnPlanner::should_engage(&rec, &product));
        assert!(!AtomicTurnPlanner::should_engage(&rec, &size));
    }
}
